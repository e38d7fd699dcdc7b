use std::error::Error;

use async_trait::async_trait;
use url::Url;

use crate::object::SyncToken;

/// Something able to ask a server what changed in a collection.
///
/// This is usually a [`Client`](crate::client::Client), or a [`MockServer`](crate::mock_server::MockServer) in tests.
/// Implementors do the actual network exchange, and normalize whatever their server replies into a [`SyncReply`].
#[async_trait]
pub trait SyncTransport {
    /// Returns every object of the collection when `token` is `None`,
    /// or the objects that changed (and the ones that were deleted) since `token` otherwise.
    ///
    /// Retrying (if any) is up to the implementor.
    async fn perform_sync_request(&self, collection_url: &Url, token: Option<&SyncToken>)
        -> Result<SyncReply, Box<dyn Error + Send + Sync>>;
}

/// What a server replied to a sync request
#[derive(Clone, Debug, PartialEq)]
pub enum SyncReply {
    Changes(SyncResponse),
    /// The server does not know (or does not accept anymore) the token it was given
    TokenRejected,
}

/// The changes a server has reported, before they are checked
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncResponse {
    pub upserted: Vec<RemoteObject>,
    pub deleted: Vec<Url>,
    pub next_token: Option<String>,
    /// The server did not list every change (RFC 6578 `507` on the collection itself).
    /// What is missing comes with the next request, made with `next_token`
    pub is_truncated: bool,
}

/// An object that is new or has changed on the server
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteObject {
    pub uid: Option<String>,
    pub url: Url,
    pub etag: Option<String>,
    pub data: Option<String>,
}
