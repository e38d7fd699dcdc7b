//! This module asks a server what changed in a collection, using WebDAV sync tokens (RFC 6578)
//!
//! It does not change anything locally: it only turns the reply of a [`SyncTransport`] into a checked [`CollectionDiff`].
//! Applying this diff is the job of a [`CalendarCollection`](crate::CalendarCollection).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::object::{CalendarObject, SyncToken, VersionTag};
use crate::traits::{RemoteObject, SyncReply, SyncResponse, SyncTransport};

pub mod sync_progress;

/// How many requests a truncated reply may be spread over
const MAX_SYNC_PAGES: usize = 1000;


/// Where a collection stands in the sync protocol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncState {
    /// Never synced: the next sync asks for every object
    NoToken,
    /// The next sync only asks for what changed since this token
    HasToken(SyncToken),
    /// The server rejected our last token: the next sync asks for every object
    TokenRejected,
}

impl SyncState {
    /// The token to present on the next request, if any
    pub fn token(&self) -> Option<&SyncToken> {
        match self {
            SyncState::HasToken(token) => Some(token),
            _ => None,
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::NoToken
    }
}


/// The changes reported by a single sync exchange
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionDiff {
    /// Objects that are new or have changed. Their URLs are all different
    pub upserted: Vec<CalendarObject>,
    /// URLs of deleted objects. None of them is in `upserted`
    pub deleted: Vec<Url>,
    /// The token to present on the next sync
    pub sync_token: SyncToken,
    /// Whether this diff lists every object of the collection (i.e. it has been requested without a token)
    pub is_full_snapshot: bool,
}

impl CollectionDiff {
    /// Whether this diff contains no change
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.deleted.is_empty()
    }

    /// Add the changes of the following page of a truncated reply
    fn merge(&mut self, next: CollectionDiff) {
        for obj in next.upserted {
            self.deleted.retain(|url| url != obj.url());
            match self.upserted.iter_mut().find(|known| known.url() == obj.url()) {
                Some(known) => *known = obj,
                None => self.upserted.push(obj),
            }
        }
        for url in next.deleted {
            self.upserted.retain(|obj| obj.url() != &url);
            // A full snapshot only lists what exists
            if self.is_full_snapshot == false && self.deleted.contains(&url) == false {
                self.deleted.push(url);
            }
        }
        self.sync_token = next.sync_token;
    }
}


/// Runs the sync-token protocol through a [`SyncTransport`]
#[derive(Debug)]
pub struct SyncEngine<T> {
    transport: T,
}

impl<T> SyncEngine<T>
where
    T: SyncTransport + Sync,
{
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch what changed in a collection since `current_token`, or its whole content if `current_token` is `None`.
    ///
    /// Truncated replies are followed until the server has listed everything, and come back as a single diff.
    ///
    /// Fails with [`Error::TokenRejected`] when the server does not accept `current_token`.
    /// In this case, the caller should forget about it and sync again without any token.
    pub async fn fetch_changes(&self, collection_url: &Url, current_token: Option<&SyncToken>) -> Result<CollectionDiff> {
        log::debug!("Fetching changes of {} (token: {:?})", collection_url, current_token.map(|t| t.as_str()));

        let (mut diff, mut is_truncated) = self.fetch_page(collection_url, current_token).await?;
        let mut sent_token = current_token.cloned();
        let mut n_pages = 1;
        while is_truncated {
            if n_pages >= MAX_SYNC_PAGES {
                return Err(Error::MalformedDiff(format!("{} is still truncated after {} pages", collection_url, n_pages)));
            }
            let page_token = diff.sync_token.clone();
            if sent_token.as_ref() == Some(&page_token) {
                return Err(Error::MalformedDiff(format!("{} sent a truncated reply without moving its sync token", collection_url)));
            }

            log::debug!("Reply for {} is truncated, asking for the rest from {}", collection_url, page_token);
            let (next_page, next_is_truncated) = self.fetch_page(collection_url, Some(&page_token)).await?;
            diff.merge(next_page);
            is_truncated = next_is_truncated;
            sent_token = Some(page_token);
            n_pages += 1;
        }

        log::debug!("{} reported {} upserted and {} deleted objects", collection_url, diff.upserted.len(), diff.deleted.len());
        Ok(diff)
    }

    /// A single request. Also returns whether the server truncated its reply
    async fn fetch_page(&self, collection_url: &Url, token: Option<&SyncToken>) -> Result<(CollectionDiff, bool)> {
        let reply = self.transport
            .perform_sync_request(collection_url, token)
            .await
            .map_err(Error::Transport)?;

        match reply {
            SyncReply::TokenRejected => {
                match token {
                    Some(token) => {
                        log::info!("Sync token {} for {} has been rejected", token, collection_url);
                        Err(Error::TokenRejected(token.clone()))
                    },
                    None => Err(Error::MalformedDiff(
                        format!("{} rejected a sync token although none was sent", collection_url)
                    )),
                }
            },
            SyncReply::Changes(response) => {
                let is_truncated = response.is_truncated;
                let diff = check_response(response, token.is_none())?;
                Ok((diff, is_truncated))
            },
        }
    }
}


/// Make sure a transport reply honours the sync contract, and turn it into a diff
fn check_response(response: SyncResponse, is_full_snapshot: bool) -> Result<CollectionDiff> {
    let sync_token = match response.next_token {
        Some(token) if token.is_empty() == false => SyncToken::from(token),
        _ => return Err(Error::MalformedDiff("the server did not provide any sync token".into())),
    };

    if is_full_snapshot && response.deleted.is_empty() == false {
        return Err(Error::MalformedDiff(
            format!("a full snapshot cannot contain deletions (got {})", response.deleted.len())
        ));
    }

    let mut upserted_urls = HashSet::new();
    let mut upserted = Vec::with_capacity(response.upserted.len());
    for remote in response.upserted {
        if upserted_urls.insert(remote.url.clone()) == false {
            return Err(Error::MalformedDiff(format!("{} is reported twice", remote.url)));
        }
        upserted.push(to_calendar_object(remote)?);
    }

    let mut deleted_urls = HashSet::new();
    let mut deleted = Vec::with_capacity(response.deleted.len());
    for url in response.deleted {
        if upserted_urls.contains(&url) {
            return Err(Error::MalformedDiff(format!("{} is reported both as changed and deleted", url)));
        }
        // Duplicate deletions are harmless
        if deleted_urls.insert(url.clone()) {
            deleted.push(url);
        }
    }

    Ok(CollectionDiff {
        upserted,
        deleted,
        sync_token,
        is_full_snapshot,
    })
}

fn to_calendar_object(remote: RemoteObject) -> Result<CalendarObject> {
    let data = match remote.data {
        Some(data) => data,
        None => return Err(Error::MalformedDiff(format!("{} has no calendar data", remote.url))),
    };
    let etag = remote.etag.map(VersionTag::from);
    Ok(CalendarObject::new(remote.url, remote.uid, etag, data))
}


#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use std::error::Error as StdError;
    use std::sync::Mutex;
    use async_trait::async_trait;

    /// A transport that always replies the same thing
    struct CannedTransport(SyncReply);

    #[async_trait]
    impl SyncTransport for CannedTransport {
        async fn perform_sync_request(&self, _url: &Url, _token: Option<&SyncToken>) -> std::result::Result<SyncReply, Box<dyn StdError + Send + Sync>> {
            Ok(self.0.clone())
        }
    }

    /// A transport that replies these pages, one per request
    struct PagedTransport {
        pages: Mutex<VecDeque<SyncResponse>>,
        requested_tokens: Mutex<Vec<Option<SyncToken>>>,
    }

    impl PagedTransport {
        fn new(pages: Vec<SyncResponse>) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().collect()),
                requested_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SyncTransport for PagedTransport {
        async fn perform_sync_request(&self, _url: &Url, token: Option<&SyncToken>) -> std::result::Result<SyncReply, Box<dyn StdError + Send + Sync>> {
            self.requested_tokens.lock().unwrap().push(token.cloned());
            let page = self.pages.lock().unwrap().pop_front().ok_or("no more pages")?;
            Ok(SyncReply::Changes(page))
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl SyncTransport for BrokenTransport {
        async fn perform_sync_request(&self, _url: &Url, _token: Option<&SyncToken>) -> std::result::Result<SyncReply, Box<dyn StdError + Send + Sync>> {
            Err("connection reset by peer".into())
        }
    }

    fn collection() -> Url {
        "https://caldav.example.com/cal/".parse().unwrap()
    }

    fn remote(name: &str) -> RemoteObject {
        RemoteObject {
            uid: None,
            url: collection().join(name).unwrap(),
            etag: Some(format!("\"etag-{}\"", name)),
            data: Some(format!("BEGIN:VCALENDAR\nUID:{}\nEND:VCALENDAR\n", name)),
        }
    }

    fn engine(response: SyncResponse) -> SyncEngine<CannedTransport> {
        SyncEngine::new(CannedTransport(SyncReply::Changes(response)))
    }

    #[tokio::test]
    async fn test_incremental_changes() {
        let response = SyncResponse {
            upserted: vec![remote("a.ics"), remote("b.ics")],
            deleted: vec![collection().join("c.ics").unwrap(), collection().join("c.ics").unwrap()],
            next_token: Some("token-2".into()),
            ..SyncResponse::default()
        };
        let token = SyncToken::from("token-1");
        let diff = engine(response).fetch_changes(&collection(), Some(&token)).await.unwrap();

        assert_eq!(diff.upserted.len(), 2);
        assert_eq!(diff.upserted[0].etag().map(|e| e.as_str()), Some("\"etag-a.ics\""));
        assert_eq!(diff.deleted, vec![collection().join("c.ics").unwrap()]);
        assert_eq!(diff.sync_token.as_str(), "token-2");
        assert_eq!(diff.is_full_snapshot, false);
    }

    #[tokio::test]
    async fn test_token_rejected() {
        let engine = SyncEngine::new(CannedTransport(SyncReply::TokenRejected));
        let token = SyncToken::from("stale");
        match engine.fetch_changes(&collection(), Some(&token)).await {
            Err(Error::TokenRejected(t)) => assert_eq!(t, token),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let engine = SyncEngine::new(BrokenTransport);
        match engine.fetch_changes(&collection(), None).await {
            Err(Error::Transport(err)) => assert_eq!(err.to_string(), "connection reset by peer"),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_diffs() {
        let token = SyncToken::from("token-1");

        let overlap = SyncResponse {
            upserted: vec![remote("a.ics")],
            deleted: vec![collection().join("a.ics").unwrap()],
            next_token: Some("token-2".into()),
            ..SyncResponse::default()
        };
        let no_token = SyncResponse {
            upserted: vec![remote("a.ics")],
            deleted: Vec::new(),
            next_token: None,
            ..SyncResponse::default()
        };
        let mut no_data = remote("a.ics");
        no_data.data = None;
        let missing_data = SyncResponse {
            upserted: vec![no_data],
            deleted: Vec::new(),
            next_token: Some("token-2".into()),
            ..SyncResponse::default()
        };
        let twice = SyncResponse {
            upserted: vec![remote("a.ics"), remote("a.ics")],
            deleted: Vec::new(),
            next_token: Some("token-2".into()),
            ..SyncResponse::default()
        };

        for response in vec![overlap, no_token, missing_data, twice] {
            let result = engine(response).fetch_changes(&collection(), Some(&token)).await;
            assert!(matches!(result, Err(Error::MalformedDiff(_))), "{:?}", result);
        }

        // A full snapshot cannot report deletions
        let snapshot_with_deletions = SyncResponse {
            upserted: Vec::new(),
            deleted: vec![collection().join("z.ics").unwrap()],
            next_token: Some("token-2".into()),
            ..SyncResponse::default()
        };
        let result = engine(snapshot_with_deletions).fetch_changes(&collection(), None).await;
        assert!(matches!(result, Err(Error::MalformedDiff(_))));
    }

    fn page(upserted: Vec<RemoteObject>, deleted: &[&str], token: &str, is_truncated: bool) -> SyncResponse {
        SyncResponse {
            upserted,
            deleted: deleted.iter().map(|name| collection().join(name).unwrap()).collect(),
            next_token: Some(token.into()),
            is_truncated,
        }
    }

    #[tokio::test]
    async fn test_truncated_snapshot() {
        let mut b_changed = remote("b.ics");
        b_changed.etag = Some("\"etag-b2\"".into());
        let engine = SyncEngine::new(PagedTransport::new(vec![
            page(vec![remote("a.ics"), remote("b.ics")], &[], "page-1", true),
            page(vec![b_changed, remote("c.ics")], &["a.ics", "gone.ics"], "page-2", true),
            page(vec![remote("d.ics")], &[], "token-final", false),
        ]));

        let diff = engine.fetch_changes(&collection(), None).await.unwrap();

        let mut urls: Vec<&str> = diff.upserted.iter().map(|obj| obj.url().as_str()).collect();
        urls.sort();
        assert_eq!(urls, vec![
            "https://caldav.example.com/cal/b.ics",
            "https://caldav.example.com/cal/c.ics",
            "https://caldav.example.com/cal/d.ics",
        ]);
        let b = diff.upserted.iter().find(|obj| obj.url().as_str().ends_with("b.ics")).unwrap();
        assert_eq!(b.etag().map(|e| e.as_str()), Some("\"etag-b2\""));
        // Still a full snapshot, that lists no deletion
        assert!(diff.deleted.is_empty());
        assert!(diff.is_full_snapshot);
        assert_eq!(diff.sync_token.as_str(), "token-final");
        assert_eq!(*engine.transport().requested_tokens.lock().unwrap(), vec![
            None, Some(SyncToken::from("page-1")), Some(SyncToken::from("page-2")),
        ]);
    }

    #[tokio::test]
    async fn test_truncated_incremental_changes() {
        let engine = SyncEngine::new(PagedTransport::new(vec![
            page(vec![remote("a.ics")], &["b.ics"], "page-1", true),
            page(vec![remote("b.ics")], &["a.ics", "c.ics"], "token-final", false),
        ]));

        let token = SyncToken::from("token-1");
        let diff = engine.fetch_changes(&collection(), Some(&token)).await.unwrap();

        assert_eq!(diff.upserted.len(), 1);
        assert_eq!(diff.upserted[0].url().as_str(), "https://caldav.example.com/cal/b.ics");
        assert_eq!(diff.deleted, vec![
            collection().join("a.ics").unwrap(),
            collection().join("c.ics").unwrap(),
        ]);
        assert_eq!(diff.is_full_snapshot, false);
        assert_eq!(diff.sync_token.as_str(), "token-final");
    }

    #[tokio::test]
    async fn test_truncated_reply_must_move_forward() {
        let engine = SyncEngine::new(PagedTransport::new(vec![
            page(vec![remote("a.ics")], &[], "token-1", true),
        ]));
        let token = SyncToken::from("token-1");
        let result = engine.fetch_changes(&collection(), Some(&token)).await;
        assert!(matches!(result, Err(Error::MalformedDiff(_))), "{:?}", result);
        assert_eq!(engine.transport().requested_tokens.lock().unwrap().len(), 1);
    }
}
