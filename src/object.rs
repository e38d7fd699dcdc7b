//! Calendar objects (events, tasks, journals...) and the opaque tags the server gives us

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::identity::IdentityEvent;


/// A calendar object, as stored on the server.
///
/// Its calendar data is kept as an opaque string. Only its `UID` is ever looked at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarObject {
    /// Persistent, globally unique identifier for the calendar component.
    /// This may be unknown for objects downloaded from a server that contain no `UID` line
    uid: Option<String>,
    url: Url,
    /// The server-side version of this object (a WebDAV `etag`)
    etag: Option<VersionTag>,
    /// Set by a sync when the server reported this object as deleted
    is_deleted: bool,
    data: String,
}

impl CalendarObject {
    pub fn new(url: Url, uid: Option<String>, etag: Option<VersionTag>, data: String) -> Self {
        Self {
            uid, url, etag, data,
            is_deleted: false,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn etag(&self) -> Option<&VersionTag> {
        self.etag.as_ref()
    }

    /// Whether the server has deleted this object.
    ///
    /// Deleted objects stay in their collection until the next sync, so that observers notice the deletion
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// The raw iCal data
    pub fn data(&self) -> &str {
        &self.data
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }

    /// Look for the UID in the calendar data, unless it is already known.
    /// A UID, once known, never changes
    pub(crate) fn resolve_uid<F>(&mut self, hook: F)
    where
        F: FnMut(&IdentityEvent),
    {
        if self.uid.is_none() {
            self.uid = crate::identity::extract_uid_with_hook(&self.data, hook);
        }
    }

    pub(crate) fn inherit_uid(&mut self, previous: &CalendarObject) {
        if self.uid.is_none() {
            self.uid = previous.uid.clone();
        }
    }
}


/// A VersionTag is basically a CalDAV `etag`. Whenever it changes, this means the data has changed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTag {
    tag: String
}

impl From<String> for VersionTag {
    fn from(tag: String) -> VersionTag {
        Self { tag }
    }
}

impl VersionTag {
    /// Get the inner version tag (usually a WebDAV `etag`)
    pub fn as_str(&self) -> &str {
        &self.tag
    }
}


/// An opaque cursor in the change history of a collection, as issued by the server (RFC 6578).
///
/// Store it with [`as_str`](Self::as_str) and give it back with `SyncToken::from` to resume syncing after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncToken {
    token: String
}

impl From<String> for SyncToken {
    fn from(token: String) -> SyncToken {
        Self { token }
    }
}

impl From<&str> for SyncToken {
    fn from(token: &str) -> SyncToken {
        Self { token: token.to_string() }
    }
}

impl SyncToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl Display for SyncToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}
