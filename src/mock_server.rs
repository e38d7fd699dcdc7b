//! An in-memory CalDAV collection, that answers sync requests like a real server would.
//!
//! This is mostly useful for tests, where it stands for a [`Client`](crate::client::Client).

use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::mock_behaviour::MockBehaviour;
use crate::object::SyncToken;
use crate::traits::{RemoteObject, SyncReply, SyncResponse, SyncTransport};

const TOKEN_PREFIX: &str = "mock-sync-token-";
/// Tokens handed out in truncated replies: `mock-page-token-{full|revision}-{offset}`
const PAGE_TOKEN_PREFIX: &str = "mock-page-token-";

#[derive(Debug)]
struct StoredObject {
    etag: String,
    data: String,
}

#[derive(Debug)]
struct MockState {
    objects: HashMap<Url, StoredObject>,
    /// Incremented on every change
    revision: u64,
    /// Which URL changed at which revision
    changes: Vec<(u64, Url)>,
    /// Tokens older than this are rejected
    oldest_valid_revision: u64,
    /// Every token that has been presented, in order
    requests: Vec<Option<SyncToken>>,
    /// Replies list at most this many objects
    page_size: Option<usize>,
}

/// A single CalDAV collection, held in memory
#[derive(Debug)]
pub struct MockServer {
    collection_url: Url,
    state: Mutex<MockState>,
    behaviour: Arc<Mutex<MockBehaviour>>,
}

impl MockServer {
    pub fn new(collection_url: Url) -> Self {
        Self::new_with_behaviour(collection_url, Arc::new(Mutex::new(MockBehaviour::new())))
    }

    /// Create a mock server whose failures are driven by `behaviour`
    pub fn new_with_behaviour(collection_url: Url, behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        Self {
            collection_url,
            state: Mutex::new(MockState {
                objects: HashMap::new(),
                revision: 0,
                changes: Vec::new(),
                oldest_valid_revision: 0,
                requests: Vec::new(),
                page_size: None,
            }),
            behaviour,
        }
    }

    pub fn collection_url(&self) -> &Url {
        &self.collection_url
    }

    /// Store an object at the URL derived from its UID (a new UID is picked if `data` has none).
    /// Returns its URL
    pub fn put(&self, data: &str) -> Result<Url, url::ParseError> {
        let uid = crate::identity::extract_uid(data);
        let url = crate::identity::generate_object_url(&self.collection_url, uid.as_deref(), true)?;
        self.put_at(url.clone(), data);
        Ok(url)
    }

    /// Create or replace the object at `url`
    pub fn put_at(&self, url: Url, data: &str) {
        let mut state = self.lock();
        state.revision += 1;
        let revision = state.revision;
        state.objects.insert(url.clone(), StoredObject {
            etag: format!("\"{}\"", revision),
            data: data.to_string(),
        });
        state.changes.push((revision, url));
    }

    /// Delete an object. Returns whether it existed
    pub fn delete(&self, url: &Url) -> bool {
        let mut state = self.lock();
        if state.objects.remove(url).is_none() {
            return false;
        }
        state.revision += 1;
        let revision = state.revision;
        state.changes.push((revision, url.clone()));
        true
    }

    /// Forget the change history: every token issued so far will be rejected
    pub fn expire_tokens(&self) {
        let mut state = self.lock();
        state.revision += 1;
        state.oldest_valid_revision = state.revision;
        state.changes.clear();
    }

    /// Truncate replies to `page_size` objects, the rest being sent in the following requests
    pub fn set_page_size(&self, page_size: Option<usize>) {
        self.lock().page_size = page_size.map(|size| size.max(1));
    }

    /// The tokens that have been presented to this server, one per sync request
    pub fn requested_tokens(&self) -> Vec<Option<SyncToken>> {
        self.lock().requests.clone()
    }

    /// The URLs of the objects currently stored
    pub fn urls(&self) -> Vec<Url> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test must not hide the other ones' results
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Where a token points to: since which revision (`None` for the whole collection), and how many objects have already been sent
    fn parse_token(state: &MockState, token: &SyncToken) -> Option<(Option<u64>, usize)> {
        let (base, offset) = match token.as_str().strip_prefix(PAGE_TOKEN_PREFIX) {
            None => (token.as_str().strip_prefix(TOKEN_PREFIX)?, 0),
            Some(page) => {
                let mut parts = page.rsplitn(2, '-');
                let offset = parts.next()?.parse::<usize>().ok()?;
                (parts.next()?, offset)
            },
        };

        if base == "full" {
            return Some((None, offset));
        }
        match base.parse::<u64>() {
            Ok(rev) if rev >= state.oldest_valid_revision && rev <= state.revision => Some((Some(rev), offset)),
            _ => None,
        }
    }

    fn reply(state: &MockState, base: Option<u64>, offset: usize) -> SyncResponse {
        let changed: BTreeSet<&Url> = match base {
            None => state.objects.keys().collect(),
            Some(revision) => state.changes.iter()
                .filter(|(rev, _)| *rev > revision)
                .map(|(_, url)| url)
                .collect(),
        };
        let changed: Vec<&Url> = changed.into_iter().collect();

        let start = offset.min(changed.len());
        let end = match state.page_size {
            Some(size) => (start + size).min(changed.len()),
            None => changed.len(),
        };
        let is_truncated = end < changed.len();
        let next_token = match (is_truncated, base) {
            (false, _) => format!("{}{}", TOKEN_PREFIX, state.revision),
            (true, None) => format!("{}full-{}", PAGE_TOKEN_PREFIX, end),
            (true, Some(revision)) => format!("{}{}-{}", PAGE_TOKEN_PREFIX, revision, end),
        };

        let mut response = SyncResponse {
            next_token: Some(next_token),
            is_truncated,
            ..SyncResponse::default()
        };
        for url in &changed[start..end] {
            match state.objects.get(*url) {
                Some(obj) => response.upserted.push(remote_object(url, obj)),
                None => response.deleted.push((*url).clone()),
            }
        }
        response
    }
}

fn remote_object(url: &Url, obj: &StoredObject) -> RemoteObject {
    RemoteObject {
        uid: None,
        url: url.clone(),
        etag: Some(obj.etag.clone()),
        data: Some(obj.data.clone()),
    }
}

#[async_trait]
impl SyncTransport for MockServer {
    async fn perform_sync_request(&self, collection_url: &Url, token: Option<&SyncToken>)
        -> Result<SyncReply, Box<dyn Error + Send + Sync>>
    {
        {
            let mut behaviour = self.behaviour.lock().map_err(|_| "mock behaviour is poisoned")?;
            behaviour.can_sync()?;
        }

        if collection_url != &self.collection_url {
            return Err(format!("No collection at {}", collection_url).into());
        }

        let mut state = self.lock();
        state.requests.push(token.cloned());

        let token = match token {
            None => return Ok(SyncReply::Changes(Self::reply(&state, None, 0))),
            Some(token) => token,
        };

        let (base, offset) = match Self::parse_token(&state, token) {
            Some(cursor) => cursor,
            None => {
                log::debug!("Mock server: rejecting token {}", token);
                return Ok(SyncReply::TokenRejected);
            },
        };

        let accepted = self.behaviour.lock()
            .map_err(|_| "mock behaviour is poisoned")?
            .can_accept_token()
            .is_ok();
        if accepted == false {
            return Ok(SyncReply::TokenRejected);
        }

        Ok(SyncReply::Changes(Self::reply(&state, base, offset)))
    }
}
