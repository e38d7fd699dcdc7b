//! The local mirror of a remote calendar collection

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::object::{CalendarObject, SyncToken};
use crate::sync::{CollectionDiff, SyncEngine, SyncState};
use crate::sync::sync_progress::{FeedbackSender, SyncEvent, SyncProgress};
use crate::traits::SyncTransport;


/// A local copy of a CalDAV collection, kept up to date by [`sync`](Self::sync).
///
/// Objects are only ever changed by applying what the server reports.
/// Objects the server has deleted stay here as tombstones (see [`CalendarObject::is_deleted`]) until the following sync.
///
/// A collection must not be synced from several tasks at once. Different collections are independent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarCollection {
    url: Url,
    objects: HashMap<Url, CalendarObject>,
    /// Tombstones of objects whose URL now holds another UID
    #[serde(default)]
    retired: Vec<CalendarObject>,
    sync_state: SyncState,
    last_sync: Option<DateTime<Utc>>,
}

impl CalendarCollection {
    /// Create an empty collection, that has never been synced
    pub fn new(url: Url) -> Self {
        Self {
            url,
            objects: HashMap::new(),
            retired: Vec::new(),
            sync_state: SyncState::NoToken,
            last_sync: None,
        }
    }

    /// Create an empty collection that will resume syncing from a previously saved token
    pub fn with_sync_token(url: Url, token: SyncToken) -> Self {
        Self {
            sync_state: SyncState::HasToken(token),
            ..Self::new(url)
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The token to persist in order to resume syncing later
    pub fn sync_token(&self) -> Option<&SyncToken> {
        self.sync_state.token()
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync_state
    }

    /// Whether the next sync will download the whole collection
    pub fn needs_full_reload(&self) -> bool {
        self.sync_state.token().is_none()
    }

    /// The last time a diff has been applied to this collection
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// The objects that currently exist on the server
    pub fn objects(&self) -> impl Iterator<Item = &CalendarObject> {
        self.objects.values().filter(|obj| obj.is_deleted() == false)
    }

    /// The current objects, plus the ones that have been deleted during the last sync.
    ///
    /// When the server has replaced an object by another one with a different UID at the same URL,
    /// both are listed: the former one as deleted
    pub fn all_objects(&self) -> impl Iterator<Item = &CalendarObject> {
        self.objects.values().chain(self.retired.iter())
    }

    /// Returns an object (even if it has just been deleted)
    pub fn get(&self, url: &Url) -> Option<&CalendarObject> {
        self.objects.get(url)
    }

    /// Returns the live object with this UID
    pub fn get_by_uid(&self, uid: &str) -> Option<&CalendarObject> {
        self.objects().find(|obj| obj.uid() == Some(uid))
    }

    /// The count of live objects
    pub fn len(&self) -> usize {
        self.objects().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prepare a new object for this collection, with a URL derived from the UID of `data`.
    ///
    /// The object is not added to this collection: it will come back from the server on a later sync, once it has been uploaded.
    pub fn new_object(&self, data: String) -> Result<CalendarObject> {
        let uid = crate::identity::extract_uid(&data).ok_or(Error::IdentityNotFound)?;
        self.new_object_with_uid(uid, data)
    }

    /// Same as [`new_object`](Self::new_object), for data whose UID is already known (e.g. has just been generated)
    pub fn new_object_with_uid(&self, uid: String, data: String) -> Result<CalendarObject> {
        let url = crate::identity::generate_object_url(&self.url, Some(&uid), true)?;
        Ok(CalendarObject::new(url, Some(uid), None, data))
    }

    /// Compares the live objects of two collections
    pub fn has_same_live_objects_as(&self, other: &Self) -> bool {
        let left: HashMap<&Url, &CalendarObject> = self.objects().map(|obj| (obj.url(), obj)).collect();
        let right: HashMap<&Url, &CalendarObject> = other.objects().map(|obj| (obj.url(), obj)).collect();

        if crate::utils::keys_are_the_same(&left, &right) == false {
            return false;
        }
        left.iter().all(|(url, obj)| right.get(url) == Some(obj))
    }

    /// Fill this collection.
    ///
    /// When `initial` is true and no token is known yet, the whole collection is downloaded and replaces the local content.
    /// Otherwise, this is the same as [`sync`](Self::sync).
    pub async fn load<T>(&mut self, engine: &SyncEngine<T>, initial: bool) -> Result<()>
    where
        T: SyncTransport + Sync,
    {
        if initial == false || self.sync_state.token().is_some() {
            return self.sync(engine).await.map(|_| ());
        }

        let diff = engine.fetch_changes(&self.url, None).await?;
        log::info!("Initial load of {}: {} objects", self.url, diff.upserted.len());

        let mut progress = SyncProgress::new();
        let mut objects = HashMap::with_capacity(diff.upserted.len());
        for mut obj in diff.upserted {
            let url = obj.url().clone();
            obj.resolve_uid(|event| progress.identity(&url, event));
            objects.insert(url, obj);
        }
        self.objects = objects;
        self.retired.clear();
        self.commit(diff.sync_token);
        Ok(())
    }

    /// Fetch the changes from the server and apply them.
    ///
    /// Returns the diff that has been applied.
    /// In case the server rejected our sync token, this returns [`Error::TokenRejected`] and the next call will reload the whole collection.
    /// In case of error, the content of this collection is unchanged.
    pub async fn sync<T>(&mut self, engine: &SyncEngine<T>) -> Result<CollectionDiff>
    where
        T: SyncTransport + Sync,
    {
        let mut progress = SyncProgress::new();
        self.run_sync(engine, &mut progress).await
    }

    /// Same as [`sync`](Self::sync), and provide feedback to the user about the progress
    pub async fn sync_with_feedback<T>(&mut self, engine: &SyncEngine<T>, feedback_sender: FeedbackSender) -> Result<CollectionDiff>
    where
        T: SyncTransport + Sync,
    {
        let mut progress = SyncProgress::new_with_feedback_channel(feedback_sender);
        self.run_sync(engine, &mut progress).await
    }

    /// Same as [`sync`](Self::sync), for callers that are not running in an async runtime.
    ///
    /// This must not be called from within an async runtime.
    pub fn sync_blocking<T>(&mut self, engine: &SyncEngine<T>) -> Result<CollectionDiff>
    where
        T: SyncTransport + Sync,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::Transport(Box::new(err)))?;
        runtime.block_on(self.sync(engine))
    }

    async fn run_sync<T>(&mut self, engine: &SyncEngine<T>, progress: &mut SyncProgress) -> Result<CollectionDiff>
    where
        T: SyncTransport + Sync,
    {
        progress.feedback(SyncEvent::Started);
        let result = self.run_sync_inner(engine, progress).await;
        if let Err(err) = &result {
            progress.error(&format!("Sync of {} terminated because of an error: {}", self.url, err));
        }
        progress.feedback(SyncEvent::Finished{ success: progress.is_success() });
        result
    }

    async fn run_sync_inner<T>(&mut self, engine: &SyncEngine<T>, progress: &mut SyncProgress) -> Result<CollectionDiff>
    where
        T: SyncTransport + Sync,
    {
        let collection_name = self.url.to_string();
        if self.sync_state == SyncState::TokenRejected {
            progress.info(&format!("Our previous token for {} has been rejected. Reloading the whole collection", collection_name));
        }

        let token = self.sync_state.token().cloned();
        let diff = match engine.fetch_changes(&self.url, token.as_ref()).await {
            Err(Error::TokenRejected(token)) => {
                self.sync_state = SyncState::TokenRejected;
                return Err(Error::TokenRejected(token));
            },
            Err(err) => return Err(err),
            Ok(diff) => diff,
        };

        progress.feedback(SyncEvent::InProgress{
            collection: collection_name,
            details: format!("{} changed, {} deleted", diff.upserted.len(), diff.deleted.len()),
        });

        // Nothing can fail nor suspend from here, so that a cancelled sync never leaves half of a diff applied
        Ok(self.apply_diff(diff, progress))
    }

    fn apply_diff(&mut self, diff: CollectionDiff, progress: &mut SyncProgress) -> CollectionDiff {
        // Tombstones have been observable since the previous sync
        let n_before = self.objects.len() + self.retired.len();
        self.objects.retain(|_url, obj| obj.is_deleted() == false);
        self.retired.clear();
        if self.objects.len() != n_before {
            progress.debug(&format!("Evicted {} tombstones", n_before - self.objects.len()));
        }

        let CollectionDiff { upserted, mut deleted, sync_token, is_full_snapshot } = diff;

        if is_full_snapshot {
            // Whatever is not listed has been deleted while we were not able to track it
            let listed: HashSet<&Url> = upserted.iter().map(|obj| obj.url()).collect();
            deleted = self.objects.keys()
                .filter(|url| listed.contains(url) == false)
                .cloned()
                .collect();
        }
        // An object may move to another URL within a single diff
        let leaving: HashSet<Url> = deleted.iter().cloned().collect();

        let mut applied_upserts = Vec::with_capacity(upserted.len());
        for mut obj in upserted {
            let url = obj.url().clone();
            obj.resolve_uid(|event| progress.identity(&url, event));

            match self.objects.get(&url) {
                Some(previous) => {
                    obj.inherit_uid(previous);
                    match (previous.uid(), obj.uid()) {
                        (Some(former), Some(current)) if former != current => {
                            // A UID never changes: this is another object, that replaces the former one
                            progress.warn(&format!("{} now holds UID {} instead of {}. {} is considered deleted", url, current, former, former));
                            let mut retired = previous.clone();
                            retired.mark_deleted();
                            self.retired.push(retired);
                        },
                        _ => progress.debug(&format!("> Applying remote change {}", url)),
                    }
                },
                None => {
                    if let Some(uid) = obj.uid() {
                        let other = self.get_by_uid(uid).filter(|other| leaving.contains(other.url()) == false);
                        if let Some(other) = other {
                            progress.warn(&format!("UID {} is used by both {} and {}", uid, other.url(), url));
                        }
                    }
                    progress.debug(&format!("> Applying remote addition {}", url));
                },
            }
            applied_upserts.push(obj.clone());
            self.objects.insert(url, obj);
        }

        let mut applied_deletions = Vec::with_capacity(deleted.len());
        for url in deleted {
            match self.objects.get_mut(&url) {
                None => progress.debug(&format!("{} was deleted remotely, but we did not know about it", url)),
                Some(obj) => {
                    progress.debug(&format!("> Applying remote deletion {}", url));
                    obj.mark_deleted();
                    applied_deletions.push(url);
                },
            }
        }

        self.commit(sync_token.clone());

        CollectionDiff {
            upserted: applied_upserts,
            deleted: applied_deletions,
            sync_token,
            is_full_snapshot,
        }
    }

    /// Remember the token only once its diff has been fully applied
    fn commit(&mut self, token: SyncToken) {
        self.sync_state = SyncState::HasToken(token);
        self.last_sync = Some(Utc::now());
    }
}
