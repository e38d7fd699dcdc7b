//! This crate keeps a local mirror of a CalDAV collection in sync with a server.
//!
//! It manages the identity of calendar objects in the [`identity`] module: their `UID`, and the URL they are stored at.
//!
//! The [`sync`] module asks a server what changed since the last sync, using WebDAV sync tokens (RFC 6578).
//! The actual network exchange is done by a [`SyncTransport`](traits::SyncTransport), usually a [`Client`](client::Client).
//!
//! These changes are applied to a [`CalendarCollection`], that callers may persist as they wish (it only needs its sync token to resume).

pub mod traits;

mod error;
pub use error::{Error, Result};
pub mod identity;
mod object;
pub use object::{CalendarObject, SyncToken, VersionTag};
pub mod collection;
pub use collection::CalendarCollection;
pub mod sync;
pub use sync::{CollectionDiff, SyncEngine, SyncState};

pub mod client;
pub mod resource;
pub mod mock_behaviour;
pub mod mock_server;

pub mod config;
pub mod utils;
