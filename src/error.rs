//! Errors returned by this crate

use thiserror::Error;

use crate::object::SyncToken;

/// Everything that can go wrong while deriving identities or syncing a collection
#[derive(Error, Debug)]
pub enum Error {
    /// The calendar data has no `UID:` line.
    /// This is not fatal: callers may pick a fresh UID with [`generate_uid`](crate::identity::generate_uid)
    #[error("no UID found in the calendar data")]
    IdentityNotFound,

    /// The server does not recognize this sync token anymore. A full reload is needed
    #[error("sync token {0} has been rejected by the server")]
    TokenRejected(SyncToken),

    /// The transport failed to exchange with the server
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The transport returned a change set that breaks the sync contract
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
