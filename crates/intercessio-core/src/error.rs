//! Error types for Intercessio.
//!
//! Every public operation returns one of these classes; internal helpers
//! convert backend errors at the operation boundary so a single failing
//! request never takes the daemon down.

use thiserror::Error;

/// Core error type for daemon operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A session, approval task, or key lookup came up empty.
    #[error("{0} not found")]
    NotFound(String),

    /// A policy template id was explicitly selected but is not in the
    /// registry. Implicit references from persisted records fall back to
    /// the default policy instead of raising this.
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    /// The secret vault backend failed. Fatal to the triggering
    /// operation, never to the daemon.
    #[error("secret vault error: {0}")]
    Vault(String),

    /// Starting, resuming, or stopping a Nostr Connect provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Session store (database) failure.
    #[error("store error: {0}")]
    Store(String),

    /// Malformed control-plane or signing-request payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Metadata file read/write failure or corruption.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Another daemon instance already owns the control socket.
    #[error("daemon already running")]
    AlreadyRunning,
}

/// Result type alias using Intercessio's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Metadata(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}
