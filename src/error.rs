//! Centralized error types for diskmail.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the diskmail library.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mailbox index could not be opened (missing directory, corrupt file).
    #[error("Cannot open mailbox index '{path}': {reason}")]
    IndexOpen { path: PathBuf, reason: String },

    /// The embedded index reported an error inside a transaction.
    #[error("Index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// A record or key in the index could not be decoded.
    #[error("Corrupt index entry: {0}")]
    Corrupt(String),

    /// The durable UID counter cannot produce another 32-bit UID.
    #[error("UID space exhausted for this mailbox")]
    UidExhausted,

    /// A message body could not be parsed by the message parser.
    #[error("Cannot parse message: {0}")]
    Parse(String),

    /// The operation is deliberately not supported by this store.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// The mailbox store has been closed.
    #[error("Mailbox is closed")]
    Closed,

    /// The caller cancelled the operation or its deadline elapsed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Malformed sequence set, search query, or fetch attribute.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Append committed the record but the body file could not be written.
    ///
    /// The UID stays reserved and the record has no body until a
    /// reconciliation pass deals with it.
    #[error("Message {uid} was indexed but its body could not be written: {source}")]
    OrphanRecord {
        uid: u32,
        #[source]
        source: Box<StoreError>,
    },

    /// Expunge committed the index deletion but some body files remain.
    #[error("Expunged messages left body files behind: {uids:?}")]
    DanglingBodies { uids: Vec<u32> },
}

/// Convenience alias for `Result<T, StoreError>`.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from a body file rather than the index.
    pub fn is_body_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Parse(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupt(format!("record serialization: {e}"))
    }
}
