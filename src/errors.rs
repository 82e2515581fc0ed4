//! Unified error type for the record store and its callers.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The backing file exists but does not hold valid serialized data.
    #[error("Collection '{collection}' is corrupt{}: {reason}", .offset.map(|o| format!(" at byte {o}")).unwrap_or_default())]
    CorruptCollection {
        collection: String,
        offset: Option<usize>,
        reason: String,
    },

    /// A durable write did not complete. The target file was not replaced.
    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file could not be read for a reason other than absence.
    #[error("Collection '{collection}' is unavailable: {source}")]
    StoreUnavailable {
        collection: String,
        #[source]
        source: std::io::Error,
    },

    /// On-disk content matches none of the shapes declared for the collection.
    #[error("Collection '{collection}' matches none of the declared shapes ({})", .tried.join(", "))]
    UnsupportedShape {
        collection: String,
        tried: Vec<String>,
    },

    #[error("Revision conflict on '{collection}': expected {expected}, found {actual}")]
    RevisionConflict {
        collection: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid key path {path:?} for collection '{collection}': {reason}")]
    InvalidKeyPath {
        collection: String,
        path: Vec<String>,
        reason: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A caller passed a value the store or a command cannot accept.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Collections that could not be loaded by the store check.
    #[error("{} collection(s) failed to load: {}", .collections.len(), .collections.join(", "))]
    LoadFailed { collections: Vec<String> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A mutation task panicked or was aborted by the runtime.
    #[error("Store task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Insufficient funds: have {current:.2}, need {required:.2}")]
    InsufficientFunds { current: f64, required: f64 },

    #[error("Item '{name}' not found")]
    ItemNotFound { name: String },

    #[error("Not enough '{name}': have {have}, need {requested}")]
    InsufficientQuantity {
        name: String,
        have: u64,
        requested: u64,
    },
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
