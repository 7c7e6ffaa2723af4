//! # Stowage
//!
//! Uniform storage and caching adapters for AI agent runtimes.
//!
//! Stowage gives four in-memory stores the same lifecycle, error handling and
//! instrumentation so that the surrounding application can treat them alike.
//!
//! ## Stores
//!
//! - [`TtlCache`]: key/value cache with per-entry expiry and an LRU entry bound
//! - [`MemoryStore`]: non-expiring key/value store partitioned by namespace
//! - [`VectorIndex`]: fixed-dimension embedding index with cosine search
//! - [`AttachmentCache`]: file content cache validated by modification time
//!
//! Every public operation runs through the [`storage::OperationWrapper`],
//! which emits one structured log event and one set of metrics per call and
//! normalizes failures into [`Error`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use stowage::{StorageConfig, Stores};
//!
//! let stores = Stores::from_config(&StorageConfig::load_default())?;
//! stores.initialize_all()?;
//!
//! stores.ttl().set("session", serde_json::json!({"user": "abc"}))?;
//! let hits = stores.vectors().search(&query_embedding, 5)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub mod config;
pub mod observability;
pub mod storage;

pub use config::StorageConfig;
pub use storage::{
    AttachmentCache, AttachmentRequest, Clock, FileSystem, ManualClock, MemoryStore,
    OperationWrapper, SearchOptions, StorageAdapter, Stores, SystemClock, TokioFileSystem,
    TtlCache, VectorDocument, VectorIndex, VectorSearchResult,
};

/// Error type for stowage operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotInitialized` | A store is used before `initialize()` or after `close()` |
/// | `InvalidInput` | Vector documents or queries with a bad shape, invalid regex, invalid config |
/// | `NotFound` | Updating a vector document that does not exist |
/// | `Io` | Stat or read of an attachment file fails |
/// | `OperationFailed` | Any other failure inside a wrapped operation |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The store has not been initialized.
    #[error("store '{store}' is not initialized (operation '{operation}')")]
    NotInitialized {
        /// The store that rejected the call.
        store: &'static str,
        /// The operation that was attempted.
        operation: String,
    },

    /// Invalid input was provided.
    ///
    /// Raised before any state is mutated, so a rejected write leaves the
    /// store unchanged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The addressed record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of record was looked up.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A filesystem call failed.
    #[error("operation '{operation}' failed on {}: {cause}", path.display())]
    Io {
        /// The operation that failed.
        operation: String,
        /// The file involved.
        path: PathBuf,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns the name of the operation that produced this error, if known.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::NotInitialized { operation, .. }
            | Self::Io { operation, .. }
            | Self::OperationFailed { operation, .. } => Some(operation),
            Self::InvalidInput(_) | Self::NotFound { .. } => None,
        }
    }

    /// Returns true for errors the caller can fix by correcting its input.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound { .. })
    }
}

/// Result type alias for stowage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
