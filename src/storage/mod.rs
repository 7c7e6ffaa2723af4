//! Storage layer.
//!
//! Four in-memory stores behind one lifecycle and one instrumentation path:
//! - **TTL cache**: volatile key/value entries with expiry
//! - **Memory store**: non-expiring, namespaced key/value entries
//! - **Vector index**: embeddings with cosine similarity search
//! - **Attachment cache**: file contents validated by modification time
//!
//! [`Stores`] is the composition root that builds one of each from a
//! [`StorageConfig`].

// Allow significant_drop_tightening - guards are scoped to one operation.
#![allow(clippy::significant_drop_tightening)]
// Allow cast precision loss for similarity scores.
#![allow(clippy::cast_precision_loss)]

pub mod attachment_cache;
pub mod clock;
pub mod memory_store;
pub mod operation;
pub mod traits;
pub mod ttl_cache;
pub mod vector_index;

pub use attachment_cache::{
    AttachmentCache, AttachmentCacheStats, AttachmentRequest, FileSystem, TokioFileSystem,
    format_attachment, read_error_placeholder,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory_store::{DEFAULT_NAMESPACE, MemoryStore, SearchOptions};
pub use operation::{OperationWrapper, normalize};
pub use traits::StorageAdapter;
pub use ttl_cache::{TtlCache, TtlCacheStats};
pub use vector_index::{
    DEFAULT_SEARCH_LIMIT, VectorDocument, VectorIndex, VectorIndexStats, VectorSearchResult,
    cosine_similarity,
};

use crate::Result;
use crate::config::StorageConfig;
use serde_json::Value;
use std::sync::Arc;

/// One instance of every store, built from a single configuration.
///
/// Construct once at startup and share the stores with consumers; there are
/// no process-wide default instances.
#[derive(Debug)]
pub struct Stores {
    ttl: TtlCache<Value>,
    memory: MemoryStore<Value>,
    vectors: VectorIndex,
    attachments: AttachmentCache,
}

impl Stores {
    /// Builds every store using the system clock and local filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`](crate::Error::InvalidInput) if the
    /// configuration is invalid.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds every store, reading TTL time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`](crate::Error::InvalidInput) if the
    /// configuration is invalid.
    pub fn with_clock(config: &StorageConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ttl: TtlCache::with_clock(config, clock),
            memory: MemoryStore::new(),
            vectors: VectorIndex::new(config),
            attachments: AttachmentCache::new(config),
        })
    }

    /// Initializes the TTL cache, memory store and vector index.
    ///
    /// # Errors
    ///
    /// Returns the first store's initialization failure.
    pub fn initialize_all(&self) -> Result<()> {
        self.ttl.initialize()?;
        self.memory.initialize()?;
        self.vectors.initialize()?;
        tracing::info!("All stores initialized");
        Ok(())
    }

    /// Closes every store and empties the attachment cache.
    ///
    /// Every store is closed even if an earlier one fails; the first failure
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns the first store's close failure.
    pub fn close_all(&self) -> Result<()> {
        let results = [self.ttl.close(), self.memory.close(), self.vectors.close()];
        self.attachments.clear_cache();
        tracing::info!("All stores closed");
        results.into_iter().collect()
    }

    /// Returns the TTL cache.
    #[must_use]
    pub const fn ttl(&self) -> &TtlCache<Value> {
        &self.ttl
    }

    /// Returns the memory store.
    #[must_use]
    pub const fn memory(&self) -> &MemoryStore<Value> {
        &self.memory
    }

    /// Returns the vector index.
    #[must_use]
    pub const fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// Returns the attachment cache.
    #[must_use]
    pub const fn attachments(&self) -> &AttachmentCache {
        &self.attachments
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stores_lifecycle() {
        let stores = Stores::from_config(&StorageConfig::default().with_vector_dimensions(2))
            .expect("build failed");
        assert!(stores.ttl().get("k").is_err());

        stores.initialize_all().expect("initialize failed");
        stores.ttl().set("k", json!(1)).expect("set failed");
        stores.memory().set("k", json!(2)).expect("set failed");
        stores
            .vectors()
            .add(VectorDocument::new("d", "doc", vec![1.0, 0.0]))
            .expect("add failed");

        stores.close_all().expect("close failed");
        assert!(!stores.ttl().is_initialized());
        assert!(!stores.memory().is_initialized());
        assert!(!stores.vectors().is_initialized());
        assert_eq!(stores.attachments().cache_stats().entries, 0);
    }

    #[test]
    fn test_stores_reject_invalid_config() {
        let config = StorageConfig::default().with_vector_dimensions(0);
        assert!(Stores::from_config(&config).is_err());
    }
}
