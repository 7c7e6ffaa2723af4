//! Vector similarity index.
//!
//! Stores documents with fixed-dimension embeddings and answers
//! nearest-neighbor queries by cosine similarity.
//!
//! Every query scans all stored documents (brute-force O(n)). This suits
//! the working-set sizes of attachments and snippets; it is not an
//! approximate-nearest-neighbor index.
//!
//! # Validation
//!
//! Writes are validated before any state changes, so a rejected write never
//! alters the index. A document is valid when:
//!
//! - `id` and `content` are non-empty
//! - `embedding` has exactly `vector_dimensions` finite components
//! - `metadata` is a JSON object

use crate::config::StorageConfig;
use crate::storage::operation::OperationWrapper;
use crate::storage::traits::{InitFlag, StorageAdapter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const STORE_NAME: &str = "vector_index";

/// Result count used when callers have no preference.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// A document with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Unique document ID.
    pub id: String,
    /// Text the embedding was computed from.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Arbitrary metadata; must be a JSON object.
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl VectorDocument {
    /// Creates a document with empty metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: empty_object(),
        }
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn matches(&self, filters: &Map<String, Value>) -> bool {
        filters.iter().all(|(key, expected)| {
            let Some(actual) = self.metadata.get(key) else {
                return false;
            };
            match expected {
                Value::Array(allowed) => allowed.contains(actual),
                _ => actual == expected,
            }
        })
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    /// The matching document.
    pub document: VectorDocument,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// `1 - score`, in `[0, 2]`.
    pub distance: f32,
}

/// Index occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorIndexStats {
    /// Stored documents.
    pub documents: usize,
    /// Configured embedding dimensions.
    pub dimensions: usize,
}

/// Computes cosine similarity between two vectors.
///
/// Returns `0.0` when either vector has zero magnitude or the lengths
/// differ.
///
/// ```rust
/// use stowage::storage::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
/// assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
/// ```
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

#[derive(Debug)]
struct Slot {
    /// Insertion sequence; breaks ranking ties.
    seq: u64,
    document: VectorDocument,
}

#[derive(Debug, Default)]
struct IndexState {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl IndexState {
    /// Inserts or replaces, keeping the original slot of a replaced ID.
    fn upsert(&mut self, document: VectorDocument) {
        if let Some(slot) = self.slots.get_mut(&document.id) {
            slot.document = document;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(document.id.clone(), Slot { seq, document });
    }

    /// Slots in insertion order.
    fn ordered(&self) -> Vec<&Slot> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots
    }
}

/// In-memory vector index with brute-force cosine search.
///
/// # Example
///
/// ```rust
/// use stowage::{StorageAdapter, StorageConfig, VectorDocument, VectorIndex};
///
/// let config = StorageConfig::default().with_vector_dimensions(3);
/// let index = VectorIndex::new(&config);
/// index.initialize()?;
/// index.add(VectorDocument::new("a", "alpha", vec![1.0, 0.0, 0.0]))?;
///
/// let hits = index.search(&[1.0, 0.0, 0.0], 5)?;
/// assert_eq!(hits[0].document.id, "a");
/// # Ok::<(), stowage::Error>(())
/// ```
pub struct VectorIndex {
    state: Mutex<IndexState>,
    dimensions: usize,
    init: InitFlag,
    ops: OperationWrapper,
}

impl VectorIndex {
    /// Creates an empty index for `config.vector_dimensions`.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            state: Mutex::new(IndexState::default()),
            dimensions: config.vector_dimensions,
            init: InitFlag::default(),
            ops: OperationWrapper::new(STORE_NAME),
        }
    }

    /// Configured embedding dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates embedding dimensions and values.
    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(Error::InvalidInput(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        // NaN would outrank every finite score.
        if embedding.iter().any(|v| v.is_nan() || v.is_infinite()) {
            return Err(Error::InvalidInput(
                "Embedding contains NaN or Infinity values".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_document(&self, document: &VectorDocument) -> Result<()> {
        if document.id.is_empty() {
            return Err(Error::InvalidInput("document id must not be empty".to_string()));
        }
        if document.content.is_empty() {
            return Err(Error::InvalidInput(format!(
                "document '{}' has empty content",
                document.id
            )));
        }
        self.validate_embedding(&document.embedding)
            .map_err(|e| Error::InvalidInput(format!("document '{}': {e}", document.id)))?;
        if !document.metadata.is_object() {
            return Err(Error::InvalidInput(format!(
                "document '{}' metadata must be an object",
                document.id
            )));
        }
        Ok(())
    }

    /// Adds a document, replacing any document with the same ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`, or
    /// [`Error::InvalidInput`] if the document is invalid.
    pub fn add(&self, document: VectorDocument) -> Result<()> {
        self.ops.execute("add", || {
            self.init.check(STORE_NAME, "add")?;
            self.validate_document(&document)?;
            self.lock().upsert(document);
            Ok(())
        })
    }

    /// Adds every document, or none if any is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`, or
    /// [`Error::InvalidInput`] naming the first invalid document.
    pub fn add_batch(&self, documents: Vec<VectorDocument>) -> Result<usize> {
        self.ops.execute("add_batch", || {
            self.init.check(STORE_NAME, "add_batch")?;
            for document in &documents {
                self.validate_document(document)?;
            }
            let count = documents.len();
            let mut state = self.lock();
            for document in documents {
                state.upsert(document);
            }
            drop(state);
            tracing::debug!(store = STORE_NAME, count, "Batch added");
            Ok(count)
        })
    }

    /// Returns up to `limit` documents ranked by similarity to `query`.
    ///
    /// Ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`, or
    /// [`Error::InvalidInput`] if `query` has the wrong dimensions.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorSearchResult>> {
        self.ops.execute("search", || {
            self.init.check(STORE_NAME, "search")?;
            self.validate_embedding(query)?;
            Ok(self.rank(query, None, limit))
        })
    }

    /// Like [`search`](Self::search) over documents whose metadata matches
    /// every filter.
    ///
    /// A filter matches when the metadata value equals it, or, for an array
    /// filter, when the metadata value is one of its elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`, or
    /// [`Error::InvalidInput`] if `query` has the wrong dimensions.
    pub fn search_with_filters(
        &self,
        query: &[f32],
        filters: &Map<String, Value>,
        limit: usize,
    ) -> Result<Vec<VectorSearchResult>> {
        self.ops.execute("search_with_filters", || {
            self.init.check(STORE_NAME, "search_with_filters")?;
            self.validate_embedding(query)?;
            Ok(self.rank(query, Some(filters), limit))
        })
    }

    fn rank(
        &self,
        query: &[f32],
        filters: Option<&Map<String, Value>>,
        limit: usize,
    ) -> Vec<VectorSearchResult> {
        let state = self.lock();
        let mut scored: Vec<(u64, f32, &VectorDocument)> = state
            .slots
            .values()
            .filter(|slot| filters.is_none_or(|f| slot.document.matches(f)))
            .map(|slot| {
                let score = cosine_similarity(query, &slot.document.embedding);
                (slot.seq, score, &slot.document)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored
            .into_iter()
            .take(limit)
            .map(|(_, score, document)| VectorSearchResult {
                document: document.clone(),
                score,
                distance: 1.0 - score,
            })
            .collect()
    }

    /// Returns every document whose metadata matches `filters`, in insertion
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn get_by_metadata(&self, filters: &Map<String, Value>) -> Result<Vec<VectorDocument>> {
        self.ops.execute("get_by_metadata", || {
            self.init.check(STORE_NAME, "get_by_metadata")?;
            Ok(self
                .lock()
                .ordered()
                .into_iter()
                .filter(|slot| slot.document.matches(filters))
                .map(|slot| slot.document.clone())
                .collect())
        })
    }

    /// Returns the document with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn get_document(&self, id: &str) -> Result<Option<VectorDocument>> {
        self.ops.execute("get_document", || {
            self.init.check(STORE_NAME, "get_document")?;
            Ok(self.lock().slots.get(id).map(|slot| slot.document.clone()))
        })
    }

    /// Replaces an existing document. The stored ID is always `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`,
    /// [`Error::NotFound`] if `id` is absent, or [`Error::InvalidInput`] if
    /// the replacement is invalid.
    pub fn update(&self, id: &str, mut document: VectorDocument) -> Result<()> {
        self.ops.execute("update", || {
            self.init.check(STORE_NAME, "update")?;
            id.clone_into(&mut document.id);
            self.validate_document(&document)?;
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(id) else {
                return Err(not_found(id).into());
            };
            slot.document = document;
            Ok(())
        })
    }

    /// Merges `partial` into a document's metadata.
    ///
    /// Keys in `partial` overwrite existing keys; content and embedding are
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`,
    /// [`Error::InvalidInput`] if `partial` is not an object, or
    /// [`Error::NotFound`] if `id` is absent.
    pub fn update_metadata(&self, id: &str, partial: Value) -> Result<()> {
        self.ops.execute("update_metadata", || {
            self.init.check(STORE_NAME, "update_metadata")?;
            let Value::Object(fields) = partial else {
                return Err(Error::InvalidInput("metadata update must be an object".to_string()).into());
            };
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(id) else {
                return Err(not_found(id).into());
            };
            if let Value::Object(existing) = &mut slot.document.metadata {
                existing.extend(fields);
            } else {
                slot.document.metadata = Value::Object(fields);
            }
            Ok(())
        })
    }

    /// Removes a document, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        self.ops.execute("delete_document", || {
            self.init.check(STORE_NAME, "delete_document")?;
            Ok(self.lock().slots.remove(id).is_some())
        })
    }

    /// Returns occupancy counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn stats(&self) -> Result<VectorIndexStats> {
        self.ops.execute("stats", || {
            self.init.check(STORE_NAME, "stats")?;
            Ok(VectorIndexStats {
                documents: self.lock().slots.len(),
                dimensions: self.dimensions,
            })
        })
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound {
        kind: "vector document",
        id: id.to_string(),
    }
}

impl StorageAdapter for VectorIndex {
    type Value = VectorDocument;

    fn name(&self) -> &'static str {
        STORE_NAME
    }

    fn initialize(&self) -> Result<()> {
        self.ops.execute("initialize", || {
            if !self.init.set(true) {
                tracing::info!(store = STORE_NAME, dimensions = self.dimensions, "Store initialized");
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        self.ops.execute("close", || {
            if self.init.set(false) {
                *self.lock() = IndexState::default();
                tracing::info!(store = STORE_NAME, "Store closed");
            }
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.init.get()
    }

    fn get(&self, key: &str) -> Result<Option<VectorDocument>> {
        self.get_document(key)
    }

    /// Adds `value` under `key`; the document ID is set to `key`.
    fn set(&self, key: &str, mut value: VectorDocument) -> Result<()> {
        key.clone_into(&mut value.id);
        self.add(value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.delete_document(key)
    }

    /// Document IDs in insertion order.
    fn keys(&self) -> Result<Vec<String>> {
        self.ops.execute("keys", || {
            self.init.check(STORE_NAME, "keys")?;
            Ok(self
                .lock()
                .ordered()
                .into_iter()
                .map(|slot| slot.document.id.clone())
                .collect())
        })
    }

    fn size(&self) -> Result<usize> {
        self.ops.execute("size", || {
            self.init.check(STORE_NAME, "size")?;
            Ok(self.lock().slots.len())
        })
    }

    fn clear(&self) -> Result<()> {
        self.ops.execute("clear", || {
            self.init.check(STORE_NAME, "clear")?;
            self.lock().slots.clear();
            Ok(())
        })
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.dimensions)
            .field("initialized", &self.init.get())
            .finish_non_exhaustive()
    }
}
