//! File attachment cache.
//!
//! Caches file contents keyed by path so that unchanged files are not re-read
//! from disk. A cached entry is served only while the file's current
//! modification time equals the one recorded when it was cached, so callers
//! never observe stale content.
//!
//! # Admission and eviction
//!
//! Entries are bounded by total bytes, not count:
//!
//! 1. Content larger than `max_file_size` (or than `max_cache_size`) is
//!    returned but never cached
//! 2. While the new entry would push the total over `max_cache_size`, the
//!    least-recently-used entry is evicted
//! 3. The entry is inserted as most-recently-used
//!
//! Hits also promote the entry. After any sequence of operations the sum of
//! cached entry sizes is at most `max_cache_size`.
//!
//! Concurrent misses on the same path are not deduplicated: each reads the
//! file and the last admission wins.

use crate::config::StorageConfig;
use crate::storage::operation::OperationWrapper;
use crate::{Error, Result};
use futures::future::join_all;
use lru::LruCache;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

const STORE_NAME: &str = "attachment_cache";

/// Filesystem capability used by the attachment cache.
pub trait FileSystem: Send + Sync {
    /// Returns the file's last modification time.
    fn modified(&self, path: &Path) -> impl Future<Output = io::Result<SystemTime>> + Send;

    /// Reads the whole file as UTF-8.
    fn read_to_string(&self, path: &Path) -> impl Future<Output = io::Result<String>> + Send;
}

/// [`FileSystem`] backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl FileSystem for TokioFileSystem {
    async fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        tokio::fs::metadata(path).await?.modified()
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// A file to render as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRequest {
    /// Path to read.
    pub path: PathBuf,
    /// Path shown in the rendered attachment.
    pub relative_path: String,
}

impl AttachmentRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, relative_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            relative_path: relative_path.into(),
        }
    }
}

/// Attachment cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentCacheStats {
    /// Cached files.
    pub entries: usize,
    /// Sum of cached content sizes in bytes.
    pub total_bytes: u64,
    /// Configured byte budget.
    pub max_bytes: u64,
}

#[derive(Debug)]
struct FileCacheEntry {
    content: String,
    size: u64,
    modified: SystemTime,
}

#[derive(Debug)]
struct CacheState {
    entries: LruCache<PathBuf, FileCacheEntry>,
    current_size: u64,
}

impl CacheState {
    fn remove(&mut self, path: &Path) -> bool {
        match self.entries.pop(path) {
            Some(entry) => {
                self.current_size -= entry.size;
                true
            },
            None => false,
        }
    }
}

/// Returns the text served in place of an unreadable file.
#[must_use]
pub fn read_error_placeholder(path: &Path) -> String {
    format!("[Error reading file: {}]", path.display())
}

/// Wraps file content in the attachment template.
#[must_use]
pub fn format_attachment(relative_path: &str, content: &str) -> String {
    format!("<attachment path=\"{relative_path}\">\n{content}\n</attachment>")
}

/// Path-keyed file content cache with mtime validation and a byte budget.
///
/// # Example
///
/// ```rust,no_run
/// use stowage::{AttachmentCache, AttachmentRequest, StorageConfig};
///
/// # async fn run() {
/// let cache = AttachmentCache::new(&StorageConfig::default());
/// let rendered = cache
///     .read_attachments(&[AttachmentRequest::new("/repo/src/lib.rs", "src/lib.rs")])
///     .await;
/// println!("{}", rendered[0]);
/// # }
/// ```
pub struct AttachmentCache<F = TokioFileSystem> {
    fs: F,
    state: Mutex<CacheState>,
    max_file_size: u64,
    max_cache_size: u64,
    ops: OperationWrapper,
}

impl AttachmentCache<TokioFileSystem> {
    /// Creates a cache reading from the local filesystem.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_file_system(config, TokioFileSystem)
    }
}

impl<F: FileSystem> AttachmentCache<F> {
    /// Creates a cache reading through `fs`.
    #[must_use]
    pub fn with_file_system(config: &StorageConfig, fs: F) -> Self {
        Self {
            fs,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
            max_file_size: config.max_file_size,
            max_cache_size: config.max_cache_size,
            ops: OperationWrapper::new(STORE_NAME),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the file's content, or a placeholder if it cannot be read.
    ///
    /// Never fails: a missing attachment degrades the caller's output
    /// instead of aborting it.
    pub async fn read_file(&self, path: &Path) -> String {
        match self.try_read_file(path).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Serving placeholder for unreadable attachment");
                read_error_placeholder(path)
            },
        }
    }

    /// Returns the file's content, serving it from cache when unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub async fn try_read_file(&self, path: &Path) -> Result<String> {
        self.ops
            .execute_async("read_file", async {
                let modified = match self.fs.modified(path).await {
                    Ok(modified) => Some(modified),
                    Err(err) => {
                        if self.lock().remove(path) {
                            tracing::debug!(path = %path.display(), error = %err, "Invalidated entry for unreadable file");
                        }
                        None
                    },
                };

                if let Some(content) = modified.and_then(|m| self.lookup(path, m)) {
                    metrics::counter!("cache_hits_total", "store" => STORE_NAME).increment(1);
                    return Ok(content);
                }
                metrics::counter!("cache_misses_total", "store" => STORE_NAME).increment(1);

                let content = self
                    .fs
                    .read_to_string(path)
                    .await
                    .map_err(|e| io_error("read", path, &e))?;
                if let Some(modified) = modified {
                    self.admit(path, &content, modified);
                }
                Ok::<_, anyhow::Error>(content)
            })
            .await
    }

    /// Returns cached content if its recorded mtime matches, promoting it.
    /// A mismatched entry is dropped.
    fn lookup(&self, path: &Path, modified: SystemTime) -> Option<String> {
        let mut state = self.lock();
        let valid = state.entries.peek(path).map(|entry| entry.modified == modified)?;
        if valid {
            state.entries.get(path).map(|entry| entry.content.clone())
        } else {
            state.remove(path);
            tracing::debug!(path = %path.display(), "Modification time changed, re-reading");
            None
        }
    }

    fn admit(&self, path: &Path, content: &str, modified: SystemTime) {
        let size = content.len() as u64;
        if size > self.max_file_size || size > self.max_cache_size {
            tracing::debug!(
                path = %path.display(),
                size,
                max_file_size = self.max_file_size,
                "File too large to cache"
            );
            return;
        }

        let mut state = self.lock();
        state.remove(path);
        while state.current_size + size > self.max_cache_size {
            let Some((evicted, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.current_size -= entry.size;
            tracing::debug!(path = %evicted.display(), size = entry.size, "Evicted least-recently-used file");
            metrics::counter!("cache_evictions_total", "store" => STORE_NAME).increment(1);
        }
        state.entries.put(
            path.to_path_buf(),
            FileCacheEntry {
                content: content.to_string(),
                size,
                modified,
            },
        );
        state.current_size += size;
    }

    /// Reads every request concurrently and renders each as an attachment.
    ///
    /// Output order matches `requests`. An unreadable file renders its
    /// placeholder without affecting the others.
    pub async fn read_attachments(&self, requests: &[AttachmentRequest]) -> Vec<String> {
        let reads = requests.iter().map(|request| async move {
            let content = self.read_file(&request.path).await;
            format_attachment(&request.relative_path, &content)
        });
        join_all(reads).await
    }

    /// Drops the cached entry for `path`, returning whether one existed.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.lock().remove(path)
    }

    /// Drops every cached entry.
    pub fn clear_cache(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.current_size = 0;
    }

    /// Returns occupancy counters.
    #[must_use]
    pub fn cache_stats(&self) -> AttachmentCacheStats {
        let state = self.lock();
        AttachmentCacheStats {
            entries: state.entries.len(),
            total_bytes: state.current_size,
            max_bytes: self.max_cache_size,
        }
    }
}

impl<F> std::fmt::Debug for AttachmentCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentCache")
            .field("max_file_size", &self.max_file_size)
            .field("max_cache_size", &self.max_cache_size)
            .finish_non_exhaustive()
    }
}

fn io_error(operation: &str, path: &Path, err: &io::Error) -> Error {
    Error::Io {
        operation: operation.to_string(),
        path: path.to_path_buf(),
        cause: err.to_string(),
    }
}
