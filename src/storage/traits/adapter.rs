//! Storage adapter trait.
//!
//! The common contract shared by the TTL cache, the namespaced memory store
//! and the vector index.
//!
//! # Lifecycle
//!
//! ```text
//! +---------------+   initialize()   +-------------+
//! | Uninitialized | ---------------> | Initialized |
//! +---------------+ <--------------- +-------------+
//!                       close()
//! ```
//!
//! Every data operation on an uninitialized adapter fails with
//! [`Error::NotInitialized`](crate::Error::NotInitialized). `initialize` and
//! `close` are idempotent; `close` drops all entries.

use crate::Result;

/// Uniform key/value contract over heterogeneous stores.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc`
/// - Use interior mutability (`Mutex`) for mutable state
/// - Run every data operation through an
///   [`OperationWrapper`](crate::storage::OperationWrapper)
pub trait StorageAdapter: Send + Sync {
    /// The value type stored under each key.
    type Value;

    /// Store label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Prepares the store for use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be prepared.
    fn initialize(&self) -> Result<()>;

    /// Releases all entries and returns the store to the uninitialized state.
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown work fails.
    fn close(&self) -> Result<()>;

    /// Whether `initialize` has completed and `close` has not been called.
    fn is_initialized(&self) -> bool;

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn get(&self, key: &str) -> Result<Option<Self::Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or rejects the value.
    fn set(&self, key: &str, value: Self::Value) -> Result<()>;

    /// Removes `key`, returning whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Checks whether `key` holds a live value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Lists all live keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn keys(&self) -> Result<Vec<String>>;

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn size(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized.
    fn clear(&self) -> Result<()>;
}

/// Initialization flag shared by adapter implementations.
#[derive(Debug, Default)]
pub(crate) struct InitFlag(std::sync::atomic::AtomicBool);

impl InitFlag {
    pub(crate) fn set(&self, value: bool) -> bool {
        self.0.swap(value, std::sync::atomic::Ordering::SeqCst)
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Fails with `NotInitialized` unless the flag is set.
    pub(crate) fn check(&self, store: &'static str, operation: &str) -> Result<()> {
        if self.get() {
            Ok(())
        } else {
            Err(crate::Error::NotInitialized {
                store,
                operation: operation.to_string(),
            })
        }
    }
}
