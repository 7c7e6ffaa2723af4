//! Namespaced in-memory key/value store.
//!
//! Values live for the lifetime of the process and never expire. Keys are
//! partitioned by a namespace string; operations that take no namespace use
//! [`DEFAULT_NAMESPACE`].

use crate::storage::operation::OperationWrapper;
use crate::storage::traits::{InitFlag, StorageAdapter};
use crate::{Error, Result};
use regex::RegexBuilder;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const STORE_NAME: &str = "memory_store";

/// Namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Pattern options for [`MemoryStore::search_by_value`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Treat the pattern as a regular expression instead of a literal.
    pub regex: bool,
    /// Match case exactly.
    pub case_sensitive: bool,
}

impl SearchOptions {
    /// Literal, case-insensitive matching.
    #[must_use]
    pub const fn literal() -> Self {
        Self {
            regex: false,
            case_sensitive: false,
        }
    }

    /// Regular-expression, case-insensitive matching.
    #[must_use]
    pub const fn regex() -> Self {
        Self {
            regex: true,
            case_sensitive: false,
        }
    }

    /// Sets case sensitivity.
    #[must_use]
    pub const fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

type Namespaces<V> = HashMap<String, HashMap<String, V>>;

/// Process-lifetime key/value store partitioned by namespace.
///
/// # Example
///
/// ```rust
/// use stowage::{MemoryStore, SearchOptions, StorageAdapter};
///
/// let store: MemoryStore<String> = MemoryStore::new();
/// store.initialize()?;
/// store.set_in("greeting", "Hello World".to_string(), "notes")?;
///
/// let hits = store.search_by_value("hello", "notes", SearchOptions::default())?;
/// assert_eq!(hits.len(), 1);
/// # Ok::<(), stowage::Error>(())
/// ```
pub struct MemoryStore<V> {
    namespaces: Mutex<Namespaces<V>>,
    init: InitFlag,
    ops: OperationWrapper,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
            init: InitFlag::default(),
            ops: OperationWrapper::new(STORE_NAME),
        }
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    /// Creates an empty, uninitialized store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Namespaces<V>> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidInput("key must not be empty".to_string()));
        }
        Ok(())
    }

    fn insert(&self, key: &str, value: V, namespace: &str) -> Result<()> {
        Self::validate_key(key)?;
        self.lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn lookup(&self, key: &str, namespace: &str) -> Option<V> {
        self.lock()
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Returns the value under `key` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn get_in(&self, key: &str, namespace: &str) -> Result<Option<V>> {
        self.ops.execute("get", || {
            self.init.check(STORE_NAME, "get")?;
            Ok(self.lookup(key, namespace))
        })
    }

    /// Stores `value` under `key` in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`, or
    /// [`Error::InvalidInput`] for an empty key.
    pub fn set_in(&self, key: &str, value: V, namespace: &str) -> Result<()> {
        self.ops.execute("set", || {
            self.init.check(STORE_NAME, "set")?;
            self.insert(key, value, namespace)?;
            Ok(())
        })
    }

    /// Removes `key` from `namespace`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn delete_in(&self, key: &str, namespace: &str) -> Result<bool> {
        self.ops.execute("delete", || {
            self.init.check(STORE_NAME, "delete")?;
            let mut namespaces = self.lock();
            let Some(entries) = namespaces.get_mut(namespace) else {
                return Ok(false);
            };
            let removed = entries.remove(key).is_some();
            if entries.is_empty() {
                namespaces.remove(namespace);
            }
            Ok(removed)
        })
    }

    /// Lists keys in `namespace`, or in every namespace when `None`.
    ///
    /// Keys are returned sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn keys_in(&self, namespace: Option<&str>) -> Result<Vec<String>> {
        self.ops.execute("keys", || {
            self.init.check(STORE_NAME, "keys")?;
            let namespaces = self.lock();
            let mut keys: Vec<String> = match namespace {
                Some(ns) => namespaces
                    .get(ns)
                    .map(|entries| entries.keys().cloned().collect())
                    .unwrap_or_default(),
                None => namespaces
                    .values()
                    .flat_map(|entries| entries.keys().cloned())
                    .collect(),
            };
            drop(namespaces);
            keys.sort();
            Ok(keys)
        })
    }

    /// Clears `namespace`, or the whole store when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn clear_in(&self, namespace: Option<&str>) -> Result<()> {
        self.ops.execute("clear", || {
            self.init.check(STORE_NAME, "clear")?;
            let mut namespaces = self.lock();
            match namespace {
                Some(ns) => {
                    namespaces.remove(ns);
                },
                None => namespaces.clear(),
            }
            Ok(())
        })
    }

    /// Lists namespaces that hold at least one key, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn namespaces(&self) -> Result<Vec<String>> {
        self.ops.execute("namespaces", || {
            self.init.check(STORE_NAME, "namespaces")?;
            let mut names: Vec<String> = self
                .lock()
                .iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            Ok(names)
        })
    }

    /// Stores each pair in `namespace`.
    ///
    /// Entries are applied independently: the result is aligned with the
    /// input and a rejected entry does not undo the others.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn set_batch<I>(&self, items: I, namespace: &str) -> Result<Vec<Result<()>>>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        self.ops.execute("set_batch", || {
            self.init.check(STORE_NAME, "set_batch")?;
            let results: Vec<Result<()>> = items
                .into_iter()
                .map(|(key, value)| self.insert(&key, value, namespace))
                .collect();
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                tracing::warn!(store = STORE_NAME, namespace, failed, "Batch write partially rejected");
            }
            Ok(results)
        })
    }

    /// Reads each key from `namespace`; the result is aligned with `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`.
    pub fn get_batch(&self, keys: &[&str], namespace: &str) -> Result<Vec<Option<V>>> {
        self.ops.execute("get_batch", || {
            self.init.check(STORE_NAME, "get_batch")?;
            let namespaces = self.lock();
            let entries = namespaces.get(namespace);
            Ok(keys
                .iter()
                .map(|key| entries.and_then(|e| e.get(*key)).cloned())
                .collect())
        })
    }
}

impl<V> MemoryStore<V>
where
    V: Clone + Serialize + Send + Sync,
{
    /// Returns `(key, value)` pairs in `namespace` whose JSON form matches
    /// `pattern`, sorted by key.
    ///
    /// Every value is serialized on each call; there is no index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize`,
    /// [`Error::InvalidInput`] for an invalid regular expression, or
    /// [`Error::OperationFailed`] if a value cannot be serialized.
    pub fn search_by_value(
        &self,
        pattern: &str,
        namespace: &str,
        options: SearchOptions,
    ) -> Result<Vec<(String, V)>> {
        self.ops.execute("search_by_value", || {
            self.init.check(STORE_NAME, "search_by_value")?;
            let source = if options.regex {
                pattern.to_string()
            } else {
                regex::escape(pattern)
            };
            let matcher = RegexBuilder::new(&source)
                .case_insensitive(!options.case_sensitive)
                .build()
                .map_err(|e| Error::InvalidInput(format!("invalid search pattern: {e}")))?;

            let namespaces = self.lock();
            let Some(entries) = namespaces.get(namespace) else {
                return Ok(Vec::new());
            };
            let mut matches = Vec::new();
            for (key, value) in entries {
                let text = serde_json::to_string(value)?;
                if matcher.is_match(&text) {
                    matches.push((key.clone(), value.clone()));
                }
            }
            drop(namespaces);

            matches.sort_by(|a, b| a.0.cmp(&b.0));
            tracing::debug!(store = STORE_NAME, namespace, matches = matches.len(), "Value search complete");
            Ok(matches)
        })
    }
}

impl<V> StorageAdapter for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    type Value = V;

    fn name(&self) -> &'static str {
        STORE_NAME
    }

    fn initialize(&self) -> Result<()> {
        self.ops.execute("initialize", || {
            if !self.init.set(true) {
                tracing::info!(store = STORE_NAME, "Store initialized");
            }
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        self.ops.execute("close", || {
            if self.init.set(false) {
                self.lock().clear();
                tracing::info!(store = STORE_NAME, "Store closed");
            }
            Ok(())
        })
    }

    fn is_initialized(&self) -> bool {
        self.init.get()
    }

    fn get(&self, key: &str) -> Result<Option<V>> {
        self.get_in(key, DEFAULT_NAMESPACE)
    }

    fn set(&self, key: &str, value: V) -> Result<()> {
        self.set_in(key, value, DEFAULT_NAMESPACE)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.delete_in(key, DEFAULT_NAMESPACE)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.ops.execute("exists", || {
            self.init.check(STORE_NAME, "exists")?;
            Ok(self.lookup(key, DEFAULT_NAMESPACE).is_some())
        })
    }

    /// Lists keys across every namespace.
    fn keys(&self) -> Result<Vec<String>> {
        self.keys_in(None)
    }

    fn size(&self) -> Result<usize> {
        self.ops.execute("size", || {
            self.init.check(STORE_NAME, "size")?;
            Ok(self.lock().values().map(HashMap::len).sum())
        })
    }

    fn clear(&self) -> Result<()> {
        self.clear_in(None)
    }
}

impl<V> std::fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("initialized", &self.init.get())
            .finish_non_exhaustive()
    }
}
