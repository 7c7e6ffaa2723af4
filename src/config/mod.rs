//! Configuration management.
//!
//! [`StorageConfig`] is built once by the application and handed to each
//! store, which keeps a read-only copy.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default time-to-live for TTL cache entries, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default maximum number of live TTL cache entries.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 10_000;

/// Default byte budget of the attachment cache (50 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Default per-file ceiling of the attachment cache (5 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Default embedding dimensionality (`text-embedding-3-small`).
pub const DEFAULT_VECTOR_DIMENSIONS: usize = 1536;

/// Immutable storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageConfig {
    /// Default TTL applied by the TTL cache, in seconds.
    pub default_ttl_secs: u64,
    /// Maximum number of live entries in the TTL cache.
    pub max_cache_entries: usize,
    /// Byte budget shared by all attachment cache entries.
    pub max_cache_size: u64,
    /// Files larger than this are never admitted to the attachment cache.
    pub max_file_size: u64,
    /// Length every vector embedding must have.
    pub vector_dimensions: usize,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Default TTL in seconds.
    pub default_ttl_secs: Option<u64>,
    /// TTL cache entry bound.
    pub max_cache_entries: Option<usize>,
    /// Attachment cache byte budget.
    pub max_cache_size: Option<u64>,
    /// Attachment per-file ceiling.
    pub max_file_size: Option<u64>,
    /// Embedding dimensionality.
    pub vector_dimensions: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            vector_dimensions: DEFAULT_VECTOR_DIMENSIONS,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Self::parse(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn parse(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location with env overrides.
    ///
    /// Looks for `stowage/config.toml` in the platform config directory and
    /// falls back to defaults when the file is absent or unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let from_file = directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("stowage").join("config.toml"))
            .filter(|path| path.exists())
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    None
                },
            });

        from_file.unwrap_or_default().with_env_overrides()
    }

    /// Converts a `ConfigFile` to `StorageConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(v) = file.default_ttl_secs {
            config.default_ttl_secs = v;
        }
        if let Some(v) = file.max_cache_entries {
            config.max_cache_entries = v;
        }
        if let Some(v) = file.max_cache_size {
            config.max_cache_size = v;
        }
        if let Some(v) = file.max_file_size {
            config.max_file_size = v;
        }
        if let Some(v) = file.vector_dimensions {
            config.vector_dimensions = v;
        }

        config
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `STOWAGE_DEFAULT_TTL_SECS` | `default_ttl_secs` |
    /// | `STOWAGE_MAX_CACHE_ENTRIES` | `max_cache_entries` |
    /// | `STOWAGE_MAX_CACHE_SIZE` | `max_cache_size` |
    /// | `STOWAGE_MAX_FILE_SIZE` | `max_file_size` |
    /// | `STOWAGE_VECTOR_DIMENSIONS` | `vector_dimensions` |
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env("STOWAGE_DEFAULT_TTL_SECS") {
            self.default_ttl_secs = v;
        }
        if let Some(v) = parse_env("STOWAGE_MAX_CACHE_ENTRIES") {
            self.max_cache_entries = v;
        }
        if let Some(v) = parse_env("STOWAGE_MAX_CACHE_SIZE") {
            self.max_cache_size = v;
        }
        if let Some(v) = parse_env("STOWAGE_MAX_FILE_SIZE") {
            self.max_file_size = v;
        }
        if let Some(v) = parse_env("STOWAGE_VECTOR_DIMENSIONS") {
            self.vector_dimensions = v;
        }
        self
    }

    /// Checks that the configuration can back every store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if `vector_dimensions` or
    /// `max_cache_entries` is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.vector_dimensions == 0 {
            return Err(crate::Error::InvalidInput(
                "vector_dimensions must be positive".to_string(),
            ));
        }
        if self.max_cache_entries == 0 {
            return Err(crate::Error::InvalidInput(
                "max_cache_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }

    /// Sets the default TTL in seconds.
    #[must_use]
    pub const fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    /// Sets the TTL cache entry bound.
    #[must_use]
    pub const fn with_max_cache_entries(mut self, entries: usize) -> Self {
        self.max_cache_entries = entries;
        self
    }

    /// Sets the attachment cache byte budget.
    #[must_use]
    pub const fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    /// Sets the attachment per-file ceiling.
    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the embedding dimensionality.
    #[must_use]
    pub const fn with_vector_dimensions(mut self, dimensions: usize) -> Self {
        self.vector_dimensions = dimensions;
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
