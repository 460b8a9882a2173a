//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! [storage]
//! page_size = 8192
//! cache_pages = 512
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, error::DatabaseError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, DatabaseError> {
        let config: Config = toml::from_str(text).map_err(|e| DatabaseError::InvalidConfig {
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        self.storage.validate()?;
        self.engine.validate()
    }
}

/// Storage manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Page size for newly created files. Must be a power of 2.
    /// Existing files keep the size recorded in their header.
    pub page_size: usize,

    /// Clean pages kept in memory per connection.
    pub cache_pages: usize,

    /// B-tree nodes below this fill percentage are merged or rebalanced.
    pub min_fill_percent: u8,

    /// fsync the journal and the database file on commit.
    pub sync_on_commit: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: 2000,
            min_fill_percent: 40,
            sync_on_commit: true,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    #[must_use]
    pub fn with_min_fill_percent(mut self, percent: u8) -> Self {
        self.min_fill_percent = percent;
        self
    }

    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(DatabaseError::InvalidConfig {
                details: format!(
                    "page_size must be a power of 2 between {} and {}, got {}",
                    MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
                ),
            });
        }
        if self.cache_pages == 0 {
            return Err(DatabaseError::InvalidConfig {
                details: "cache_pages must be at least 1".to_string(),
            });
        }
        if self.min_fill_percent > 50 {
            return Err(DatabaseError::InvalidConfig {
                details: format!(
                    "min_fill_percent must be at most 50, got {}",
                    self.min_fill_percent
                ),
            });
        }
        Ok(())
    }
}

/// Process-wide handle arena settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_open_handles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_open_handles: 64,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_max_open_handles(mut self, max: usize) -> Self {
        self.max_open_handles = max;
        self
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.max_open_handles == 0 {
            return Err(DatabaseError::InvalidConfig {
                details: "max_open_handles must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
