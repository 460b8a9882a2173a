use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};

use crate::{
    config::Config,
    session::connection::Connection,
    storage::storage_manager::StorageManager,
    types::error::DatabaseError,
};

/// A database file inside its own temporary directory. The directory, the
/// file and its journal disappear on drop.
pub struct TempDatabase {
    pub path: PathBuf,
    pub storage_manager: Option<StorageManager>,
    // Declared last so the storage manager closes before the directory goes.
    dir: TempDir,
}

impl TempDatabase {
    pub fn new() -> Self {
        Self::with_prefix("lumbung_test")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let dir = Builder::new()
            .prefix(&format!("{}_", prefix))
            .tempdir()
            .unwrap_or_else(|e| panic!("cannot create temp dir for {}: {}", prefix, e));
        Self {
            path: dir.path().join(format!("{}.db", prefix)),
            storage_manager: None,
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn create_storage_manager(&mut self) -> Result<&mut StorageManager, DatabaseError> {
        let storage = StorageManager::new(&self.path)?;
        Ok(self.storage_manager.insert(storage))
    }

    pub fn get_storage_manager(&mut self) -> Option<&mut StorageManager> {
        self.storage_manager.as_mut()
    }

    /// Drops the held storage manager, as a closed handle would.
    pub fn close_storage_manager(&mut self) {
        self.storage_manager = None;
    }

    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        Connection::open(&self.path)
    }

    pub fn connect_with_config(&self, config: &Config) -> Result<Connection, DatabaseError> {
        Connection::open_with_config(&self.path, config)
    }
}

impl Default for TempDatabase {
    fn default() -> Self {
        Self::new()
    }
}
