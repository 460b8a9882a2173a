//! Per-file lock table shared by every handle in this process.
//!
//! Handles opened on the same canonical path share one [`SharedFile`]
//! entry: the writer slot, the structural table versions and the I/O gate.
//! All of it lives in process memory. No OS file lock is taken, so two
//! processes writing the same file are not serialized against each other
//! and never see `Busy`; multi-process access is unsupported.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::types::error::DatabaseError;

/// Shared state of one database file within this process.
#[derive(Debug, Default)]
struct FileState {
    writer: Mutex<Option<u64>>,
    table_versions: Mutex<HashMap<String, u64>>,
    gate: Mutex<GateState>,
    gate_changed: Condvar,
}

/// Readers inside the gate and whether a commit is rewriting the file.
#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    writing: bool,
    writers_waiting: usize,
}

static FILE_REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Arc<FileState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fresh id identifying one connection as a lock owner.
pub fn next_owner_id() -> u64 {
    NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A connection's membership in the lock table of one file. Every handle
/// opened on the same canonical path shares the writer slot, the table
/// versions and the I/O gate.
#[derive(Debug)]
pub struct SharedFile {
    key: PathBuf,
    state: Arc<FileState>,
}

impl SharedFile {
    pub fn register(path: &Path) -> Result<Self, DatabaseError> {
        let key = path.canonicalize()?;
        let state = lock(&FILE_REGISTRY)
            .entry(key.clone())
            .or_default()
            .clone();
        Ok(Self { key, state })
    }

    pub fn path(&self) -> &Path {
        &self.key
    }

    /// Claims the writer slot, failing with `Busy` when another owner holds it.
    pub fn try_lock_write(&self, owner: u64) -> Result<(), DatabaseError> {
        let mut writer = lock(&self.state.writer);
        match *writer {
            Some(current) if current != owner => Err(DatabaseError::Busy),
            _ => {
                *writer = Some(owner);
                Ok(())
            }
        }
    }

    pub fn unlock_write(&self, owner: u64) {
        let mut writer = lock(&self.state.writer);
        if *writer == Some(owner) {
            *writer = None;
        }
    }

    pub fn holds_write(&self, owner: u64) -> bool {
        *lock(&self.state.writer) == Some(owner)
    }

    pub fn table_version(&self, table: &str) -> u64 {
        lock(&self.state.table_versions)
            .get(&table.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Marks a structural change; statements reading the table must stop.
    pub fn bump_table_version(&self, table: &str) {
        *lock(&self.state.table_versions)
            .entry(table.to_ascii_lowercase())
            .or_insert(0) += 1;
    }

    /// Gate serializing page reads against commits rewriting the file.
    pub fn io_gate(&self) -> IoGate {
        IoGate {
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IoGate {
    state: Arc<FileState>,
}

impl IoGate {
    /// Shared entry, held while reading pages. A waiting commit goes first,
    /// so a steady stream of readers cannot starve it.
    pub fn read(&self) -> GateReadGuard {
        let mut gate = lock(&self.state.gate);
        while gate.writing || gate.writers_waiting > 0 {
            gate = self.wait(gate);
        }
        gate.readers += 1;
        GateReadGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Exclusive entry, held while a commit or recovery rewrites the file.
    pub fn write(&self) -> GateWriteGuard {
        let mut gate = lock(&self.state.gate);
        gate.writers_waiting += 1;
        while gate.writing || gate.readers > 0 {
            gate = self.wait(gate);
        }
        gate.writers_waiting -= 1;
        gate.writing = true;
        GateWriteGuard {
            state: Arc::clone(&self.state),
        }
    }

    fn wait<'a>(&self, gate: MutexGuard<'a, GateState>) -> MutexGuard<'a, GateState> {
        self.state
            .gate_changed
            .wait(gate)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned shared entry into the I/O gate; it can outlive the call that took
/// it, so a storage manager can keep one for the length of a query.
#[derive(Debug)]
pub struct GateReadGuard {
    state: Arc<FileState>,
}

impl Drop for GateReadGuard {
    fn drop(&mut self) {
        lock(&self.state.gate).readers -= 1;
        self.state.gate_changed.notify_all();
    }
}

#[derive(Debug)]
pub struct GateWriteGuard {
    state: Arc<FileState>,
}

impl Drop for GateWriteGuard {
    fn drop(&mut self) {
        lock(&self.state.gate).writing = false;
        self.state.gate_changed.notify_all();
    }
}

impl Drop for SharedFile {
    fn drop(&mut self) {
        let mut registry = lock(&FILE_REGISTRY);
        // The registry plus this handle: nobody else uses the entry.
        if Arc::strong_count(&self.state) <= 2 {
            registry.remove(&self.key);
        }
    }
}
