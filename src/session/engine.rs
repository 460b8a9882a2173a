//! Process-wide arena of open connections, addressed by opaque ids.
//!
//! Callers that cannot hold Rust references (bindings, FFI shims) drive the
//! engine through integer handles. The arena is created by [`initialize`]
//! and torn down by [`shutdown`]; any other call outside that window fails
//! with `InvalidState`. Each connection sits behind its own mutex, so
//! different handles can be driven from different threads.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info};

use crate::{
    config::Config,
    executor::mapping::{Record, RecordSchema},
    session::{
        connection::{Connection, QueryFormat},
        statement::{StatementId, StepResult},
    },
    types::{
        error::DatabaseError,
        value::{ColumnType, Value},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub u64);

type SharedConnection = Arc<Mutex<Connection>>;

struct EngineState {
    config: Config,
    connections: HashMap<u64, SharedConnection>,
    statements: HashMap<u64, (HandleId, StatementId)>,
    next_handle: u64,
    next_statement: u64,
}

static ENGINE: LazyLock<Mutex<Option<EngineState>>> = LazyLock::new(|| Mutex::new(None));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_initialized() -> DatabaseError {
    DatabaseError::invalid_state("engine is not initialized")
}

fn with_state<T>(
    f: impl FnOnce(&mut EngineState) -> Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    let mut engine = lock(&ENGINE);
    let state = engine.as_mut().ok_or_else(not_initialized)?;
    f(state)
}

fn connection(handle: HandleId) -> Result<SharedConnection, DatabaseError> {
    with_state(|state| {
        state
            .connections
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| DatabaseError::invalid_state(format!("unknown handle {}", handle.0)))
    })
}

fn statement(stmt: StatementHandle) -> Result<(SharedConnection, StatementId), DatabaseError> {
    with_state(|state| {
        let (handle, id) = *state.statements.get(&stmt.0).ok_or_else(|| {
            DatabaseError::invalid_state(format!("unknown statement {}", stmt.0))
        })?;
        let connection = state.connections.get(&handle.0).cloned().ok_or_else(|| {
            DatabaseError::invalid_state(format!("statement {} outlived its handle", stmt.0))
        })?;
        Ok((connection, id))
    })
}

/// Sets up the arena. Later calls while it is up are no-ops.
pub fn initialize(config: Config) -> Result<(), DatabaseError> {
    let mut engine = lock(&ENGINE);
    if engine.is_some() {
        debug!("engine already initialized");
        return Ok(());
    }
    config.validate()?;
    info!(max_open_handles = config.engine.max_open_handles, "engine initialized");
    *engine = Some(EngineState {
        config,
        connections: HashMap::new(),
        statements: HashMap::new(),
        next_handle: 1,
        next_statement: 1,
    });
    Ok(())
}

pub fn is_initialized() -> bool {
    lock(&ENGINE).is_some()
}

/// Closes every handle and tears the arena down.
pub fn shutdown() {
    let Some(state) = lock(&ENGINE).take() else {
        return;
    };
    let handles = state.connections.len();
    for connection in state.connections.into_values() {
        lock(&connection).shutdown();
    }
    info!(handles, "engine shut down");
}

pub fn open(path: impl AsRef<Path>) -> Result<HandleId, DatabaseError> {
    let config = with_state(|state| {
        if state.connections.len() >= state.config.engine.max_open_handles {
            return Err(DatabaseError::invalid_state(format!(
                "too many open handles (limit {})",
                state.config.engine.max_open_handles
            )));
        }
        Ok(state.config.clone())
    })?;
    let connection = Connection::open_with_config(path, &config)?;
    with_state(move |state| {
        let handle = HandleId(state.next_handle);
        state.next_handle += 1;
        state
            .connections
            .insert(handle.0, Arc::new(Mutex::new(connection)));
        Ok(handle)
    })
}

/// Finalizes the handle's statements and closes it.
pub fn close(handle: HandleId) -> Result<(), DatabaseError> {
    let connection = with_state(|state| {
        state.statements.retain(|_, (owner, _)| *owner != handle);
        state
            .connections
            .remove(&handle.0)
            .ok_or_else(|| DatabaseError::invalid_state(format!("unknown handle {}", handle.0)))
    })?;
    lock(&connection).shutdown();
    Ok(())
}

pub fn execute(handle: HandleId, sql: &str) -> Result<(), DatabaseError> {
    let connection = connection(handle)?;
    lock(&connection).execute(sql)
}

pub fn prepare(handle: HandleId, sql: &str) -> Result<StatementHandle, DatabaseError> {
    let connection = connection(handle)?;
    let id = lock(&connection).prepare(sql)?;
    with_state(|state| {
        let stmt = StatementHandle(state.next_statement);
        state.next_statement += 1;
        state.statements.insert(stmt.0, (handle, id));
        Ok(stmt)
    })
}

/// Advances a statement; `true` when a row is available. Reaching the end
/// or failing releases the statement handle.
pub fn step(stmt: StatementHandle) -> Result<bool, DatabaseError> {
    let (connection, id) = statement(stmt)?;
    let stepped = lock(&connection).step(id);
    if !matches!(stepped, Ok(StepResult::Row)) {
        release_statement(stmt)?;
    }
    stepped.map(|result| result == StepResult::Row)
}

fn release_statement(stmt: StatementHandle) -> Result<(), DatabaseError> {
    with_state(|state| {
        state.statements.remove(&stmt.0);
        Ok(())
    })
}

/// Number of live statement handles, or `None` before [`initialize`].
pub fn open_statements() -> Option<usize> {
    lock(&ENGINE).as_ref().map(|state| state.statements.len())
}

pub fn get_column(stmt: StatementHandle, name: &str) -> Result<Value, DatabaseError> {
    let (connection, id) = statement(stmt)?;
    lock(&connection).get_value(id, name)
}

pub fn get_column_type(stmt: StatementHandle, name: &str) -> Result<ColumnType, DatabaseError> {
    let (connection, id) = statement(stmt)?;
    lock(&connection).get_type(id, name)
}

pub fn column_names(stmt: StatementHandle) -> Result<Vec<String>, DatabaseError> {
    let (connection, id) = statement(stmt)?;
    lock(&connection).column_names(id)
}

/// Finalizes a statement early and releases its handle.
pub fn cancel(stmt: StatementHandle) -> Result<(), DatabaseError> {
    let (connection, id) = statement(stmt)?;
    lock(&connection).finalize(id);
    release_statement(stmt)
}

pub fn query_mapped(
    handle: HandleId,
    sql: &str,
    schema: &RecordSchema,
) -> Result<Vec<Record>, DatabaseError> {
    let connection = connection(handle)?;
    lock(&connection).query_mapped(sql, schema)
}

pub fn query_json(
    handle: HandleId,
    sql: &str,
    format: QueryFormat,
) -> Result<String, DatabaseError> {
    let connection = connection(handle)?;
    lock(&connection).query_json(sql, format)
}

/// Number of open handles, or `None` before [`initialize`].
pub fn open_handles() -> Option<usize> {
    lock(&ENGINE).as_ref().map(|state| state.connections.len())
}
