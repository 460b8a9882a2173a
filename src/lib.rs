//! lumbung: a small embedded SQL database.
//!
//! A database is a single file of fixed-size pages. Tables are B+trees keyed
//! by rowid, described by a catalog stored in the file itself. SQL text is
//! parsed into a logical plan, and plans run as trees of pull-based
//! operators. [`Connection`] is the entry point for Rust callers;
//! [`engine`] exposes the same surface through opaque integer handles.

pub mod config;
pub mod executor;
pub mod planner;
pub mod session;
pub mod storage;
pub mod types;
pub mod utils;

pub use config::{Config, EngineConfig, StorageConfig};
pub use executor::mapping::{FieldValue, PropertyType, Record, RecordSchema};
pub use session::{
    Connection, QueryFormat, ScopedStatement, StatementId, StatementState, StepResult, engine,
};
pub use types::{
    error::{DatabaseError, ErrorKind, Result},
    value::{ColumnType, Value},
};
