use thiserror::Error;

use crate::types::{PageId, RowId};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database corruption: {reason}")]
    Corruption { reason: String },

    #[error("Corrupted page: page_id={page_id}, reason={reason}")]
    CorruptedPage { page_id: PageId, reason: String },

    #[error("Invalid database header: {reason}")]
    InvalidHeader { reason: String },

    #[error("Invalid page type: {0}")]
    InvalidPageType(u8),

    #[error("Database is locked by another writer")]
    Busy,

    #[error("Syntax error at byte {offset}: expected {expected}, found {found}")]
    Syntax {
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("Unsupported syntax at byte {offset}: {feature}")]
    UnsupportedSyntax { offset: usize, feature: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid state: {details}")]
    InvalidState { details: String },

    #[error("Table '{name}' not found")]
    TableNotFound { name: String },

    #[error("Column '{name}' not found")]
    ColumnNotFound { name: String },

    #[error("Row {row_id} not found in table '{table}'")]
    RowNotFound { table: String, row_id: RowId },

    #[error("Table '{name}' already exists")]
    TableExists { name: String },

    #[error("Constraint violation: {details}")]
    ConstraintViolation { details: String },

    #[error("Statement invalidated: table '{table}' was structurally modified")]
    StatementInvalidated { table: String },

    #[error("Cannot map column '{column}' into property '{property}': {details}")]
    Mapping {
        property: String,
        column: String,
        details: String,
    },

    #[error("Query execution error: {details}")]
    ExecutionError { details: String },

    #[error("Page is full (page_id: {page_id})")]
    PageFull { page_id: PageId },

    #[error("Serialization/deserialization error: {details}")]
    SerializationError { details: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },
}

/// Coarse error classes a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corruption,
    Busy,
    Syntax,
    UnsupportedSyntax,
    TypeMismatch,
    InvalidState,
    NotFound,
    Constraint,
    StatementInvalidated,
    Mapping,
    Execution,
}

impl DatabaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::Io(_) => ErrorKind::Io,
            DatabaseError::Corruption { .. }
            | DatabaseError::CorruptedPage { .. }
            | DatabaseError::InvalidHeader { .. }
            | DatabaseError::InvalidPageType(_) => ErrorKind::Corruption,
            DatabaseError::Busy => ErrorKind::Busy,
            DatabaseError::Syntax { .. } => ErrorKind::Syntax,
            DatabaseError::UnsupportedSyntax { .. } => ErrorKind::UnsupportedSyntax,
            DatabaseError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            DatabaseError::InvalidState { .. } => ErrorKind::InvalidState,
            DatabaseError::TableNotFound { .. }
            | DatabaseError::ColumnNotFound { .. }
            | DatabaseError::RowNotFound { .. } => ErrorKind::NotFound,
            DatabaseError::TableExists { .. } | DatabaseError::ConstraintViolation { .. } => {
                ErrorKind::Constraint
            }
            DatabaseError::StatementInvalidated { .. } => ErrorKind::StatementInvalidated,
            DatabaseError::Mapping { .. } => ErrorKind::Mapping,
            DatabaseError::ExecutionError { .. }
            | DatabaseError::PageFull { .. }
            | DatabaseError::SerializationError { .. }
            | DatabaseError::InvalidConfig { .. } => ErrorKind::Execution,
        }
    }

    /// Only lock contention can succeed by simply trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Busy)
    }

    pub(crate) fn invalid_state(details: impl Into<String>) -> Self {
        DatabaseError::InvalidState {
            details: details.into(),
        }
    }

    pub(crate) fn execution(details: impl Into<String>) -> Self {
        DatabaseError::ExecutionError {
            details: details.into(),
        }
    }

    pub(crate) fn corruption(reason: impl Into<String>) -> Self {
        DatabaseError::Corruption {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
