use std::fmt;

use crate::{
    executor::BoxedOperator,
    planner::logical_plan::PlannedStatement,
    session::connection::Connection,
    types::{
        error::DatabaseError,
        row::Row,
        value::{ColumnType, Value},
    },
};

/// Opaque id of a statement prepared on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(pub u64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement #{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Prepared,
    Stepping,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A row is available to the column accessors.
    Row,
    Done,
}

/// A prepared statement as the connection tracks it.
pub(crate) struct PreparedStatement {
    pub(crate) planned: PlannedStatement,
    /// Operator tree of a query; `None` for commands and once released.
    pub(crate) operator: Option<BoxedOperator>,
    /// Structural versions of the statement's tables when it was prepared.
    pub(crate) versions: Vec<(String, u64)>,
    pub(crate) state: StatementState,
    pub(crate) current: Option<Row>,
}

impl PreparedStatement {
    pub(crate) fn new(
        planned: PlannedStatement,
        operator: Option<BoxedOperator>,
        versions: Vec<(String, u64)>,
    ) -> Self {
        Self {
            planned,
            operator,
            versions,
            state: StatementState::Prepared,
            current: None,
        }
    }

    /// Closes the operator tree and forgets the current row.
    pub(crate) fn release(&mut self, state: StatementState) {
        if let Some(mut operator) = self.operator.take() {
            if self.state == StatementState::Stepping {
                operator.close();
            }
        }
        self.current = None;
        self.state = state;
    }

    pub(crate) fn column_index(&self, name: &str) -> Result<usize, DatabaseError> {
        self.planned
            .columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| DatabaseError::ColumnNotFound {
                name: name.to_string(),
            })
    }

    /// Value of `name` in the current row.
    pub(crate) fn value(&self, id: StatementId, name: &str) -> Result<&Value, DatabaseError> {
        let Some(row) = self.current.as_ref() else {
            return Err(DatabaseError::invalid_state(format!(
                "{} has no current row ({:?})",
                id, self.state
            )));
        };
        let index = self.column_index(name)?;
        row.values.get(index).ok_or_else(|| {
            DatabaseError::invalid_state(format!("{} row is shorter than its columns", id))
        })
    }
}

/// Release capability of a prepared statement: the statement is finalized
/// when the guard goes out of scope.
pub struct ScopedStatement<'c> {
    connection: &'c mut Connection,
    id: StatementId,
}

impl<'c> ScopedStatement<'c> {
    pub(crate) fn new(connection: &'c mut Connection, id: StatementId) -> Self {
        Self { connection, id }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn step(&mut self) -> Result<StepResult, DatabaseError> {
        self.connection.step(self.id)
    }

    pub fn column_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.connection.column_names(self.id)
    }

    pub fn get_value(&self, column: &str) -> Result<Value, DatabaseError> {
        self.connection.get_value(self.id, column)
    }

    pub fn get_int(&self, column: &str) -> Result<i32, DatabaseError> {
        self.connection.get_int(self.id, column)
    }

    pub fn get_long(&self, column: &str) -> Result<i64, DatabaseError> {
        self.connection.get_long(self.id, column)
    }

    pub fn get_double(&self, column: &str) -> Result<f64, DatabaseError> {
        self.connection.get_double(self.id, column)
    }

    pub fn get_string(&self, column: &str) -> Result<Option<String>, DatabaseError> {
        self.connection.get_string(self.id, column)
    }

    pub fn get_blob(&self, column: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.connection.get_blob(self.id, column)
    }

    pub fn get_type(&self, column: &str) -> Result<ColumnType, DatabaseError> {
        self.connection.get_type(self.id, column)
    }

    /// Stops the statement early; later steps fail.
    pub fn cancel(&mut self) -> Result<(), DatabaseError> {
        self.connection.cancel(self.id)
    }
}

impl Drop for ScopedStatement<'_> {
    fn drop(&mut self) {
        self.connection.finalize(self.id);
    }
}
