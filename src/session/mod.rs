pub mod connection;
pub mod engine;
pub mod statement;

pub use connection::{Connection, QueryFormat};
pub use statement::{ScopedStatement, StatementId, StatementState, StepResult};
