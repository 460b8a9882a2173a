pub mod ast;
pub mod builder;
pub mod expression;
pub mod lexer;
pub mod logical_plan;
pub mod parser;
pub mod token;

pub use builder::PlanBuilder;
pub use logical_plan::{LogicalPlan, PlannedStatement, StatementKind};
pub use parser::{parse_statement, parse_statements};
