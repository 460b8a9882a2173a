//! Pull-based operators.
//!
//! A query plan becomes a tree of [`Operator`]s. The caller opens the root,
//! pulls rows with `next` until it returns `None`, then closes it. Every
//! call receives the storage manager through an [`ExecContext`], so an
//! operator tree holds no borrow between calls and can live inside a
//! prepared statement.

pub mod aggregate;
pub mod create_table;
pub mod eval;
pub mod insert;
pub mod join;
pub mod mapping;
pub mod modify;
pub mod pipeline;
pub mod sequential_scan;
pub mod sort;

use tracing::debug;

use crate::{
    planner::logical_plan::{JoinType, LogicalPlan},
    storage::{schema::SchemaManager, storage_manager::StorageManager},
    types::{RowId, error::DatabaseError, row::Row},
};

pub struct ExecContext<'a> {
    pub storage: &'a mut StorageManager,
}

impl<'a> ExecContext<'a> {
    pub fn new(storage: &'a mut StorageManager) -> Self {
        Self { storage }
    }
}

pub trait Operator: Send {
    /// Prepares the operator; opening again restarts it from the beginning.
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError>;

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError>;

    fn close(&mut self);

    /// Rough size of the output, used to pick the build side of a hash join.
    fn cardinality_hint(&self, _ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        Ok(None)
    }

    fn next_batch(
        &mut self,
        ctx: &mut ExecContext<'_>,
        batch_size: usize,
    ) -> Result<Vec<Row>, DatabaseError> {
        let mut rows = Vec::with_capacity(batch_size);
        while rows.len() < batch_size {
            match self.next(ctx)? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }
}

pub type BoxedOperator = Box<dyn Operator>;

/// Builds the operator tree of a query plan.
pub fn build_operator(plan: &LogicalPlan) -> Result<BoxedOperator, DatabaseError> {
    let operator: BoxedOperator = match plan {
        LogicalPlan::Scan(scan) => Box::new(sequential_scan::SequentialScanner::new(
            scan.table.clone(),
            scan.range,
        )),
        LogicalPlan::Values(values) => {
            Box::new(sequential_scan::ValuesScanner::new(values.rows.clone()))
        }
        LogicalPlan::Filter(filter) => Box::new(pipeline::Filter::new(
            build_operator(&filter.input)?,
            filter.predicate.clone(),
        )),
        LogicalPlan::Project(project) => Box::new(pipeline::Project::new(
            build_operator(&project.input)?,
            project.expressions.clone(),
        )),
        LogicalPlan::Join(join) => {
            let left = build_operator(&join.left)?;
            let right = build_operator(&join.right)?;
            if join.equi_keys.is_empty() || join.join_type == JoinType::Cross {
                Box::new(join::NestedLoopJoin::new(left, right, join))
            } else {
                Box::new(join::HashJoin::new(left, right, join))
            }
        }
        LogicalPlan::Aggregate(aggregate) => Box::new(aggregate::HashAggregate::new(
            build_operator(&aggregate.input)?,
            aggregate.group_by.clone(),
            aggregate.aggregates.clone(),
        )),
        LogicalPlan::Sort(sort) => Box::new(sort::Sort::new(
            build_operator(&sort.input)?,
            sort.keys.clone(),
        )),
        LogicalPlan::Distinct(distinct) => {
            Box::new(pipeline::Distinct::new(build_operator(&distinct.input)?))
        }
        LogicalPlan::Limit(limit) => Box::new(pipeline::Limit::new(
            build_operator(&limit.input)?,
            limit.limit,
            limit.offset,
        )),
        other => {
            return Err(DatabaseError::invalid_state(format!(
                "{} does not produce rows",
                plan_name(other)
            )));
        }
    };
    Ok(operator)
}

/// Effect of a statement that produces no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub changes: u64,
    pub last_insert_rowid: Option<RowId>,
}

/// Runs an INSERT, UPDATE, DELETE or DDL plan. Transaction control is the
/// session's business and is rejected here.
pub fn execute_command(
    plan: &LogicalPlan,
    storage: &mut StorageManager,
    schemas: &mut SchemaManager,
) -> Result<CommandOutcome, DatabaseError> {
    debug!(plan = plan_name(plan), "executing command");
    match plan {
        LogicalPlan::Insert(insert) => insert::execute_insert(storage, insert),
        LogicalPlan::Update(update) => modify::execute_update(storage, update),
        LogicalPlan::Delete(delete) => modify::execute_delete(storage, delete),
        LogicalPlan::CreateTable(create) => {
            create_table::SchemaExecutor::new(storage, schemas).create_table(create)?;
            Ok(CommandOutcome::default())
        }
        LogicalPlan::DropTable(drop) => {
            create_table::SchemaExecutor::new(storage, schemas).drop_table(drop)?;
            Ok(CommandOutcome::default())
        }
        LogicalPlan::AlterTable(alter) => {
            create_table::SchemaExecutor::new(storage, schemas).alter_table(alter)?;
            Ok(CommandOutcome::default())
        }
        other => Err(DatabaseError::invalid_state(format!(
            "{} is not a command",
            plan_name(other)
        ))),
    }
}

pub fn plan_name(plan: &LogicalPlan) -> &'static str {
    match plan {
        LogicalPlan::Scan(_) => "Scan",
        LogicalPlan::Values(_) => "Values",
        LogicalPlan::Filter(_) => "Filter",
        LogicalPlan::Project(_) => "Project",
        LogicalPlan::Join(_) => "Join",
        LogicalPlan::Aggregate(_) => "Aggregate",
        LogicalPlan::Sort(_) => "Sort",
        LogicalPlan::Distinct(_) => "Distinct",
        LogicalPlan::Limit(_) => "Limit",
        LogicalPlan::Insert(_) => "Insert",
        LogicalPlan::Update(_) => "Update",
        LogicalPlan::Delete(_) => "Delete",
        LogicalPlan::CreateTable(_) => "CreateTable",
        LogicalPlan::DropTable(_) => "DropTable",
        LogicalPlan::AlterTable(_) => "AlterTable",
        LogicalPlan::Transaction(_) => "Transaction",
    }
}

/// Drains an operator tree into memory.
pub fn collect_rows(
    operator: &mut dyn Operator,
    ctx: &mut ExecContext<'_>,
) -> Result<Vec<Row>, DatabaseError> {
    operator.open(ctx)?;
    let mut rows = Vec::new();
    let drained = loop {
        match operator.next(ctx) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    operator.close();
    drained.map(|()| rows)
}
