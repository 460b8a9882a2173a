//! UPDATE and DELETE. Both first collect the matching rows through the
//! source plan and only then write, so a statement never sees its own
//! changes while it scans.

use tracing::debug;

use crate::{
    executor::{
        CommandOutcome, ExecContext, build_operator, collect_rows,
        eval::evaluate,
        insert::{check_unique, prepare_record, primary_key_violation, rowid_from_value},
    },
    planner::logical_plan::{ColumnTarget, DeletePlan, UpdatePlan},
    storage::{bplus_tree::BPlusTree, schema::TableSchema, storage_manager::StorageManager},
    types::{RowId, error::DatabaseError, row::Row, value::Value},
};

/// Rowid of a scan row, found in its trailing column.
fn scan_row_id(table: &TableSchema, row: &Row) -> Result<RowId, DatabaseError> {
    match row.values.get(table.columns.len()) {
        Some(Value::Integer(row_id)) => Ok(*row_id),
        _ => Err(DatabaseError::invalid_state(format!(
            "scan row of '{}' carries no rowid",
            table.table_name
        ))),
    }
}

fn collect_targets(
    storage: &mut StorageManager,
    source: &crate::planner::logical_plan::LogicalPlan,
) -> Result<Vec<Row>, DatabaseError> {
    let mut operator = build_operator(source)?;
    let mut ctx = ExecContext::new(storage);
    collect_rows(operator.as_mut(), &mut ctx)
}

pub fn execute_update(
    storage: &mut StorageManager,
    plan: &UpdatePlan,
) -> Result<CommandOutcome, DatabaseError> {
    let table = &plan.table;
    let tree = BPlusTree::new(table.root_page_id);
    let rows = collect_targets(storage, &plan.source)?;
    let width = table.columns.len();

    let mut outcome = CommandOutcome::default();
    for row in rows {
        let old_row_id = scan_row_id(table, &row)?;
        let mut values = row.values[..width].to_vec();
        let mut new_row_id = old_row_id;
        for (target, expr) in &plan.assignments {
            let value = evaluate(expr, &row.values)?;
            match target {
                ColumnTarget::Column(index) => values[*index] = value,
                ColumnTarget::RowId => {
                    new_row_id = rowid_from_value(value)?.ok_or_else(|| {
                        DatabaseError::ConstraintViolation {
                            details: format!(
                                "NOT NULL constraint failed: {}.rowid",
                                table.table_name
                            ),
                        }
                    })?;
                }
            }
        }

        let record = prepare_record(table, values)?;
        check_unique(storage, table, &record, Some(old_row_id))?;
        let payload = Row::new(record).to_bytes();
        if new_row_id == old_row_id {
            if !tree.update(storage, old_row_id, &payload)? {
                return Err(DatabaseError::RowNotFound {
                    table: table.table_name.clone(),
                    row_id: old_row_id,
                });
            }
        } else {
            if tree.contains(storage, new_row_id)? {
                return Err(primary_key_violation(table, new_row_id));
            }
            tree.delete(storage, old_row_id)?;
            tree.insert(storage, new_row_id, &payload)?;
        }
        outcome.changes += 1;
    }
    debug!(table = %table.table_name, rows = outcome.changes, "rows updated");
    Ok(outcome)
}

pub fn execute_delete(
    storage: &mut StorageManager,
    plan: &DeletePlan,
) -> Result<CommandOutcome, DatabaseError> {
    let table = &plan.table;
    let tree = BPlusTree::new(table.root_page_id);
    let row_ids = collect_targets(storage, &plan.source)?
        .iter()
        .map(|row| scan_row_id(table, row))
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcome = CommandOutcome::default();
    for row_id in row_ids {
        if tree.delete(storage, row_id)? {
            outcome.changes += 1;
        }
    }
    debug!(table = %table.table_name, rows = outcome.changes, "rows deleted");
    Ok(outcome)
}
