use std::cmp::Ordering;

use tracing::debug;

use crate::{
    executor::{CommandOutcome, eval::evaluate, sequential_scan::decode_table_row},
    planner::logical_plan::{ColumnTarget, InsertPlan},
    storage::{bplus_tree::BPlusTree, schema::TableSchema, storage_manager::StorageManager},
    types::{
        RowId,
        error::DatabaseError,
        row::Row,
        value::{DataType, Value},
    },
};

/// Writes rows into one table, enforcing its column constraints.
///
/// The record stored under a rowid holds one value per declared column.
/// The `INTEGER PRIMARY KEY` column is stored as NULL since its value is
/// the rowid itself.
pub struct TableInserter<'a> {
    storage: &'a mut StorageManager,
    table: &'a TableSchema,
    tree: BPlusTree,
}

impl<'a> TableInserter<'a> {
    pub fn new(storage: &'a mut StorageManager, table: &'a TableSchema) -> Self {
        Self {
            storage,
            tree: BPlusTree::new(table.root_page_id),
            table,
        }
    }

    /// Inserts a full column list. `row_id` of `None` takes `max(rowid) + 1`.
    pub fn insert(
        &mut self,
        row_id: Option<RowId>,
        values: Vec<Value>,
    ) -> Result<RowId, DatabaseError> {
        let values = prepare_record(self.table, values)?;
        let row_id = match row_id {
            Some(row_id) => {
                if self.tree.contains(self.storage, row_id)? {
                    return Err(primary_key_violation(self.table, row_id));
                }
                row_id
            }
            None => next_row_id(self.storage, &self.tree)?,
        };
        check_unique(self.storage, self.table, &values, None)?;
        self.tree
            .insert(self.storage, row_id, &Row::new(values).to_bytes())?;
        Ok(row_id)
    }

    pub fn insert_batch(
        &mut self,
        rows: Vec<(Option<RowId>, Vec<Value>)>,
    ) -> Result<Vec<RowId>, DatabaseError> {
        rows.into_iter()
            .map(|(row_id, values)| self.insert(row_id, values))
            .collect()
    }
}

pub fn execute_insert(
    storage: &mut StorageManager,
    plan: &InsertPlan,
) -> Result<CommandOutcome, DatabaseError> {
    let table = &plan.table;
    let mut inserter = TableInserter::new(storage, table);
    let mut outcome = CommandOutcome::default();

    for exprs in &plan.rows {
        let mut values: Vec<Value> = table
            .columns
            .iter()
            .map(|column| column.default_value.clone().unwrap_or(Value::Null))
            .collect();
        let mut row_id = None;
        for (target, expr) in plan.targets.iter().zip(exprs) {
            let value = evaluate(expr, &[])?;
            match target {
                ColumnTarget::Column(index) => values[*index] = value,
                ColumnTarget::RowId => row_id = rowid_from_value(value)?,
            }
        }
        let inserted = inserter.insert(row_id, values)?;
        outcome.changes += 1;
        outcome.last_insert_rowid = Some(inserted);
    }
    debug!(table = %table.table_name, rows = outcome.changes, "rows inserted");
    Ok(outcome)
}

/// Interprets a value assigned to the rowid. NULL requests a fresh rowid.
pub(crate) fn rowid_from_value(value: Value) -> Result<Option<RowId>, DatabaseError> {
    match value.apply_affinity(DataType::Integer) {
        Value::Null => Ok(None),
        Value::Integer(row_id) => Ok(Some(row_id)),
        other => Err(DatabaseError::TypeMismatch {
            expected: "INTEGER rowid".to_string(),
            actual: other.column_type().to_string(),
        }),
    }
}

pub(crate) fn next_row_id(
    storage: &mut StorageManager,
    tree: &BPlusTree,
) -> Result<RowId, DatabaseError> {
    match tree.max_key(storage)? {
        None => Ok(1),
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| DatabaseError::execution("database or table is full: no rowid left")),
    }
}

/// Applies column affinity and checks NOT NULL, producing the stored record.
pub(crate) fn prepare_record(
    table: &TableSchema,
    values: Vec<Value>,
) -> Result<Vec<Value>, DatabaseError> {
    let mut record = Vec::with_capacity(table.columns.len());
    for (column, value) in table.columns.iter().zip(values) {
        if column.is_rowid_alias() {
            record.push(Value::Null);
            continue;
        }
        let value = value.apply_affinity(column.data_type);
        if value.is_null() && (!column.nullable || column.primary_key) {
            return Err(DatabaseError::ConstraintViolation {
                details: format!(
                    "NOT NULL constraint failed: {}.{}",
                    table.table_name, column.name
                ),
            });
        }
        record.push(value);
    }
    Ok(record)
}

/// Scans the table for another row holding the same value in a UNIQUE or
/// non-rowid PRIMARY KEY column. NULLs never collide.
pub(crate) fn check_unique(
    storage: &mut StorageManager,
    table: &TableSchema,
    record: &[Value],
    exclude: Option<RowId>,
) -> Result<(), DatabaseError> {
    let constrained: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(index, column)| {
            (column.unique || column.primary_key)
                && !column.is_rowid_alias()
                && record.get(*index).is_some_and(|v| !v.is_null())
        })
        .map(|(index, _)| index)
        .collect();
    if constrained.is_empty() {
        return Ok(());
    }

    let mut cursor = BPlusTree::new(table.root_page_id).scan();
    while let Some((row_id, payload)) = cursor.next(storage)? {
        if Some(row_id) == exclude {
            continue;
        }
        let existing = decode_table_row(table, row_id, &payload)?;
        for &index in &constrained {
            if existing.values[index].total_cmp(&record[index]) == Ordering::Equal {
                let column = &table.columns[index];
                let kind = if column.primary_key { "PRIMARY KEY" } else { "UNIQUE" };
                return Err(DatabaseError::ConstraintViolation {
                    details: format!(
                        "{} constraint failed: {}.{}",
                        kind, table.table_name, column.name
                    ),
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn primary_key_violation(table: &TableSchema, row_id: RowId) -> DatabaseError {
    let column = table
        .rowid_alias_index()
        .map(|index| table.columns[index].name.as_str())
        .unwrap_or("rowid");
    DatabaseError::ConstraintViolation {
        details: format!(
            "UNIQUE constraint failed: {}.{} (rowid {})",
            table.table_name, column, row_id
        ),
    }
}
