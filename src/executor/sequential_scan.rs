use crate::{
    executor::{ExecContext, Operator, eval::evaluate},
    planner::{expression::Expression, logical_plan::KeyRange},
    storage::{
        bplus_tree::{BPlusTree, TreeCursor},
        schema::TableSchema,
    },
    types::{RowId, error::DatabaseError, row::Row, value::Value},
};

/// Walks a table's leaves in rowid order within a key range.
///
/// Output rows hold every declared column followed by the rowid. Rows
/// written before an `ADD COLUMN` are padded with the column default, and
/// the `INTEGER PRIMARY KEY` column reads as the rowid.
pub struct SequentialScanner {
    table: TableSchema,
    range: KeyRange,
    cursor: Option<TreeCursor>,
}

impl SequentialScanner {
    pub fn new(table: TableSchema, range: KeyRange) -> Self {
        Self {
            table,
            range,
            cursor: None,
        }
    }

    pub fn table(&self) -> &TableSchema {
        &self.table
    }
}

/// Decodes a stored record into the scan row layout of `table`.
pub fn decode_table_row(
    table: &TableSchema,
    row_id: RowId,
    payload: &[u8],
) -> Result<Row, DatabaseError> {
    let mut row = Row::decode_with_row_id(row_id, payload)?;
    let width = table.columns.len();
    if row.values.len() > width {
        row.values.truncate(width);
    }
    for column in &table.columns[row.values.len()..] {
        row.values
            .push(column.default_value.clone().unwrap_or(Value::Null));
    }
    if let Some(alias) = table.rowid_alias_index() {
        row.values[alias] = Value::Integer(row_id);
    }
    row.values.push(Value::Integer(row_id));
    Ok(row)
}

impl Operator for SequentialScanner {
    fn open(&mut self, _ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        let tree = BPlusTree::new(self.table.root_page_id);
        self.cursor = Some(tree.scan_range(self.range.low, self.range.high));
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(DatabaseError::invalid_state("scan used before open"));
        };
        match cursor.next(ctx.storage)? {
            Some((row_id, payload)) => Ok(Some(decode_table_row(&self.table, row_id, &payload)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.cursor = None;
    }

    fn cardinality_hint(&self, ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        let leaves = BPlusTree::new(self.table.root_page_id).estimated_leaf_count(ctx.storage)?;
        Ok(Some(leaves))
    }
}

/// Rows of constant expressions.
pub struct ValuesScanner {
    rows: Vec<Vec<Expression>>,
    position: usize,
}

impl ValuesScanner {
    pub fn new(rows: Vec<Vec<Expression>>) -> Self {
        Self { rows, position: 0 }
    }
}

impl Operator for ValuesScanner {
    fn open(&mut self, _ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.position = 0;
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        let Some(exprs) = self.rows.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let values = exprs
            .iter()
            .map(|expr| evaluate(expr, &[]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) {}

    fn cardinality_hint(&self, _ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        Ok(Some(1))
    }
}
