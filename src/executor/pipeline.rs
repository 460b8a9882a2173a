use std::collections::HashSet;

use crate::{
    executor::{
        BoxedOperator, ExecContext, Operator,
        eval::{evaluate, is_true},
    },
    planner::expression::Expression,
    types::{error::DatabaseError, row::Row, value::Value},
};

pub struct Filter {
    input: BoxedOperator,
    predicate: Expression,
}

impl Filter {
    pub fn new(input: BoxedOperator, predicate: Expression) -> Self {
        Self { input, predicate }
    }
}

impl Operator for Filter {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        while let Some(row) = self.input.next(ctx)? {
            if is_true(&self.predicate, &row.values)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
    }

    fn cardinality_hint(&self, ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        self.input.cardinality_hint(ctx)
    }
}

pub struct Project {
    input: BoxedOperator,
    expressions: Vec<Expression>,
}

impl Project {
    pub fn new(input: BoxedOperator, expressions: Vec<Expression>) -> Self {
        Self { input, expressions }
    }
}

impl Operator for Project {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let values = self
            .expressions
            .iter()
            .map(|expr| evaluate(expr, &row.values))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Row {
            row_id: row.row_id,
            values,
        }))
    }

    fn close(&mut self) {
        self.input.close();
    }

    fn cardinality_hint(&self, ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        self.input.cardinality_hint(ctx)
    }
}

/// Skips `offset` rows, then passes at most `limit` rows.
pub struct Limit {
    input: BoxedOperator,
    limit: Option<u64>,
    offset: u64,
    skipped: u64,
    emitted: u64,
}

impl Limit {
    pub fn new(input: BoxedOperator, limit: Option<u64>, offset: u64) -> Self {
        Self {
            input,
            limit,
            offset,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Operator for Limit {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.skipped = 0;
        self.emitted = 0;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        while self.skipped < self.offset {
            if self.input.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.input.next(ctx)?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Drops rows equal to one already emitted; keeps first-seen order.
pub struct Distinct {
    input: BoxedOperator,
    seen: HashSet<Vec<u8>>,
}

impl Distinct {
    pub fn new(input: BoxedOperator) -> Self {
        Self {
            input,
            seen: HashSet::new(),
        }
    }
}

/// Byte key under which equal rows collide.
pub(crate) fn row_key(values: &[Value]) -> Vec<u8> {
    let mut key = Vec::new();
    for value in values {
        value.key_bytes(&mut key);
    }
    key
}

impl Operator for Distinct {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.seen.clear();
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        while let Some(row) = self.input.next(ctx)? {
            if self.seen.insert(row_key(&row.values)) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
        self.seen.clear();
    }
}
