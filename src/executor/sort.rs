use std::cmp::Ordering;

use crate::{
    executor::{BoxedOperator, ExecContext, Operator, eval::evaluate},
    planner::logical_plan::SortKey,
    types::{error::DatabaseError, row::Row, value::Value},
};

/// Materializes its input and emits it ordered by the sort keys. NULLs sort
/// first in ascending order; ties keep input order.
pub struct Sort {
    input: BoxedOperator,
    keys: Vec<SortKey>,
    output: std::vec::IntoIter<Row>,
}

impl Sort {
    pub fn new(input: BoxedOperator, keys: Vec<SortKey>) -> Self {
        Self {
            input,
            keys,
            output: Vec::new().into_iter(),
        }
    }

    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (key, (x, y)) in self.keys.iter().zip(a.iter().zip(b)) {
            let ordering = x.total_cmp(y);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn materialize(&mut self, ctx: &mut ExecContext<'_>) -> Result<Vec<Row>, DatabaseError> {
        let mut keyed = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            let sort_values = self
                .keys
                .iter()
                .map(|key| evaluate(&key.expression, &row.values))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((sort_values, row));
        }
        keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl Operator for Sort {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.input.open(ctx)?;
        let sorted = self.materialize(ctx);
        self.input.close();
        self.output = sorted?.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        Ok(self.output.next())
    }

    fn close(&mut self) {
        self.output = Vec::new().into_iter();
    }

    fn cardinality_hint(&self, ctx: &mut ExecContext<'_>) -> Result<Option<u64>, DatabaseError> {
        self.input.cardinality_hint(ctx)
    }
}
