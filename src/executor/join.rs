use std::collections::{HashMap, VecDeque};

use crate::{
    executor::{
        BoxedOperator, ExecContext, Operator,
        eval::{evaluate, is_true},
        pipeline::row_key,
    },
    planner::{
        expression::Expression,
        logical_plan::{JoinPlan, JoinType},
    },
    types::{error::DatabaseError, row::Row, value::Value},
};

fn combine(left: &[Value], right: &[Value]) -> Row {
    let mut values = Vec::with_capacity(left.len() + right.len());
    values.extend_from_slice(left);
    values.extend_from_slice(right);
    Row::new(values)
}

fn null_padded(left: &[Value], right_width: usize) -> Row {
    let mut values = left.to_vec();
    values.resize(left.len() + right_width, Value::Null);
    Row::new(values)
}

fn passes(condition: &Option<Expression>, row: &Row) -> Result<bool, DatabaseError> {
    match condition {
        Some(condition) => is_true(condition, &row.values),
        None => Ok(true),
    }
}

/// Join key of a row, or `None` when a key part is NULL (it matches nothing).
fn join_key(keys: &[Expression], values: &[Value]) -> Result<Option<Vec<u8>>, DatabaseError> {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let value = evaluate(key, values)?;
        if value.is_null() {
            return Ok(None);
        }
        parts.push(value);
    }
    Ok(Some(row_key(&parts)))
}

/// Equi-join that buffers one side in a hash table and streams the other.
/// LEFT joins always build the right side; inner joins build whichever
/// side looks smaller.
pub struct HashJoin {
    left: BoxedOperator,
    right: BoxedOperator,
    join_type: JoinType,
    condition: Option<Expression>,
    left_keys: Vec<Expression>,
    right_keys: Vec<Expression>,
    right_width: usize,
    build_left: bool,
    table: HashMap<Vec<u8>, Vec<Row>>,
    pending: VecDeque<Row>,
}

impl HashJoin {
    pub fn new(left: BoxedOperator, right: BoxedOperator, plan: &JoinPlan) -> Self {
        let (left_keys, right_keys) = plan.equi_keys.iter().cloned().unzip();
        Self {
            left,
            right,
            join_type: plan.join_type,
            condition: plan.condition.clone(),
            left_keys,
            right_keys,
            right_width: plan.right_width,
            build_left: false,
            table: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    fn choose_build_side(&self, ctx: &mut ExecContext<'_>) -> Result<bool, DatabaseError> {
        if self.join_type != JoinType::Inner {
            return Ok(false);
        }
        let left = self.left.cardinality_hint(ctx)?;
        let right = self.right.cardinality_hint(ctx)?;
        Ok(matches!((left, right), (Some(l), Some(r)) if l < r))
    }
}

impl Operator for HashJoin {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.build_left = self.choose_build_side(ctx)?;
        self.table.clear();
        self.pending.clear();

        let (build, keys) = if self.build_left {
            (&mut self.left, &self.left_keys)
        } else {
            (&mut self.right, &self.right_keys)
        };
        build.open(ctx)?;
        while let Some(row) = build.next(ctx)? {
            if let Some(key) = join_key(keys, &row.values)? {
                self.table.entry(key).or_default().push(row);
            }
        }
        build.close();

        if self.build_left {
            self.right.open(ctx)
        } else {
            self.left.open(ctx)
        }
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let (probe, keys) = if self.build_left {
                (&mut self.right, &self.right_keys)
            } else {
                (&mut self.left, &self.left_keys)
            };
            let Some(probe_row) = probe.next(ctx)? else {
                return Ok(None);
            };

            let matches = match join_key(keys, &probe_row.values)? {
                Some(key) => self.table.get(&key).map(Vec::as_slice).unwrap_or_default(),
                None => &[],
            };
            for candidate in matches {
                let combined = if self.build_left {
                    combine(&candidate.values, &probe_row.values)
                } else {
                    combine(&probe_row.values, &candidate.values)
                };
                if passes(&self.condition, &combined)? {
                    self.pending.push_back(combined);
                }
            }
            if self.pending.is_empty() && self.join_type == JoinType::Left {
                return Ok(Some(null_padded(&probe_row.values, self.right_width)));
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.table.clear();
        self.pending.clear();
    }
}

/// Joins by re-opening the inner side for every outer row.
pub struct NestedLoopJoin {
    left: BoxedOperator,
    right: BoxedOperator,
    join_type: JoinType,
    condition: Option<Expression>,
    right_width: usize,
    current: Option<Row>,
    matched: bool,
}

impl NestedLoopJoin {
    pub fn new(left: BoxedOperator, right: BoxedOperator, plan: &JoinPlan) -> Self {
        Self {
            left,
            right,
            join_type: plan.join_type,
            condition: plan.condition.clone(),
            right_width: plan.right_width,
            current: None,
            matched: false,
        }
    }
}

impl Operator for NestedLoopJoin {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.current = None;
        self.left.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        loop {
            let Some(outer) = self.current.as_ref() else {
                let Some(row) = self.left.next(ctx)? else {
                    return Ok(None);
                };
                self.right.close();
                self.right.open(ctx)?;
                self.current = Some(row);
                self.matched = false;
                continue;
            };

            match self.right.next(ctx)? {
                Some(inner) => {
                    let combined = combine(&outer.values, &inner.values);
                    if passes(&self.condition, &combined)? {
                        self.matched = true;
                        return Ok(Some(combined));
                    }
                }
                None => {
                    let unmatched = !self.matched && self.join_type == JoinType::Left;
                    let outer = self.current.take();
                    if let (true, Some(outer)) = (unmatched, outer) {
                        return Ok(Some(null_padded(&outer.values, self.right_width)));
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.current = None;
    }
}
