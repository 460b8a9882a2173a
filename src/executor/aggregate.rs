use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use crate::{
    executor::{BoxedOperator, ExecContext, Operator, eval::evaluate, pipeline::row_key},
    planner::expression::{AggregateExpression, AggregateFunction, Expression},
    types::{error::DatabaseError, row::Row, value::Value},
};

/// Running state of one aggregate within one group.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum {
        integer: i64,
        real: f64,
        is_real: bool,
        seen: bool,
    },
    Total(f64),
    Avg {
        sum: f64,
        count: i64,
    },
    Extreme {
        best: Option<Value>,
        keep: Ordering,
    },
    Any(Value),
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::CountStar | AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum {
                integer: 0,
                real: 0.0,
                is_real: false,
                seen: false,
            },
            AggregateFunction::Total => Accumulator::Total(0.0),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Extreme {
                best: None,
                keep: Ordering::Less,
            },
            AggregateFunction::Max => Accumulator::Extreme {
                best: None,
                keep: Ordering::Greater,
            },
            AggregateFunction::AnyValue => Accumulator::Any(Value::Null),
        }
    }

    /// Feeds one input value. `COUNT(*)` is fed a non-null marker per row.
    fn update(&mut self, value: Value) -> Result<(), DatabaseError> {
        if let Accumulator::Any(current) = self {
            *current = value;
            return Ok(());
        }
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::Sum {
                integer,
                real,
                is_real,
                seen,
            } => {
                *seen = true;
                match value.to_numeric() {
                    Value::Integer(i) if !*is_real => {
                        *integer = integer
                            .checked_add(i)
                            .ok_or_else(|| DatabaseError::execution("integer overflow"))?;
                    }
                    numeric => {
                        if !*is_real {
                            *is_real = true;
                            *real = *integer as f64;
                        }
                        *real += numeric.as_f64().unwrap_or(0.0);
                    }
                }
            }
            Accumulator::Total(total) => *total += value.to_numeric().as_f64().unwrap_or(0.0),
            Accumulator::Avg { sum, count } => {
                *sum += value.to_numeric().as_f64().unwrap_or(0.0);
                *count += 1;
            }
            Accumulator::Extreme { best, keep } => {
                let replace = match best {
                    Some(current) => value.total_cmp(current) == *keep,
                    None => true,
                };
                if replace {
                    *best = Some(value);
                }
            }
            Accumulator::Any(_) => {}
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(count) => Value::Integer(count),
            Accumulator::Sum { seen: false, .. } => Value::Null,
            Accumulator::Sum {
                integer,
                real,
                is_real,
                ..
            } => {
                if is_real {
                    Value::Real(real)
                } else {
                    Value::Integer(integer)
                }
            }
            Accumulator::Total(total) => Value::Real(total),
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Real(sum / count as f64),
            Accumulator::Extreme { best, .. } => best.unwrap_or(Value::Null),
            Accumulator::Any(value) => value,
        }
    }
}

struct GroupState {
    keys: Vec<Value>,
    accumulators: Vec<Accumulator>,
    distinct_seen: Vec<HashSet<Vec<u8>>>,
}

/// Groups its input by the group-by expressions and computes the aggregates
/// of every group. Groups come out in the order they were first seen. An
/// aggregate without GROUP BY yields exactly one row, even for empty input.
pub struct HashAggregate {
    input: BoxedOperator,
    group_by: Vec<Expression>,
    aggregates: Vec<AggregateExpression>,
    output: std::vec::IntoIter<Row>,
}

impl HashAggregate {
    pub fn new(
        input: BoxedOperator,
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateExpression>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            output: Vec::new().into_iter(),
        }
    }

    fn new_group(&self, keys: Vec<Value>) -> GroupState {
        GroupState {
            keys,
            accumulators: self
                .aggregates
                .iter()
                .map(|aggregate| Accumulator::new(aggregate.function))
                .collect(),
            distinct_seen: vec![HashSet::new(); self.aggregates.len()],
        }
    }

    fn accumulate(&self, group: &mut GroupState, row: &Row) -> Result<(), DatabaseError> {
        for (slot, aggregate) in self.aggregates.iter().enumerate() {
            let value = match (&aggregate.function, &aggregate.arg) {
                (AggregateFunction::CountStar, _) | (_, None) => Value::Integer(1),
                (_, Some(arg)) => evaluate(arg, &row.values)?,
            };
            if aggregate.distinct && !value.is_null() {
                let key = row_key(std::slice::from_ref(&value));
                if !group.distinct_seen[slot].insert(key) {
                    continue;
                }
            }
            group.accumulators[slot].update(value)?;
        }
        Ok(())
    }

    fn compute(&mut self, ctx: &mut ExecContext<'_>) -> Result<Vec<Row>, DatabaseError> {
        let mut groups: Vec<GroupState> = Vec::new();
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();

        while let Some(row) = self.input.next(ctx)? {
            let keys = self
                .group_by
                .iter()
                .map(|expr| evaluate(expr, &row.values))
                .collect::<Result<Vec<_>, _>>()?;
            let slot = match index.get(&row_key(&keys)) {
                Some(&slot) => slot,
                None => {
                    index.insert(row_key(&keys), groups.len());
                    groups.push(self.new_group(keys));
                    groups.len() - 1
                }
            };
            self.accumulate(&mut groups[slot], &row)?;
        }

        if groups.is_empty() && self.group_by.is_empty() {
            groups.push(self.new_group(Vec::new()));
        }

        Ok(groups
            .into_iter()
            .map(|group| {
                let mut values = group.keys;
                values.extend(group.accumulators.into_iter().map(Accumulator::finish));
                Row::new(values)
            })
            .collect())
    }
}

impl Operator for HashAggregate {
    fn open(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), DatabaseError> {
        self.input.open(ctx)?;
        let computed = self.compute(ctx);
        self.input.close();
        self.output = computed?.into_iter();
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecContext<'_>) -> Result<Option<Row>, DatabaseError> {
        Ok(self.output.next())
    }

    fn close(&mut self) {
        self.output = Vec::new().into_iter();
    }
}
