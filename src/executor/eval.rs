//! Expression evaluation with SQL's three-valued logic.
//!
//! NULL propagates through arithmetic and comparisons; `AND`/`OR` follow
//! Kleene logic. Integer arithmetic that overflows continues in floating
//! point, and division or remainder by zero yields NULL.

use std::cmp::Ordering;

use crate::{
    planner::{
        ast::{BinaryOp, UnaryOp},
        expression::{Expression, ScalarFunction},
    },
    types::{
        error::DatabaseError,
        value::{DataType, Value},
    },
};

pub fn evaluate(expr: &Expression, row: &[Value]) -> Result<Value, DatabaseError> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Column(index) => row.get(*index).cloned().ok_or_else(|| {
            DatabaseError::execution(format!(
                "column {} out of range for a row of {} values",
                index,
                row.len()
            ))
        }),
        Expression::Unary { op, expr } => {
            let value = evaluate(expr, row)?;
            Ok(match op {
                UnaryOp::Neg => negate(&value),
                UnaryOp::Plus => value,
                UnaryOp::Not => from_truth(value.truthiness().map(|b| !b)),
            })
        }
        Expression::Binary { left, op, right } => match op {
            BinaryOp::And => {
                let l = evaluate(left, row)?.truthiness();
                if l == Some(false) {
                    return Ok(Value::Integer(0));
                }
                let r = evaluate(right, row)?.truthiness();
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Integer(0),
                    (Some(true), Some(true)) => Value::Integer(1),
                    _ => Value::Null,
                })
            }
            BinaryOp::Or => {
                let l = evaluate(left, row)?.truthiness();
                if l == Some(true) {
                    return Ok(Value::Integer(1));
                }
                let r = evaluate(right, row)?.truthiness();
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Integer(1),
                    (Some(false), Some(false)) => Value::Integer(0),
                    _ => Value::Null,
                })
            }
            _ => {
                let l = evaluate(left, row)?;
                let r = evaluate(right, row)?;
                Ok(binary(*op, &l, &r))
            }
        },
        Expression::IsNull { expr, negated } => {
            let is_null = evaluate(expr, row)?.is_null();
            Ok(from_bool(is_null != *negated))
        }
        Expression::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = evaluate(expr, row)?;
            let pattern = evaluate(pattern, row)?;
            if value.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let matched = like_matches(&value.to_text(), &pattern.to_text());
            Ok(from_bool(matched != *negated))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, row)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                match compare(&value, &evaluate(item, row)?) {
                    Some(Ordering::Equal) => return Ok(from_bool(!*negated)),
                    Some(_) => {}
                    None => saw_null = true,
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                from_bool(*negated)
            })
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = evaluate(expr, row)?;
            let above = compare(&value, &evaluate(low, row)?).map(|o| o != Ordering::Less);
            let below = compare(&value, &evaluate(high, row)?).map(|o| o != Ordering::Greater);
            let inside = match (above, below) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            Ok(from_truth(inside.map(|b| b != *negated)))
        }
        Expression::Cast { expr, target } => Ok(cast(evaluate(expr, row)?, *target)),
        Expression::Function { function, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, row))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, values)
        }
    }
}

/// True only when the predicate evaluates to a true value; NULL is false.
pub fn is_true(expr: &Expression, row: &[Value]) -> Result<bool, DatabaseError> {
    Ok(evaluate(expr, row)?.truthiness() == Some(true))
}

/// SQL comparison: `None` when either side is NULL.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        None
    } else {
        Some(left.total_cmp(right))
    }
}

fn from_bool(b: bool) -> Value {
    Value::Integer(i64::from(b))
}

fn from_truth(truth: Option<bool>) -> Value {
    truth.map(from_bool).unwrap_or(Value::Null)
}

fn negate(value: &Value) -> Value {
    match value.to_numeric() {
        Value::Integer(i) => i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or(Value::Real(-(i as f64))),
        Value::Real(r) => Value::Real(-r),
        other => other,
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    match op {
        BinaryOp::Is => from_bool(null_safe_equal(l, r)),
        BinaryOp::IsNot => from_bool(!null_safe_equal(l, r)),
        _ if l.is_null() || r.is_null() => Value::Null,
        BinaryOp::Concat => Value::Text(format!("{}{}", l.to_text(), r.to_text())),
        BinaryOp::Eq => from_bool(l.total_cmp(r) == Ordering::Equal),
        BinaryOp::NotEq => from_bool(l.total_cmp(r) != Ordering::Equal),
        BinaryOp::Lt => from_bool(l.total_cmp(r) == Ordering::Less),
        BinaryOp::LtEq => from_bool(l.total_cmp(r) != Ordering::Greater),
        BinaryOp::Gt => from_bool(l.total_cmp(r) == Ordering::Greater),
        BinaryOp::GtEq => from_bool(l.total_cmp(r) != Ordering::Less),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, l.to_numeric(), r.to_numeric())
        }
        // Short-circuit operators are handled by the caller.
        BinaryOp::And | BinaryOp::Or => Value::Null,
    }
}

fn null_safe_equal(l: &Value, r: &Value) -> bool {
    match (l.is_null(), r.is_null()) {
        (true, true) => true,
        (false, false) => l.total_cmp(r) == Ordering::Equal,
        _ => false,
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Value {
    if let (Value::Integer(a), Value::Integer(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return Value::Null,
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod if b == 0 => return Value::Null,
            BinaryOp::Mod => Some(a.checked_rem(b).unwrap_or(0)),
            _ => None,
        };
        if let Some(result) = exact {
            return Value::Integer(result);
        }
    }

    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Value::Null;
    };
    match op {
        BinaryOp::Add => Value::Real(a + b),
        BinaryOp::Sub => Value::Real(a - b),
        BinaryOp::Mul => Value::Real(a * b),
        BinaryOp::Div if b == 0.0 => Value::Null,
        BinaryOp::Div => Value::Real(a / b),
        BinaryOp::Mod => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                Value::Null
            } else {
                Value::Real(a.checked_rem(b).unwrap_or(0) as f64)
            }
        }
        _ => Value::Null,
    }
}

/// CAST semantics: unlike storage affinity, text that is not a number
/// converts through its longest numeric prefix.
pub fn cast(value: Value, target: DataType) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match target {
        DataType::Integer => match value.to_numeric() {
            Value::Real(r) => Value::Integer(r as i64),
            other => other,
        },
        DataType::Real => value.as_f64().map(Value::Real).unwrap_or(Value::Null),
        DataType::Numeric => value.to_numeric().apply_affinity(DataType::Numeric),
        DataType::Text => Value::Text(value.to_text()),
        DataType::Blob => match value {
            Value::Blob(bytes) => Value::Blob(bytes),
            other => Value::Blob(other.to_text().into_bytes()),
        },
    }
}

/// `LIKE` matching: `%` spans any run, `_` one character, and ASCII letters
/// compare case-insensitively.
pub fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for p in pattern.chars().map(|c| c.to_ascii_lowercase()) {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for i in 0..=text.len() {
                    seen |= reachable[i];
                    next[i] = seen;
                }
            }
            '_' => {
                for i in 1..=text.len() {
                    next[i] = reachable[i - 1];
                }
            }
            c => {
                for i in 1..=text.len() {
                    next[i] = reachable[i - 1] && text[i - 1] == c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

fn call(function: ScalarFunction, mut args: Vec<Value>) -> Result<Value, DatabaseError> {
    let first = args.first().cloned().unwrap_or(Value::Null);
    let value = match function {
        ScalarFunction::Coalesce | ScalarFunction::IfNull => args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        ScalarFunction::TypeOf => Value::Text(
            match first {
                Value::Null => "null",
                Value::Integer(_) => "integer",
                Value::Real(_) => "real",
                Value::Text(_) => "text",
                Value::Blob(_) => "blob",
            }
            .to_string(),
        ),
        ScalarFunction::Hex => {
            let bytes = match first {
                Value::Null => Vec::new(),
                Value::Blob(bytes) => bytes,
                other => other.to_text().into_bytes(),
            };
            Value::Text(bytes.iter().map(|b| format!("{:02X}", b)).collect())
        }
        ScalarFunction::Min | ScalarFunction::Max => {
            if args.iter().any(Value::is_null) {
                Value::Null
            } else {
                let pick = |a: Value, b: Value| {
                    let take_b = match function {
                        ScalarFunction::Min => b.total_cmp(&a) == Ordering::Less,
                        _ => b.total_cmp(&a) == Ordering::Greater,
                    };
                    if take_b { b } else { a }
                };
                let first = args.remove(0);
                args.into_iter().fold(first, pick)
            }
        }
        _ if first.is_null() => Value::Null,
        ScalarFunction::Upper => Value::Text(first.to_text().to_ascii_uppercase()),
        ScalarFunction::Lower => Value::Text(first.to_text().to_ascii_lowercase()),
        ScalarFunction::Length => Value::Integer(match &first {
            Value::Blob(bytes) => bytes.len() as i64,
            other => other.to_text().chars().count() as i64,
        }),
        ScalarFunction::Abs => match first.to_numeric() {
            Value::Integer(i) => Value::Integer(
                i.checked_abs()
                    .ok_or_else(|| DatabaseError::execution("integer overflow"))?,
            ),
            Value::Real(r) => Value::Real(r.abs()),
            other => other,
        },
        ScalarFunction::Round => {
            let digits = match args.get(1) {
                Some(Value::Null) => return Ok(Value::Null),
                Some(d) => d.as_i64().unwrap_or(0).clamp(0, 15),
                None => 0,
            };
            match first.as_f64() {
                Some(x) => {
                    let scale = 10f64.powi(digits as i32);
                    Value::Real((x * scale).round() / scale)
                }
                None => Value::Null,
            }
        }
        ScalarFunction::Substr => substr(&first, &args[1..])?,
    };
    Ok(value)
}

/// `substr(x, start [, length])` with 1-based, possibly negative positions.
/// Text is indexed by character, blobs by byte.
fn substr(value: &Value, args: &[Value]) -> Result<Value, DatabaseError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let start = args.first().and_then(Value::as_i64).unwrap_or(0);
    let (mut p1, mut p2) = (start, args.get(1).and_then(Value::as_i64).unwrap_or(i64::MAX / 2));

    let chars: Vec<char> = match value {
        Value::Blob(_) => Vec::new(),
        other => other.to_text().chars().collect(),
    };
    let len = match value {
        Value::Blob(bytes) => bytes.len() as i64,
        _ => chars.len() as i64,
    };

    let negative_length = p2 < 0;
    if negative_length {
        p2 = -p2;
    }
    if p1 < 0 {
        p1 += len;
        if p1 < 0 {
            p2 = (p2 + p1).max(0);
            p1 = 0;
        }
    } else if p1 > 0 {
        p1 -= 1;
    } else if p2 > 0 {
        p2 -= 1;
    }
    if negative_length {
        p1 -= p2;
        if p1 < 0 {
            p2 += p1;
            p1 = 0;
        }
    }
    if p1 + p2 > len {
        p2 = (len - p1).max(0);
    }
    let (begin, end) = (p1.clamp(0, len) as usize, (p1 + p2).clamp(0, len) as usize);

    Ok(match value {
        Value::Blob(bytes) => Value::Blob(bytes[begin..end].to_vec()),
        _ => Value::Text(chars[begin..end].iter().collect()),
    })
}
