use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

use crate::types::error::DatabaseError;

/// Column affinity derived from a declared type name, following SQLite's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl DataType {
    pub fn from_declared(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        if upper.contains("INT") {
            DataType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            DataType::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            DataType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            DataType::Real
        } else {
            DataType::Numeric
        }
    }
}

/// Runtime storage class of a value, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    /// Numeric codes matching the classic SQLite type constants.
    pub fn code(&self) -> i32 {
        match self {
            ColumnType::Integer => 1,
            ColumnType::Float => 2,
            ColumnType::Text => 3,
            ColumnType::Blob => 4,
            ColumnType::Null => 5,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Null => "NULL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

// On-disk type discriminants
const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
            Value::Blob(_) => ColumnType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn serialized_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Integer(_) | Value::Real(_) => 9,
            Value::Text(s) => 5 + s.len(),
            Value::Blob(b) => 5 + b.len(),
        }
    }

    /// Appends the tagged little-endian encoding of this value to `buffer`.
    pub fn write_to(&self, buffer: &mut Vec<u8>) {
        match self {
            Value::Null => buffer.push(TAG_NULL),
            Value::Integer(i) => {
                buffer.push(TAG_INTEGER);
                buffer.extend_from_slice(&i.to_le_bytes());
            }
            Value::Real(r) => {
                buffer.push(TAG_REAL);
                buffer.extend_from_slice(&r.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                buffer.push(TAG_TEXT);
                buffer.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buffer.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                buffer.push(TAG_BLOB);
                buffer.extend_from_slice(&(b.len() as u32).to_le_bytes());
                buffer.extend_from_slice(b);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buffer);
        buffer
    }

    /// Decodes one value, returning it with the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Value, usize), DatabaseError> {
        let Some(&tag) = bytes.first() else {
            return Err(DatabaseError::SerializationError {
                details: "Empty value bytes".to_string(),
            });
        };
        match tag {
            TAG_NULL => Ok((Value::Null, 1)),
            TAG_INTEGER => {
                let raw = fixed_bytes::<8>(bytes, 1)?;
                Ok((Value::Integer(i64::from_le_bytes(raw)), 9))
            }
            TAG_REAL => {
                let raw = fixed_bytes::<8>(bytes, 1)?;
                Ok((Value::Real(f64::from_bits(u64::from_le_bytes(raw))), 9))
            }
            TAG_TEXT | TAG_BLOB => {
                let len = u32::from_le_bytes(fixed_bytes::<4>(bytes, 1)?) as usize;
                let end = 5 + len;
                if bytes.len() < end {
                    return Err(DatabaseError::SerializationError {
                        details: format!("value needs {} bytes, only {} left", end, bytes.len()),
                    });
                }
                let body = &bytes[5..end];
                let value = if tag == TAG_TEXT {
                    let text = std::str::from_utf8(body).map_err(|e| {
                        DatabaseError::SerializationError {
                            details: format!("invalid UTF-8 in text value: {}", e),
                        }
                    })?;
                    Value::Text(text.to_string())
                } else {
                    Value::Blob(body.to_vec())
                };
                Ok((value, end))
            }
            other => Err(DatabaseError::SerializationError {
                details: format!("unknown value type tag {}", other),
            }),
        }
    }

    /// Applies a column affinity the way SQLite does when a value is stored.
    pub fn apply_affinity(self, affinity: DataType) -> Value {
        match affinity {
            DataType::Blob => self,
            DataType::Text => match self {
                Value::Integer(_) | Value::Real(_) => Value::Text(self.to_text()),
                other => other,
            },
            DataType::Integer | DataType::Numeric => match self {
                Value::Text(ref s) => match parse_numeric(s) {
                    Some(n) => n.apply_affinity(affinity),
                    None => self,
                },
                Value::Real(r) => real_to_integer(r).map(Value::Integer).unwrap_or(self),
                other => other,
            },
            DataType::Real => match self {
                Value::Integer(i) => Value::Real(i as f64),
                Value::Text(ref s) => match parse_numeric(s) {
                    Some(Value::Integer(i)) => Value::Real(i as f64),
                    Some(real) => real,
                    None => self,
                },
                other => other,
            },
        }
    }

    /// Numeric view used by arithmetic; text that does not parse counts as 0.
    pub fn to_numeric(&self) -> Value {
        match self {
            Value::Integer(_) | Value::Real(_) | Value::Null => self.clone(),
            Value::Text(s) => parse_numeric_prefix(s),
            Value::Blob(b) => parse_numeric_prefix(&String::from_utf8_lossy(b)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.to_numeric() {
            Value::Integer(i) => Some(i as f64),
            Value::Real(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.to_numeric() {
            Value::Integer(i) => Some(i),
            Value::Real(r) => Some(r as i64),
            _ => None,
        }
    }

    /// Text rendering used by `||`, CAST and the text accessors.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => format_real(*r),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// SQL truth value: `None` for NULL.
    pub fn truthiness(&self) -> Option<bool> {
        match self.to_numeric() {
            Value::Null => None,
            Value::Integer(i) => Some(i != 0),
            Value::Real(r) => Some(r != 0.0),
            _ => Some(false),
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    /// Total order used by ORDER BY, DISTINCT and grouping:
    /// NULL < numbers < text < blob.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
            (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => self.class_rank().cmp(&other.class_rank()),
        }
    }

    /// Encoding that is equal for values that compare equal, used as a hash key.
    pub fn key_bytes(&self, buffer: &mut Vec<u8>) {
        match self {
            Value::Real(r) => match real_to_integer(*r) {
                Some(i) => Value::Integer(i).write_to(buffer),
                None => self.write_to(buffer),
            },
            other => other.write_to(buffer),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Blob(b) => {
                f.write_str("X'")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                f.write_str("'")
            }
            other => f.write_str(&other.to_text()),
        }
    }
}

fn fixed_bytes<const N: usize>(bytes: &[u8], start: usize) -> Result<[u8; N], DatabaseError> {
    bytes
        .get(start..start + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| DatabaseError::SerializationError {
            details: format!("value truncated: needed {} bytes at offset {}", N, start),
        })
}

/// Integral reals within i64 range convert exactly.
fn real_to_integer(r: f64) -> Option<i64> {
    if r.is_finite() && r.fract() == 0.0 && r >= i64::MIN as f64 && r < i64::MAX as f64 {
        Some(r as i64)
    } else {
        None
    }
}

/// Parses text that is entirely a number (surrounding whitespace allowed).
pub fn parse_numeric(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let looks_numeric = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !looks_numeric {
        return None;
    }
    trimmed.parse::<f64>().ok().map(Value::Real)
}

/// Longest numeric prefix, or integer 0 when there is none.
fn parse_numeric_prefix(text: &str) -> Value {
    let trimmed = text.trim_start();
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut best = Value::Integer(0);
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        let accept = c.is_ascii_digit()
            || (c == b'.' && !seen_dot && !seen_exp)
            || ((c == b'e' || c == b'E') && !seen_exp && end > 0)
            || ((c == b'+' || c == b'-') && end > 0 && matches!(bytes[end - 1], b'e' | b'E'));
        if !accept {
            break;
        }
        seen_dot |= c == b'.';
        seen_exp |= c == b'e' || c == b'E';
        end += 1;
        if let Some(v) = parse_numeric(&trimmed[..end]) {
            best = v;
        }
    }
    best
}

/// Reals always render with a fractional part, as SQLite does.
pub fn format_real(r: f64) -> String {
    if r.is_finite() && r.fract() == 0.0 && r.abs() < 1e15 {
        format!("{:.1}", r)
    } else {
        format!("{}", r)
    }
}
