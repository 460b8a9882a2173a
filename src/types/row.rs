use serde::{Deserialize, Serialize};

use crate::types::{RowId, error::DatabaseError, value::Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub row_id: Option<RowId>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            row_id: None,
            values,
        }
    }

    pub fn with_row_id(row_id: RowId, values: Vec<Value>) -> Self {
        Self {
            row_id: Some(row_id),
            values,
        }
    }

    pub fn get_value(&self, column_index: usize) -> Option<&Value> {
        self.values.get(column_index)
    }

    pub fn set_value(&mut self, column_index: usize, value: Value) -> Result<(), DatabaseError> {
        match self.values.get_mut(column_index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DatabaseError::execution(format!(
                "column index {} out of bounds for a row of {} values",
                column_index,
                self.values.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn size(&self) -> usize {
        // value_count (4 bytes) plus every tagged value
        4 + self.values.iter().map(Value::serialized_size).sum::<usize>()
    }

    /// Record payload stored in a B-tree leaf. The row id lives in the
    /// cell key, not in the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.size());
        buffer.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            value.write_to(&mut buffer);
        }
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        let count_bytes: [u8; 4] = bytes
            .get(0..4)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| DatabaseError::SerializationError {
                details: "Incomplete value count".to_string(),
            })?;
        let value_count = u32::from_le_bytes(count_bytes) as usize;

        let mut cursor = 4;
        let mut values = Vec::with_capacity(value_count.min(1024));
        for _ in 0..value_count {
            let (value, consumed) = Value::from_bytes(&bytes[cursor..])?;
            values.push(value);
            cursor += consumed;
        }

        if cursor != bytes.len() {
            return Err(DatabaseError::SerializationError {
                details: format!(
                    "{} trailing bytes after {} values",
                    bytes.len() - cursor,
                    value_count
                ),
            });
        }

        Ok(Row::new(values))
    }

    pub fn decode_with_row_id(row_id: RowId, bytes: &[u8]) -> Result<Self, DatabaseError> {
        let mut row = Self::from_bytes(bytes)?;
        row.row_id = Some(row_id);
        Ok(row)
    }
}
