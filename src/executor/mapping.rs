//! Mapping result rows into typed records.
//!
//! The caller describes the record as an ordered list of typed properties.
//! Each property is bound once per query to the first result column with
//! exactly the same name; a value is then converted according to the
//! column's runtime type.

use std::sync::Arc;

use serde::Serialize;

use crate::types::{
    error::DatabaseError,
    value::{Value, parse_numeric},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertyType {
    Int,
    Long,
    Double,
    Text,
    Blob,
    Bool,
}

impl PropertyType {
    /// What a property holds when no column fills it.
    pub fn default_value(self) -> FieldValue {
        match self {
            PropertyType::Int => FieldValue::Int(0),
            PropertyType::Long => FieldValue::Long(0),
            PropertyType::Double => FieldValue::Double(0.0),
            PropertyType::Bool => FieldValue::Bool(false),
            PropertyType::Text | PropertyType::Blob => FieldValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSchema {
    properties: Vec<(String, PropertyType)>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, property_type: PropertyType) -> Self {
        self.properties.push((name.into(), property_type));
        self
    }

    pub fn properties(&self) -> &[(String, PropertyType)] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// One mapped row. Property order follows the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    names: Arc<[String]>,
    values: Vec<FieldValue>,
}

impl Record {
    pub fn get(&self, property: &str) -> Option<&FieldValue> {
        self.names
            .iter()
            .position(|name| name == property)
            .map(|index| &self.values[index])
    }

    pub fn get_int(&self, property: &str) -> Option<i32> {
        match self.get(property)? {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_long(&self, property: &str) -> Option<i64> {
        match self.get(property)? {
            FieldValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, property: &str) -> Option<f64> {
        match self.get(property)? {
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_text(&self, property: &str) -> Option<&str> {
        match self.get(property)? {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_blob(&self, property: &str) -> Option<&[u8]> {
        match self.get(property)? {
            FieldValue::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, property: &str) -> Option<bool> {
        match self.get(property)? {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }
}

/// Property-to-column bindings of one query, resolved before iteration.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    names: Arc<[String]>,
    bindings: Vec<(PropertyType, Option<usize>)>,
    columns: Vec<String>,
}

impl RecordMapper {
    pub fn resolve(schema: &RecordSchema, columns: &[String]) -> Self {
        let bindings = schema
            .properties
            .iter()
            .map(|(name, property_type)| {
                (*property_type, columns.iter().position(|column| column == name))
            })
            .collect();
        Self {
            names: schema.properties.iter().map(|(name, _)| name.clone()).collect(),
            bindings,
            columns: columns.to_vec(),
        }
    }

    /// Number of properties that found a column.
    pub fn bound_count(&self) -> usize {
        self.bindings.iter().filter(|(_, column)| column.is_some()).count()
    }

    pub fn map_row(&self, row: &[Value]) -> Result<Record, DatabaseError> {
        let mut values = Vec::with_capacity(self.bindings.len());
        for (property, (property_type, column)) in self.names.iter().zip(&self.bindings) {
            let value = match column.and_then(|index| row.get(index).map(|v| (index, v))) {
                None | Some((_, Value::Null)) => property_type.default_value(),
                Some((index, value)) => convert(value, *property_type).map_err(|details| {
                    DatabaseError::Mapping {
                        property: property.clone(),
                        column: self.columns[index].clone(),
                        details,
                    }
                })?,
            };
            values.push(value);
        }
        Ok(Record {
            names: Arc::clone(&self.names),
            values,
        })
    }
}

fn convert(value: &Value, target: PropertyType) -> Result<FieldValue, String> {
    let unrepresentable = || {
        format!(
            "{} value {} cannot be represented as {:?}",
            value.column_type(),
            value,
            target
        )
    };
    match (value, target) {
        (Value::Integer(i), PropertyType::Int) => {
            i32::try_from(*i).map(FieldValue::Int).map_err(|_| unrepresentable())
        }
        (Value::Integer(i), PropertyType::Long) => Ok(FieldValue::Long(*i)),
        (Value::Integer(i), PropertyType::Double) => Ok(FieldValue::Double(*i as f64)),
        (Value::Integer(i), PropertyType::Bool) => Ok(FieldValue::Bool(*i != 0)),

        (Value::Real(r), PropertyType::Double) => Ok(FieldValue::Double(*r)),
        (Value::Real(r), PropertyType::Int | PropertyType::Long) => {
            integral(*r, target).ok_or_else(unrepresentable)
        }

        (Value::Text(t), PropertyType::Text) => Ok(FieldValue::Text(t.clone())),
        (Value::Text(t), PropertyType::Blob) => Ok(FieldValue::Blob(t.as_bytes().to_vec())),
        (Value::Text(t), PropertyType::Int | PropertyType::Long | PropertyType::Double) => {
            match parse_numeric(t.trim()) {
                Some(number) => convert(&number, target).map_err(|_| unrepresentable()),
                None => Err(unrepresentable()),
            }
        }

        (Value::Blob(b), PropertyType::Blob) => Ok(FieldValue::Blob(b.clone())),
        (Value::Blob(b), PropertyType::Text) => String::from_utf8(b.clone())
            .map(FieldValue::Text)
            .map_err(|_| unrepresentable()),

        (Value::Integer(_) | Value::Real(_), PropertyType::Text) => {
            Ok(FieldValue::Text(value.to_text()))
        }
        _ => Err(unrepresentable()),
    }
}

fn integral(r: f64, target: PropertyType) -> Option<FieldValue> {
    if !r.is_finite() || r.fract() != 0.0 {
        return None;
    }
    match target {
        PropertyType::Int if r >= i32::MIN as f64 && r <= i32::MAX as f64 => {
            Some(FieldValue::Int(r as i32))
        }
        PropertyType::Long if r >= i64::MIN as f64 && r < i64::MAX as f64 => {
            Some(FieldValue::Long(r as i64))
        }
        _ => None,
    }
}

