use std::cmp::Ordering;

use lumbung::types::value::{ColumnType, DataType, Value, format_real, parse_numeric};

#[test]
fn test_column_type_reports_runtime_class() {
    assert_eq!(Value::Null.column_type(), ColumnType::Null);
    assert_eq!(Value::Integer(42).column_type(), ColumnType::Integer);
    assert_eq!(Value::Real(2.5).column_type(), ColumnType::Float);
    assert_eq!(Value::Text("hi".into()).column_type(), ColumnType::Text);
    assert_eq!(Value::Blob(vec![1]).column_type(), ColumnType::Blob);

    assert_eq!(ColumnType::Integer.code(), 1);
    assert_eq!(ColumnType::Null.code(), 5);
    assert_eq!(ColumnType::Float.to_string(), "FLOAT");
}

#[test]
fn test_affinity_from_declared_type() {
    assert_eq!(DataType::from_declared("INTEGER"), DataType::Integer);
    assert_eq!(DataType::from_declared("bigint"), DataType::Integer);
    assert_eq!(DataType::from_declared("VARCHAR(20)"), DataType::Text);
    assert_eq!(DataType::from_declared("BLOB"), DataType::Blob);
    assert_eq!(DataType::from_declared(""), DataType::Blob);
    assert_eq!(DataType::from_declared("DOUBLE"), DataType::Real);
    assert_eq!(DataType::from_declared("DECIMAL"), DataType::Numeric);
}

#[test]
fn test_apply_affinity_converts_on_store() {
    assert_eq!(
        Value::Text("42".into()).apply_affinity(DataType::Integer),
        Value::Integer(42)
    );
    assert_eq!(
        Value::Text("abc".into()).apply_affinity(DataType::Integer),
        Value::Text("abc".into())
    );
    assert_eq!(Value::Real(3.0).apply_affinity(DataType::Integer), Value::Integer(3));
    assert_eq!(Value::Real(3.5).apply_affinity(DataType::Integer), Value::Real(3.5));
    assert_eq!(Value::Integer(7).apply_affinity(DataType::Real), Value::Real(7.0));
    assert_eq!(
        Value::Integer(7).apply_affinity(DataType::Text),
        Value::Text("7".into())
    );
    assert_eq!(Value::Null.apply_affinity(DataType::Integer), Value::Null);
    assert_eq!(
        Value::Text("7".into()).apply_affinity(DataType::Blob),
        Value::Text("7".into())
    );
}

#[test]
fn test_total_order_across_classes() {
    let mut values = vec![
        Value::Blob(vec![0]),
        Value::Text("b".into()),
        Value::Integer(10),
        Value::Null,
        Value::Real(2.5),
        Value::Text("a".into()),
    ];
    values.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(
        values,
        vec![
            Value::Null,
            Value::Real(2.5),
            Value::Integer(10),
            Value::Text("a".into()),
            Value::Text("b".into()),
            Value::Blob(vec![0]),
        ]
    );
    assert_eq!(Value::Integer(3).total_cmp(&Value::Real(3.0)), Ordering::Equal);
}

#[test]
fn test_key_bytes_equal_for_equal_numbers() {
    let mut a = Vec::new();
    let mut b = Vec::new();
    Value::Integer(5).key_bytes(&mut a);
    Value::Real(5.0).key_bytes(&mut b);
    assert_eq!(a, b);

    let mut c = Vec::new();
    Value::Real(5.5).key_bytes(&mut c);
    assert_ne!(a, c);
}

#[test]
fn test_numeric_views() {
    assert_eq!(Value::Text("12abc".into()).to_numeric(), Value::Integer(12));
    assert_eq!(Value::Text("abc".into()).to_numeric(), Value::Integer(0));
    assert_eq!(Value::Text(" 1.5".into()).as_f64(), Some(1.5));
    assert_eq!(Value::Real(2.9).as_i64(), Some(2));
    assert_eq!(Value::Null.as_i64(), None);

    assert_eq!(Value::Integer(0).truthiness(), Some(false));
    assert_eq!(Value::Text("1".into()).truthiness(), Some(true));
    assert_eq!(Value::Null.truthiness(), None);
}

#[test]
fn test_parse_numeric_is_whole_string_only() {
    assert_eq!(parse_numeric(" 17 "), Some(Value::Integer(17)));
    assert_eq!(parse_numeric("-2.5e1"), Some(Value::Real(-25.0)));
    assert_eq!(parse_numeric("1x"), None);
    assert_eq!(parse_numeric(""), None);
    assert_eq!(parse_numeric("inf"), None);
}

#[test]
fn test_text_rendering() {
    assert_eq!(format_real(3.0), "3.0");
    assert_eq!(format_real(0.25), "0.25");
    assert_eq!(Value::Real(1.0).to_text(), "1.0");
    assert_eq!(Value::Null.to_text(), "");
    assert_eq!(Value::Null.to_string(), "NULL");
    assert_eq!(Value::Blob(vec![0xAB, 0x01]).to_string(), "X'AB01'");
}

#[test]
fn test_value_encoding_reports_consumed_bytes() {
    let value = Value::Text("héllo".into());
    let mut bytes = value.to_bytes();
    assert_eq!(bytes.len(), value.serialized_size());
    bytes.extend_from_slice(&[0xFF, 0xFF]);

    let (decoded, consumed) = Value::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(consumed, value.serialized_size());
}

#[test]
fn test_value_decoding_rejects_bad_input() {
    assert!(Value::from_bytes(&[]).is_err());
    assert!(Value::from_bytes(&[9]).is_err());
    // Integer tag with only four payload bytes
    assert!(Value::from_bytes(&[1, 0, 0, 0, 0]).is_err());
    // Text claiming ten bytes with two present
    assert!(Value::from_bytes(&[3, 10, 0, 0, 0, b'a', b'b']).is_err());
    // Invalid UTF-8 in a text value
    assert!(Value::from_bytes(&[3, 1, 0, 0, 0, 0xFF]).is_err());
}
