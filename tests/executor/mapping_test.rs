use lumbung::{
    executor::mapping::{FieldValue, PropertyType, RecordMapper, RecordSchema},
    types::{error::DatabaseError, value::Value},
    utils::mock::TempDatabase,
};

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn convert(value: Value, target: PropertyType) -> Result<FieldValue, DatabaseError> {
    let schema = RecordSchema::new().property("v", target);
    let mapper = RecordMapper::resolve(&schema, &columns(&["v"]));
    let record = mapper.map_row(&[value])?;
    Ok(record.values()[0].clone())
}

#[test]
fn test_properties_bind_by_exact_name() {
    let schema = RecordSchema::new()
        .property("id", PropertyType::Long)
        .property("Name", PropertyType::Text)
        .property("score", PropertyType::Double);
    let mapper = RecordMapper::resolve(&schema, &columns(&["score", "name", "id", "id"]));
    assert_eq!(mapper.bound_count(), 2);

    let record = mapper
        .map_row(&[
            Value::Real(9.5),
            Value::Text("ann".into()),
            Value::Integer(1),
            Value::Integer(2),
        ])
        .unwrap();
    // First column of a duplicated name wins; unmatched properties default
    assert_eq!(record.get_long("id"), Some(1));
    assert_eq!(record.get("Name"), Some(&FieldValue::Null));
    assert_eq!(record.get_double("score"), Some(9.5));
    assert_eq!(record.get("missing"), None);
    assert_eq!(record.values().len(), 3);
}

#[test]
fn test_nulls_and_unbound_properties_take_defaults() {
    let schema = RecordSchema::new()
        .property("i", PropertyType::Int)
        .property("l", PropertyType::Long)
        .property("d", PropertyType::Double)
        .property("b", PropertyType::Bool)
        .property("t", PropertyType::Text)
        .property("x", PropertyType::Blob);
    let mapper = RecordMapper::resolve(&schema, &columns(&["i", "l", "d", "b", "t", "x"]));
    let record = mapper.map_row(&vec![Value::Null; 6]).unwrap();
    assert_eq!(
        record.values(),
        &[
            FieldValue::Int(0),
            FieldValue::Long(0),
            FieldValue::Double(0.0),
            FieldValue::Bool(false),
            FieldValue::Null,
            FieldValue::Null,
        ]
    );

    let unbound = RecordMapper::resolve(&schema, &[]).map_row(&[]).unwrap();
    assert_eq!(unbound.values(), record.values());
    assert!(RecordSchema::new().is_empty());
    assert_eq!(schema.len(), 6);
}

#[test]
fn test_integer_conversions() {
    assert_eq!(convert(Value::Integer(7), PropertyType::Int).unwrap(), FieldValue::Int(7));
    assert_eq!(
        convert(Value::Integer(1 << 40), PropertyType::Long).unwrap(),
        FieldValue::Long(1 << 40)
    );
    assert_eq!(convert(Value::Integer(3), PropertyType::Double).unwrap(), FieldValue::Double(3.0));
    assert_eq!(convert(Value::Integer(2), PropertyType::Bool).unwrap(), FieldValue::Bool(true));
    assert_eq!(convert(Value::Integer(0), PropertyType::Bool).unwrap(), FieldValue::Bool(false));
    assert_eq!(
        convert(Value::Integer(-5), PropertyType::Text).unwrap(),
        FieldValue::Text("-5".into())
    );
    assert!(convert(Value::Integer(1 << 40), PropertyType::Int).is_err());
    assert!(convert(Value::Integer(1), PropertyType::Blob).is_err());
}

#[test]
fn test_real_conversions() {
    assert_eq!(convert(Value::Real(2.5), PropertyType::Double).unwrap(), FieldValue::Double(2.5));
    assert_eq!(convert(Value::Real(4.0), PropertyType::Int).unwrap(), FieldValue::Int(4));
    assert_eq!(convert(Value::Real(-4.0), PropertyType::Long).unwrap(), FieldValue::Long(-4));
    assert_eq!(convert(Value::Real(2.5), PropertyType::Text).unwrap(), FieldValue::Text("2.5".into()));
    assert!(convert(Value::Real(1.5), PropertyType::Int).is_err());
    assert!(convert(Value::Real(f64::NAN), PropertyType::Long).is_err());
    assert!(convert(Value::Real(1e12), PropertyType::Int).is_err());
    assert!(convert(Value::Real(1.0), PropertyType::Bool).is_err());
}

#[test]
fn test_text_and_blob_conversions() {
    assert_eq!(convert(Value::Text("42".into()), PropertyType::Int).unwrap(), FieldValue::Int(42));
    assert_eq!(convert(Value::Text(" 7 ".into()), PropertyType::Long).unwrap(), FieldValue::Long(7));
    assert_eq!(
        convert(Value::Text("0.25".into()), PropertyType::Double).unwrap(),
        FieldValue::Double(0.25)
    );
    assert_eq!(
        convert(Value::Text("hi".into()), PropertyType::Blob).unwrap(),
        FieldValue::Blob(b"hi".to_vec())
    );
    assert_eq!(
        convert(Value::Blob(b"ok".to_vec()), PropertyType::Text).unwrap(),
        FieldValue::Text("ok".into())
    );
    assert_eq!(
        convert(Value::Blob(vec![1, 2]), PropertyType::Blob).unwrap(),
        FieldValue::Blob(vec![1, 2])
    );
    assert!(convert(Value::Text("abc".into()), PropertyType::Int).is_err());
    assert!(convert(Value::Text("1.5".into()), PropertyType::Int).is_err());
    assert!(convert(Value::Text("true".into()), PropertyType::Bool).is_err());
    assert!(convert(Value::Blob(vec![0xFF, 0xFE]), PropertyType::Text).is_err());
    assert!(convert(Value::Blob(vec![1]), PropertyType::Long).is_err());
}

#[test]
fn test_mapping_error_names_property_and_column() {
    let schema = RecordSchema::new().property("age", PropertyType::Int);
    let mapper = RecordMapper::resolve(&schema, &columns(&["age"]));
    match mapper.map_row(&[Value::Text("old".into())]) {
        Err(DatabaseError::Mapping {
            property, column, ..
        }) => {
            assert_eq!(property, "age");
            assert_eq!(column, "age");
        }
        other => panic!("expected a mapping error, got {:?}", other),
    }
}

#[test]
fn test_field_values_serialize_untagged() {
    assert_eq!(serde_json::to_string(&FieldValue::Int(3)).unwrap(), "3");
    assert_eq!(serde_json::to_string(&FieldValue::Null).unwrap(), "null");
    assert_eq!(serde_json::to_string(&FieldValue::Text("a".into())).unwrap(), "\"a\"");
    assert_eq!(serde_json::to_string(&FieldValue::Bool(true)).unwrap(), "true");
}

#[test]
fn test_query_mapped_through_a_connection() -> Result<(), DatabaseError> {
    let temp_db = TempDatabase::with_prefix("mapping_query");
    let mut conn = temp_db.connect()?;
    conn.execute(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, height REAL, active INTEGER, photo BLOB);\
         INSERT INTO people VALUES (1, 'ann', 1.7, 1, x'00FF'), (2, 'bob', NULL, 0, NULL);",
    )?;

    let schema = RecordSchema::new()
        .property("id", PropertyType::Int)
        .property("name", PropertyType::Text)
        .property("height", PropertyType::Double)
        .property("active", PropertyType::Bool)
        .property("photo", PropertyType::Blob)
        .property("nickname", PropertyType::Text);
    let records = conn.query_mapped("SELECT * FROM people ORDER BY id", &schema)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get_int("id"), Some(1));
    assert_eq!(records[0].get_text("name"), Some("ann"));
    assert_eq!(records[0].get_double("height"), Some(1.7));
    assert_eq!(records[0].get_bool("active"), Some(true));
    assert_eq!(records[0].get_blob("photo"), Some(&[0x00, 0xFF][..]));
    assert_eq!(records[0].get("nickname"), Some(&FieldValue::Null));
    assert_eq!(records[1].get_double("height"), Some(0.0));
    assert_eq!(records[1].get_bool("active"), Some(false));
    assert_eq!(records[1].get_blob("photo"), None);

    let aliased = RecordSchema::new().property("n", PropertyType::Long);
    let counted = conn.query_mapped("SELECT count(*) AS n FROM people", &aliased)?;
    assert_eq!(counted[0].get_long("n"), Some(2));

    let strict = RecordSchema::new().property("name", PropertyType::Int);
    assert!(matches!(
        conn.query_mapped("SELECT name FROM people", &strict),
        Err(DatabaseError::Mapping { .. })
    ));
    assert!(matches!(
        conn.query_mapped("DELETE FROM people", &strict),
        Err(DatabaseError::InvalidState { .. })
    ));
    Ok(())
}
