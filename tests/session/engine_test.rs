//! The engine arena is process-wide, so its whole lifecycle is exercised by
//! a single test.

use lumbung::{
    Config, EngineConfig, ErrorKind, QueryFormat, engine,
    executor::mapping::{PropertyType, RecordSchema},
    types::value::{ColumnType, Value},
    utils::mock::TempDatabase,
};

#[test]
fn test_engine_lifecycle() {
    let temp_db = TempDatabase::with_prefix("engine_lifecycle");

    // Nothing works before initialize
    assert!(!engine::is_initialized());
    assert_eq!(engine::open_handles(), None);
    assert_eq!(engine::open_statements(), None);
    assert_eq!(
        engine::open(temp_db.path()).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    let config = Config::default().with_engine(EngineConfig::default().with_max_open_handles(2));
    engine::initialize(config).unwrap();
    engine::initialize(Config::default()).unwrap();
    assert_eq!(engine::open_handles(), Some(0));

    let db = engine::open(temp_db.path()).unwrap();
    engine::execute(
        db,
        "CREATE TABLE pets (id INTEGER PRIMARY KEY, name TEXT, weight REAL);
         INSERT INTO pets (name, weight) VALUES ('rex', 12.5), ('tom', 4.0), ('kit', NULL);",
    )
    .unwrap();

    // Stepping through a statement handle
    let stmt = engine::prepare(db, "SELECT id, name, weight FROM pets ORDER BY id").unwrap();
    assert_eq!(engine::column_names(stmt).unwrap(), vec!["id", "name", "weight"]);
    assert!(engine::step(stmt).unwrap());
    assert_eq!(engine::get_column(stmt, "name").unwrap(), Value::Text("rex".into()));
    assert_eq!(engine::get_column_type(stmt, "weight").unwrap(), ColumnType::Float);
    assert!(engine::step(stmt).unwrap());
    assert!(engine::step(stmt).unwrap());
    assert_eq!(engine::get_column_type(stmt, "weight").unwrap(), ColumnType::Null);
    assert!(!engine::step(stmt).unwrap());
    // The finished statement's handle is gone
    assert_eq!(engine::open_statements(), Some(0));
    assert_eq!(
        engine::step(stmt).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert!(engine::cancel(stmt).is_err());

    for _ in 0..1000 {
        let each = engine::prepare(db, "SELECT count(*) FROM pets").unwrap();
        assert!(engine::step(each).unwrap());
        assert!(!engine::step(each).unwrap());
    }
    assert_eq!(engine::open_statements(), Some(0));

    // Cancelling mid-way releases the handle
    let partial = engine::prepare(db, "SELECT name FROM pets").unwrap();
    assert!(engine::step(partial).unwrap());
    engine::cancel(partial).unwrap();
    assert!(engine::get_column(partial, "name").is_err());

    // A failing step releases the handle too
    let failing = engine::prepare(db, "SELECT sum(9223372036854775807) FROM pets").unwrap();
    assert_eq!(engine::step(failing).unwrap_err().kind(), ErrorKind::Execution);
    assert_eq!(
        engine::step(failing).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    let schema = RecordSchema::new()
        .property("name", PropertyType::Text)
        .property("weight", PropertyType::Double);
    let records = engine::query_mapped(db, "SELECT * FROM pets ORDER BY id", &schema).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].get_text("name"), Some("tom"));
    assert_eq!(records[2].get_double("weight"), Some(0.0));
    assert_eq!(
        engine::query_json(db, "SELECT name FROM pets WHERE weight > 5", QueryFormat::Json).unwrap(),
        r#"[{"name":"rex"}]"#
    );

    // Handle limit
    let second = engine::open(temp_db.path()).unwrap();
    assert_eq!(engine::open_handles(), Some(2));
    let err = engine::open(temp_db.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(
        engine::query_json(second, "SELECT count(*) FROM pets", QueryFormat::Raw).unwrap(),
        "3"
    );

    // Statements die with their handle
    let orphan = engine::prepare(second, "SELECT * FROM pets").unwrap();
    engine::close(second).unwrap();
    assert_eq!(engine::open_handles(), Some(1));
    assert!(engine::step(orphan).is_err());
    assert!(engine::execute(second, "SELECT 1").is_err());

    engine::shutdown();
    assert!(!engine::is_initialized());
    assert_eq!(
        engine::execute(db, "SELECT 1").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    engine::shutdown();

    // Shutdown released the file; a plain connection sees the data
    let mut conn = temp_db.connect().unwrap();
    assert_eq!(
        conn.query_json("SELECT count(*) FROM pets", QueryFormat::Raw).unwrap(),
        "3"
    );
}
