use lumbung::{
    executor::{
        CommandOutcome, ExecContext, build_operator, collect_rows, execute_command,
        insert::TableInserter,
    },
    planner::{PlanBuilder, parse_statement},
    storage::{bplus_tree::BPlusTree, schema::SchemaManager, storage_manager::StorageManager},
    types::{error::DatabaseError, row::Row, value::Value},
    utils::mock::TempDatabase,
};

fn run(
    storage: &mut StorageManager,
    schemas: &mut SchemaManager,
    sql: &str,
) -> Result<CommandOutcome, DatabaseError> {
    let statement = parse_statement(sql)?;
    let planned = PlanBuilder::new(schemas, sql).build(&statement)?;
    execute_command(&planned.plan, storage, schemas)
}

fn query(
    storage: &mut StorageManager,
    schemas: &SchemaManager,
    sql: &str,
) -> Result<Vec<Vec<Value>>, DatabaseError> {
    let statement = parse_statement(sql)?;
    let planned = PlanBuilder::new(schemas, sql).build(&statement)?;
    let mut operator = build_operator(&planned.plan)?;
    let mut ctx = ExecContext::new(storage);
    let rows = collect_rows(operator.as_mut(), &mut ctx)?;
    Ok(rows.into_iter().map(|row| row.values).collect())
}

fn setup(prefix: &str) -> (TempDatabase, SchemaManager) {
    let mut temp_db = TempDatabase::with_prefix(prefix);
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::load(storage).unwrap();
    run(
        storage,
        &mut schemas,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE, age INTEGER DEFAULT 18)",
    )
    .unwrap();
    (temp_db, schemas)
}

#[test]
fn test_table_inserter_assigns_rowids() -> Result<(), DatabaseError> {
    let mut temp_db = TempDatabase::with_prefix("insert_rowids");
    let storage = temp_db.create_storage_manager()?;
    let mut schemas = SchemaManager::load(storage)?;
    run(storage, &mut schemas, "CREATE TABLE t (a TEXT, b INTEGER)")?;
    let table = schemas.lookup_table("t")?.clone();

    let mut inserter = TableInserter::new(storage, &table);
    let first = inserter.insert(None, vec![Value::Text("x".into()), Value::Integer(1)])?;
    let explicit = inserter.insert(Some(10), vec![Value::Text("y".into()), Value::Integer(2)])?;
    let next = inserter.insert(None, vec![Value::Text("z".into()), Value::Integer(3)])?;
    assert_eq!((first, explicit, next), (1, 10, 11));

    let err = inserter
        .insert(Some(10), vec![Value::Null, Value::Null])
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ConstraintViolation { .. }));

    let batch = inserter.insert_batch(vec![
        (None, vec![Value::Null, Value::Null]),
        (Some(-5), vec![Value::Null, Value::Null]),
    ])?;
    assert_eq!(batch, vec![12, -5]);

    let stored = BPlusTree::new(table.root_page_id).get(storage, 10)?.unwrap();
    assert_eq!(
        Row::from_bytes(&stored)?.values,
        vec![Value::Text("y".into()), Value::Integer(2)]
    );
    Ok(())
}

#[test]
fn test_insert_statement_outcome() -> Result<(), DatabaseError> {
    let (mut temp_db, mut schemas) = setup("insert_outcome");
    let storage = temp_db.get_storage_manager().unwrap();

    let outcome = run(
        storage,
        &mut schemas,
        "INSERT INTO users (name, email) VALUES ('ann', 'ann@x'), ('bob', NULL), ('cy', NULL)",
    )?;
    assert_eq!(outcome.changes, 3);
    assert_eq!(outcome.last_insert_rowid, Some(3));

    let rows = query(storage, &schemas, "SELECT id, name, email, age FROM users")?;
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Text("ann".into()), Value::Text("ann@x".into()), Value::Integer(18)],
            vec![Value::Integer(2), Value::Text("bob".into()), Value::Null, Value::Integer(18)],
            vec![Value::Integer(3), Value::Text("cy".into()), Value::Null, Value::Integer(18)],
        ]
    );
    Ok(())
}

#[test]
fn test_integer_primary_key_is_the_rowid() -> Result<(), DatabaseError> {
    let (mut temp_db, mut schemas) = setup("insert_ipk");
    let storage = temp_db.get_storage_manager().unwrap();

    run(storage, &mut schemas, "INSERT INTO users VALUES (100, 'a', NULL, 1)")?;
    run(storage, &mut schemas, "INSERT INTO users VALUES ('7', 'b', NULL, 2)")?;
    let outcome = run(storage, &mut schemas, "INSERT INTO users VALUES (NULL, 'c', NULL, 3)")?;
    assert_eq!(outcome.last_insert_rowid, Some(101));

    let rows = query(storage, &schemas, "SELECT rowid, id FROM users")?;
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(7), Value::Integer(7)],
            vec![Value::Integer(100), Value::Integer(100)],
            vec![Value::Integer(101), Value::Integer(101)],
        ]
    );

    // The key column is not duplicated inside the record
    let table = schemas.lookup_table("users")?;
    let stored = BPlusTree::new(table.root_page_id).get(storage, 100)?.unwrap();
    assert_eq!(Row::from_bytes(&stored)?.values[0], Value::Null);

    assert!(matches!(
        run(storage, &mut schemas, "INSERT INTO users VALUES (100, 'dup', NULL, 1)"),
        Err(DatabaseError::ConstraintViolation { .. })
    ));
    assert!(matches!(
        run(storage, &mut schemas, "INSERT INTO users VALUES ('abc', 'bad', NULL, 1)"),
        Err(DatabaseError::TypeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_rowid_can_be_targeted_directly() -> Result<(), DatabaseError> {
    let mut temp_db = TempDatabase::with_prefix("insert_rowid_column");
    let storage = temp_db.create_storage_manager()?;
    let mut schemas = SchemaManager::load(storage)?;
    run(storage, &mut schemas, "CREATE TABLE t (v TEXT)")?;
    run(storage, &mut schemas, "INSERT INTO t (rowid, v) VALUES (42, 'x')")?;
    run(storage, &mut schemas, "INSERT INTO t (v) VALUES ('y')")?;

    let rows = query(storage, &schemas, "SELECT _rowid_, v FROM t")?;
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(42), Value::Text("x".into())],
            vec![Value::Integer(43), Value::Text("y".into())],
        ]
    );
    Ok(())
}

#[test]
fn test_constraints_are_enforced() -> Result<(), DatabaseError> {
    let (mut temp_db, mut schemas) = setup("insert_constraints");
    let storage = temp_db.get_storage_manager().unwrap();

    run(storage, &mut schemas, "INSERT INTO users (name, email) VALUES ('a', 'same')")?;
    let not_null = run(storage, &mut schemas, "INSERT INTO users (email) VALUES ('other')");
    assert!(matches!(not_null, Err(DatabaseError::ConstraintViolation { ref details }) if details.contains("NOT NULL")));
    let unique = run(storage, &mut schemas, "INSERT INTO users (name, email) VALUES ('b', 'same')");
    assert!(matches!(unique, Err(DatabaseError::ConstraintViolation { ref details }) if details.contains("UNIQUE")));

    // NULLs never collide under UNIQUE
    run(storage, &mut schemas, "INSERT INTO users (name) VALUES ('c'), ('d')")?;
    assert_eq!(query(storage, &schemas, "SELECT name FROM users")?.len(), 3);
    Ok(())
}

#[test]
fn test_column_affinity_on_insert() -> Result<(), DatabaseError> {
    let mut temp_db = TempDatabase::with_prefix("insert_affinity");
    let storage = temp_db.create_storage_manager()?;
    let mut schemas = SchemaManager::load(storage)?;
    run(storage, &mut schemas, "CREATE TABLE t (i INTEGER, r REAL, s TEXT, n NUMERIC, b BLOB)")?;
    run(
        storage,
        &mut schemas,
        "INSERT INTO t VALUES ('42', '1.5', 7, '3.0', 5), ('x', 2, 1.25, 'y', 'z')",
    )?;

    let rows = query(storage, &schemas, "SELECT i, r, s, n, b FROM t")?;
    assert_eq!(
        rows[0],
        vec![
            Value::Integer(42),
            Value::Real(1.5),
            Value::Text("7".into()),
            Value::Integer(3),
            Value::Integer(5),
        ]
    );
    assert_eq!(
        rows[1],
        vec![
            Value::Text("x".into()),
            Value::Real(2.0),
            Value::Text("1.25".into()),
            Value::Text("y".into()),
            Value::Text("z".into()),
        ]
    );
    Ok(())
}

#[test]
fn test_value_count_must_match() {
    let (mut temp_db, mut schemas) = setup("insert_arity");
    let storage = temp_db.get_storage_manager().unwrap();
    assert!(run(storage, &mut schemas, "INSERT INTO users VALUES (1, 'a')").is_err());
    assert!(run(storage, &mut schemas, "INSERT INTO users (name) VALUES ('a', 'b')").is_err());
    assert!(matches!(
        run(storage, &mut schemas, "INSERT INTO users (nickname) VALUES ('a')"),
        Err(DatabaseError::ColumnNotFound { .. })
    ));
    assert!(matches!(
        run(storage, &mut schemas, "INSERT INTO nobody VALUES (1)"),
        Err(DatabaseError::TableNotFound { .. })
    ));
}

#[test]
fn test_default_values() -> Result<(), DatabaseError> {
    let mut temp_db = TempDatabase::with_prefix("insert_defaults");
    let storage = temp_db.create_storage_manager()?;
    let mut schemas = SchemaManager::load(storage)?;
    run(storage, &mut schemas, "CREATE TABLE t (a INTEGER DEFAULT 5, b TEXT)")?;
    let outcome = run(storage, &mut schemas, "INSERT INTO t DEFAULT VALUES")?;
    assert_eq!(outcome.changes, 1);
    assert_eq!(
        query(storage, &schemas, "SELECT a, b FROM t")?,
        vec![vec![Value::Integer(5), Value::Null]]
    );
    Ok(())
}

#[test]
fn test_large_rows_spill_to_overflow_pages() -> Result<(), DatabaseError> {
    let mut temp_db = TempDatabase::with_prefix("insert_overflow");
    let storage = temp_db.create_storage_manager()?;
    let mut schemas = SchemaManager::load(storage)?;
    run(storage, &mut schemas, "CREATE TABLE docs (body TEXT)")?;

    let body = "lorem ipsum ".repeat(2000);
    run(storage, &mut schemas, &format!("INSERT INTO docs VALUES ('{}')", body))?;
    let rows = query(storage, &schemas, "SELECT length(body), body FROM docs")?;
    assert_eq!(rows[0][0], Value::Integer(body.len() as i64));
    assert_eq!(rows[0][1], Value::Text(body));
    Ok(())
}
