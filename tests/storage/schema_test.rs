use lumbung::{
    storage::{
        bplus_tree::BPlusTree,
        schema::{ColumnSchema, SchemaManager, TableSchema},
    },
    types::{SCHEMA_TABLE_NAME, error::DatabaseError, value::Value},
    utils::mock::TempDatabase,
};

fn user_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("id", "INTEGER", 0).primary_key(),
        ColumnSchema::new("name", "TEXT", 1).not_null(),
        ColumnSchema::new("email", "TEXT", 2).unique(),
    ]
}

const USERS_SQL: &str =
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE)";

#[test]
fn test_define_and_lookup_table() {
    let mut temp_db = TempDatabase::with_prefix("schema_define");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::load(storage).unwrap();

    let users = schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    assert!(users.root_page_id > 1);
    assert_eq!(users.catalog_row_id, 1);
    assert_eq!(users.rowid_alias_index(), Some(0));
    assert_eq!(users.primary_key_columns().len(), 1);

    assert!(schemas.table_exists("USERS"));
    assert_eq!(schemas.lookup_table("Users").unwrap(), &users);
    assert!(matches!(
        schemas.lookup_table("orders"),
        Err(DatabaseError::TableNotFound { .. })
    ));
    assert_eq!(users.get_column_index("EMAIL"), Some(2));
    assert_eq!(users.column_names(), vec!["id", "name", "email"]);
}

#[test]
fn test_duplicate_and_reserved_names_are_rejected() {
    let mut temp_db = TempDatabase::with_prefix("schema_duplicate");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::new();

    schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    assert!(matches!(
        schemas.define_table(storage, "Users", user_columns(), USERS_SQL),
        Err(DatabaseError::TableExists { .. })
    ));
    assert!(matches!(
        schemas.define_table(storage, SCHEMA_TABLE_NAME, user_columns(), ""),
        Err(DatabaseError::TableExists { .. })
    ));
    assert!(schemas.define_table(storage, "empty", Vec::new(), "").is_err());
}

#[test]
fn test_column_constraints_are_validated() {
    let mut temp_db = TempDatabase::with_prefix("schema_validate");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::new();

    let two_keys = vec![
        ColumnSchema::new("a", "INTEGER", 0).primary_key(),
        ColumnSchema::new("b", "TEXT", 1).primary_key(),
    ];
    assert!(schemas.define_table(storage, "t", two_keys, "").is_err());

    let text_autoincrement = vec![ColumnSchema::new("a", "TEXT", 0).primary_key().autoincrement()];
    assert!(schemas.define_table(storage, "t", text_autoincrement, "").is_err());
    assert!(!schemas.table_exists("t"));
}

#[test]
fn test_catalog_survives_reopen() {
    let mut temp_db = TempDatabase::with_prefix("schema_reopen");
    {
        let storage = temp_db.create_storage_manager().unwrap();
        let mut schemas = SchemaManager::load(storage).unwrap();
        schemas
            .define_table(storage, "users", user_columns(), USERS_SQL)
            .unwrap();
        let columns = vec![
            ColumnSchema::new("qty", "INTEGER", 0).with_default(Value::Integer(1)),
            ColumnSchema::new("price", "REAL", 1),
        ];
        schemas
            .define_table(storage, "orders", columns, "CREATE TABLE orders (qty INTEGER DEFAULT 1, price REAL)")
            .unwrap();
        storage.flush().unwrap();
    }
    temp_db.close_storage_manager();

    let storage = temp_db.create_storage_manager().unwrap();
    let schemas = SchemaManager::load(storage).unwrap();
    let names: Vec<&str> = schemas
        .list_tables()
        .into_iter()
        .map(|t| t.table_name.as_str())
        .collect();
    assert_eq!(names, vec!["orders", "users"]);

    let orders = schemas.lookup_table("orders").unwrap();
    assert_eq!(orders.columns[0].default_value, Some(Value::Integer(1)));
    assert_eq!(orders.sql, "CREATE TABLE orders (qty INTEGER DEFAULT 1, price REAL)");
    assert!(!schemas.lookup_table("users").unwrap().columns[1].nullable);
}

#[test]
fn test_uncommitted_definition_disappears_on_rollback() {
    let mut temp_db = TempDatabase::with_prefix("schema_rollback");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::load(storage).unwrap();

    schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    storage.rollback();
    schemas.reload(storage).unwrap();
    assert!(!schemas.table_exists("users"));
    assert_eq!(storage.page_count(), 2);
}

#[test]
fn test_refresh_follows_schema_cookie() {
    let temp_db = TempDatabase::with_prefix("schema_refresh");
    let mut writer_storage =
        lumbung::storage::storage_manager::StorageManager::new(temp_db.path()).unwrap();
    let mut reader_storage =
        lumbung::storage::storage_manager::StorageManager::new(temp_db.path()).unwrap();
    let mut writer = SchemaManager::load(&mut writer_storage).unwrap();
    let mut reader = SchemaManager::load(&mut reader_storage).unwrap();

    assert!(!reader.refresh(&mut reader_storage).unwrap());
    writer
        .define_table(&mut writer_storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    writer_storage.flush().unwrap();

    reader_storage.refresh_if_changed().unwrap();
    assert!(reader.refresh(&mut reader_storage).unwrap());
    assert!(reader.table_exists("users"));
}

#[test]
fn test_drop_table_frees_its_pages() {
    let mut temp_db = TempDatabase::with_prefix("schema_drop");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::new();
    let users = schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    let tree = BPlusTree::new(users.root_page_id);
    tree.insert(storage, 1, b"payload").unwrap();

    let dropped = schemas.drop_table(storage, "USERS").unwrap();
    assert_eq!(dropped.table_name, "users");
    assert!(!schemas.table_exists("users"));
    assert!(storage.freelist_pages().unwrap().contains(&users.root_page_id));
    assert!(matches!(
        schemas.drop_table(storage, "users"),
        Err(DatabaseError::TableNotFound { .. })
    ));
    assert!(schemas.drop_table(storage, SCHEMA_TABLE_NAME).is_err());
}

#[test]
fn test_add_column_rewrites_definition() {
    let mut temp_db = TempDatabase::with_prefix("schema_add_column");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::new();
    schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();

    let cookie = storage.schema_cookie();
    let column = ColumnSchema::new("age", "INTEGER", 0).with_default(Value::Integer(18));
    let users = schemas.add_column(storage, "users", column).unwrap();
    assert!(storage.schema_cookie() != cookie);

    assert_eq!(users.columns.len(), 4);
    assert_eq!(users.columns[3].position, 3);
    assert_eq!(
        users.sql,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE, age INTEGER DEFAULT 18)"
    );

    let duplicate = ColumnSchema::new("Name", "TEXT", 0);
    assert!(schemas.add_column(storage, "users", duplicate).is_err());
    let unique = ColumnSchema::new("code", "TEXT", 0).unique();
    assert!(schemas.add_column(storage, "users", unique).is_err());
    let required = ColumnSchema::new("code", "TEXT", 0).not_null();
    assert!(schemas.add_column(storage, "users", required).is_err());

    schemas.reload(storage).unwrap();
    assert_eq!(schemas.lookup_table("users").unwrap().columns.len(), 4);
}

#[test]
fn test_rename_table() {
    let mut temp_db = TempDatabase::with_prefix("schema_rename");
    let storage = temp_db.create_storage_manager().unwrap();
    let mut schemas = SchemaManager::new();
    let users = schemas
        .define_table(storage, "users", user_columns(), USERS_SQL)
        .unwrap();
    schemas
        .define_table(storage, "orders", vec![ColumnSchema::new("id", "INTEGER", 0)], "")
        .unwrap();

    assert!(matches!(
        schemas.rename_table(storage, "users", "ORDERS"),
        Err(DatabaseError::TableExists { .. })
    ));

    let renamed = schemas.rename_table(storage, "users", "members").unwrap();
    assert_eq!(renamed.root_page_id, users.root_page_id);
    assert!(renamed.sql.starts_with("CREATE TABLE members ("));
    assert!(!schemas.table_exists("users"));

    schemas.reload(storage).unwrap();
    assert!(schemas.table_exists("members"));
    assert!(!schemas.table_exists("users"));
}

#[test]
fn test_catalog_view_and_quoted_names() {
    let catalog = TableSchema::catalog();
    assert!(catalog.is_catalog());
    assert_eq!(
        catalog.column_names(),
        vec!["type", "name", "root_page", "sql", "columns"]
    );

    let odd = TableSchema::new(
        "my table",
        vec![ColumnSchema::new("first name", "TEXT", 0).with_default(Value::Text("it's".into()))],
        2,
        "",
    );
    assert_eq!(
        odd.create_sql(),
        "CREATE TABLE \"my table\" (\"first name\" TEXT DEFAULT 'it''s')"
    );
}
