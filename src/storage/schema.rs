use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    storage::{bplus_tree::BPlusTree, storage_manager::StorageManager},
    types::{
        PageId, RowId, SCHEMA_ROOT_PAGE, SCHEMA_TABLE_NAME,
        error::DatabaseError,
        row::Row,
        value::{DataType, Value},
    },
};

/// Represents a column definition in a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Type name as written in CREATE TABLE, possibly empty.
    pub declared_type: String,
    pub data_type: DataType,
    pub position: usize,
    pub nullable: bool,
    pub default_value: Option<Value>,
    pub primary_key: bool,
    pub unique: bool,
    pub autoincrement: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, position: usize) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            data_type: DataType::from_declared(&declared_type),
            declared_type,
            position,
            nullable: true,
            default_value: None,
            primary_key: false,
            unique: false,
            autoincrement: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default_value: Value) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    /// `INTEGER PRIMARY KEY` columns store their value as the row id.
    pub fn is_rowid_alias(&self) -> bool {
        self.primary_key && self.declared_type.trim().eq_ignore_ascii_case("INTEGER")
    }

    /// Column definition as it would appear in CREATE TABLE.
    pub fn definition_sql(&self) -> String {
        let mut sql = quote_identifier(&self.name);
        if !self.declared_type.is_empty() {
            sql.push(' ');
            sql.push_str(&self.declared_type);
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            match default {
                Value::Text(text) => sql.push_str(&format!("'{}'", text.replace('\'', "''"))),
                other => sql.push_str(&other.to_string()),
            }
        }
        sql
    }
}

fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Represents a complete table schema with all column definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    pub root_page_id: PageId,
    pub sql: String,
    /// Key of this table's row in the catalog tree.
    pub catalog_row_id: RowId,
}

impl TableSchema {
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnSchema>,
        root_page_id: PageId,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
            root_page_id,
            sql: sql.into(),
            catalog_row_id: 0,
        }
    }

    /// The read-only view of the catalog itself.
    pub fn catalog() -> Self {
        let columns = vec![
            ColumnSchema::new("type", "TEXT", 0),
            ColumnSchema::new("name", "TEXT", 1),
            ColumnSchema::new("root_page", "INTEGER", 2),
            ColumnSchema::new("sql", "TEXT", 3),
            ColumnSchema::new("columns", "BLOB", 4),
        ];
        let mut schema = Self::new(SCHEMA_TABLE_NAME, columns, SCHEMA_ROOT_PAGE, "");
        schema.sql = schema.create_sql();
        schema
    }

    pub fn is_catalog(&self) -> bool {
        self.table_name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME)
    }

    /// Get column by name; the first of duplicate names wins.
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|col| col.name.eq_ignore_ascii_case(name))
    }

    /// Get column index by name
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|col| col.name.clone()).collect()
    }

    /// Index of the `INTEGER PRIMARY KEY` column, if the table has one.
    pub fn rowid_alias_index(&self) -> Option<usize> {
        self.columns.iter().position(ColumnSchema::is_rowid_alias)
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnSchema> {
        self.columns.iter().filter(|col| col.primary_key).collect()
    }

    /// Canonical CREATE TABLE text for the current column list.
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(ColumnSchema::definition_sql).collect();
        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&self.table_name),
            columns.join(", ")
        )
    }

    fn to_catalog_row(&self) -> Result<Row, DatabaseError> {
        let columns = bincode::serde::encode_to_vec(&self.columns, bincode::config::standard())
            .map_err(|e| DatabaseError::SerializationError {
                details: format!("encoding columns of '{}': {}", self.table_name, e),
            })?;
        Ok(Row::new(vec![
            Value::Text("table".to_string()),
            Value::Text(self.table_name.clone()),
            Value::Integer(self.root_page_id as i64),
            Value::Text(self.sql.clone()),
            Value::Blob(columns),
        ]))
    }

    fn from_catalog_row(row_id: RowId, row: &Row) -> Result<Self, DatabaseError> {
        let bad_row = |what: &str| {
            DatabaseError::corruption(format!("catalog row {} has an invalid {}", row_id, what))
        };
        let [kind, name, root, sql, columns] = row.values.as_slice() else {
            return Err(bad_row("shape"));
        };
        if *kind != Value::Text("table".to_string()) {
            return Err(bad_row("type"));
        }
        let Value::Text(name) = name else {
            return Err(bad_row("name"));
        };
        let root_page_id = match root {
            Value::Integer(root) if *root > SCHEMA_ROOT_PAGE as i64 => *root as PageId,
            _ => return Err(bad_row("root page")),
        };
        let Value::Text(sql) = sql else {
            return Err(bad_row("sql"));
        };
        let Value::Blob(encoded) = columns else {
            return Err(bad_row("column list"));
        };
        let (columns, _): (Vec<ColumnSchema>, usize) =
            bincode::serde::decode_from_slice(encoded, bincode::config::standard()).map_err(
                |e| DatabaseError::SerializationError {
                    details: format!("decoding columns of '{}': {}", name, e),
                },
            )?;

        Ok(Self {
            table_name: name.clone(),
            columns,
            root_page_id,
            sql: sql.clone(),
            catalog_row_id: row_id,
        })
    }
}

/// In-memory copy of the catalog, kept in step with the `lumbung_schema`
/// tree on page 1. Every mutation writes the tree and bumps the schema
/// cookie inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    table_schemas: HashMap<String, TableSchema>,
    catalog: BPlusTree,
    loaded_cookie: Option<u32>,
}

impl SchemaManager {
    pub fn new() -> Self {
        Self {
            table_schemas: HashMap::new(),
            catalog: BPlusTree::new(SCHEMA_ROOT_PAGE),
            loaded_cookie: None,
        }
    }

    pub fn load(storage: &mut StorageManager) -> Result<Self, DatabaseError> {
        let mut schemas = Self::new();
        schemas.reload(storage)?;
        Ok(schemas)
    }

    /// Re-reads every catalog row.
    pub fn reload(&mut self, storage: &mut StorageManager) -> Result<(), DatabaseError> {
        let mut tables = HashMap::new();
        let mut cursor = self.catalog.scan();
        while let Some((row_id, payload)) = cursor.next(storage)? {
            let row = Row::from_bytes(&payload)?;
            let schema = TableSchema::from_catalog_row(row_id, &row)?;
            tables.insert(schema.table_name.to_ascii_lowercase(), schema);
        }
        self.table_schemas = tables;
        self.loaded_cookie = Some(storage.schema_cookie());
        debug!(tables = self.table_schemas.len(), "catalog loaded");
        Ok(())
    }

    /// Reloads when the schema cookie moved since the last load.
    pub fn refresh(&mut self, storage: &mut StorageManager) -> Result<bool, DatabaseError> {
        if self.loaded_cookie == Some(storage.schema_cookie()) {
            return Ok(false);
        }
        self.reload(storage)?;
        Ok(true)
    }

    pub fn define_table(
        &mut self,
        storage: &mut StorageManager,
        name: &str,
        columns: Vec<ColumnSchema>,
        sql: &str,
    ) -> Result<TableSchema, DatabaseError> {
        if name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME) || self.table_exists(name) {
            return Err(DatabaseError::TableExists {
                name: name.to_string(),
            });
        }
        validate_columns(name, &columns)?;

        let tree = BPlusTree::create(storage)?;
        let mut schema = TableSchema::new(name, columns, tree.root_page_id(), sql);
        schema.catalog_row_id = self.catalog.max_key(storage)?.unwrap_or(0) + 1;
        self.catalog
            .insert(storage, schema.catalog_row_id, &schema.to_catalog_row()?.to_bytes())?;
        self.commit_change(storage, schema.clone());
        debug!(table = name, root = schema.root_page_id, "table defined");
        Ok(schema)
    }

    pub fn lookup_table(&self, name: &str) -> Result<&TableSchema, DatabaseError> {
        self.get_table_schema(name)
            .ok_or_else(|| DatabaseError::TableNotFound {
                name: name.to_string(),
            })
    }

    /// Get a table schema by name
    pub fn get_table_schema(&self, name: &str) -> Option<&TableSchema> {
        self.table_schemas.get(&name.to_ascii_lowercase())
    }

    /// User tables ordered by name.
    pub fn list_tables(&self) -> Vec<&TableSchema> {
        let mut tables: Vec<&TableSchema> = self.table_schemas.values().collect();
        tables.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        tables
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.table_schemas.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes the table and frees every page of its tree.
    pub fn drop_table(
        &mut self,
        storage: &mut StorageManager,
        name: &str,
    ) -> Result<TableSchema, DatabaseError> {
        reject_catalog_write(name)?;
        let schema = self.lookup_table(name)?.clone();
        BPlusTree::new(schema.root_page_id).destroy(storage)?;
        self.catalog.delete(storage, schema.catalog_row_id)?;
        self.table_schemas.remove(&name.to_ascii_lowercase());
        storage.bump_schema_cookie();
        self.loaded_cookie = Some(storage.schema_cookie());
        debug!(table = name, "table dropped");
        Ok(schema)
    }

    /// Appends a column. Existing rows read the column's default.
    pub fn add_column(
        &mut self,
        storage: &mut StorageManager,
        table: &str,
        mut column: ColumnSchema,
    ) -> Result<TableSchema, DatabaseError> {
        reject_catalog_write(table)?;
        let mut schema = self.lookup_table(table)?.clone();
        if schema.get_column(&column.name).is_some() {
            return Err(DatabaseError::execution(format!(
                "duplicate column name: {}",
                column.name
            )));
        }
        if column.primary_key || column.unique {
            return Err(DatabaseError::execution(
                "cannot add a PRIMARY KEY or UNIQUE column",
            ));
        }
        if !column.nullable && column.default_value.as_ref().is_none_or(Value::is_null) {
            return Err(DatabaseError::execution(
                "cannot add a NOT NULL column with default value NULL",
            ));
        }

        column.position = schema.columns.len();
        schema.columns.push(column);
        schema.sql = schema.create_sql();
        self.rewrite(storage, schema)
    }

    pub fn rename_table(
        &mut self,
        storage: &mut StorageManager,
        old_name: &str,
        new_name: &str,
    ) -> Result<TableSchema, DatabaseError> {
        reject_catalog_write(old_name)?;
        let mut schema = self.lookup_table(old_name)?.clone();
        let same_table = old_name.eq_ignore_ascii_case(new_name);
        if new_name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME)
            || (!same_table && self.table_exists(new_name))
        {
            return Err(DatabaseError::TableExists {
                name: new_name.to_string(),
            });
        }

        self.table_schemas.remove(&old_name.to_ascii_lowercase());
        schema.table_name = new_name.to_string();
        schema.sql = schema.create_sql();
        self.rewrite(storage, schema)
    }

    fn rewrite(
        &mut self,
        storage: &mut StorageManager,
        schema: TableSchema,
    ) -> Result<TableSchema, DatabaseError> {
        let payload = schema.to_catalog_row()?.to_bytes();
        if !self.catalog.update(storage, schema.catalog_row_id, &payload)? {
            return Err(DatabaseError::corruption(format!(
                "catalog row {} for '{}' is missing",
                schema.catalog_row_id, schema.table_name
            )));
        }
        self.commit_change(storage, schema.clone());
        Ok(schema)
    }

    fn commit_change(&mut self, storage: &mut StorageManager, schema: TableSchema) {
        self.table_schemas
            .insert(schema.table_name.to_ascii_lowercase(), schema);
        storage.bump_schema_cookie();
        self.loaded_cookie = Some(storage.schema_cookie());
    }
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self::new()
    }
}

fn reject_catalog_write(name: &str) -> Result<(), DatabaseError> {
    if name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME) {
        return Err(DatabaseError::execution(format!(
            "table {} may not be modified",
            SCHEMA_TABLE_NAME
        )));
    }
    Ok(())
}

fn validate_columns(table: &str, columns: &[ColumnSchema]) -> Result<(), DatabaseError> {
    if columns.is_empty() {
        return Err(DatabaseError::execution(format!(
            "table '{}' needs at least one column",
            table
        )));
    }
    if columns.iter().filter(|col| col.primary_key).count() > 1 {
        return Err(DatabaseError::execution(format!(
            "table '{}' has more than one primary key",
            table
        )));
    }
    if let Some(col) = columns.iter().find(|col| col.autoincrement && !col.is_rowid_alias()) {
        return Err(DatabaseError::execution(format!(
            "AUTOINCREMENT is only allowed on an INTEGER PRIMARY KEY, not '{}'",
            col.name
        )));
    }
    Ok(())
}
