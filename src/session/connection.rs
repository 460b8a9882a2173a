//! An open database and the statements running on it.
//!
//! Every statement outside `BEGIN .. COMMIT` is its own transaction: the
//! write lock is taken when it starts writing, and its changes are flushed
//! through the journal and the lock released when it ends. Inside an
//! explicit transaction the lock is held until `COMMIT` or `ROLLBACK`, and
//! a failing statement only rolls back its own changes.

use std::{collections::BTreeMap, path::Path};

use serde_json::{Map, Number, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    executor::{
        CommandOutcome, ExecContext, Operator, build_operator, execute_command,
        mapping::{Record, RecordMapper, RecordSchema},
    },
    planner::{
        PlanBuilder, parse_statement,
        logical_plan::{LogicalPlan, PlannedStatement, StatementKind, TransactionOp},
        parser::Parser,
    },
    session::statement::{
        PreparedStatement, ScopedStatement, StatementId, StatementState, StepResult,
    },
    storage::{
        bplus_tree::BPlusTree,
        lock::next_owner_id,
        schema::SchemaManager,
        storage_manager::StorageManager,
    },
    types::{
        PageId, RowId, SCHEMA_ROOT_PAGE, SCHEMA_TABLE_NAME,
        error::DatabaseError,
        row::Row,
        value::{ColumnType, Value, parse_numeric},
    },
};

/// Output shape of [`Connection::query_json`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFormat {
    /// Array of row objects keyed by column name.
    Json,
    /// The first column of the first row as plain text.
    Raw,
}

pub struct Connection {
    storage: StorageManager,
    schemas: SchemaManager,
    config: Config,
    owner: u64,
    statements: BTreeMap<StatementId, PreparedStatement>,
    next_statement: u64,
    in_transaction: bool,
    changes: u64,
    total_changes: u64,
    last_insert_rowid: RowId,
    closed: bool,
}

impl Connection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::open_with_config(path, &Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: &Config,
    ) -> Result<Self, DatabaseError> {
        config.validate()?;
        let mut storage = StorageManager::open(path.as_ref(), &config.storage)?;
        let schemas = SchemaManager::load(&mut storage)?;
        let owner = next_owner_id();
        info!(
            path = %path.as_ref().display(),
            owner,
            tables = schemas.list_tables().len(),
            "connection opened"
        );
        Ok(Self {
            storage,
            schemas,
            config: config.clone(),
            owner,
            statements: BTreeMap::new(),
            next_statement: 1,
            in_transaction: false,
            changes: 0,
            total_changes: 0,
            last_insert_rowid: 0,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaManager {
        &self.schemas
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> u64 {
        self.changes
    }

    pub fn total_changes(&self) -> u64 {
        self.total_changes
    }

    /// Rowid of the most recent successful INSERT, or 0.
    pub fn last_insert_rowid(&self) -> RowId {
        self.last_insert_rowid
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed {
            return Err(DatabaseError::invalid_state("connection is closed"));
        }
        Ok(())
    }

    /// Runs every statement of `sql` in order, discarding result rows. The
    /// first failing statement stops the script.
    pub fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let mut parser = Parser::new(sql)?;
        while let Some(statement) = parser.next_statement()? {
            let planned = self.pinned(|conn| {
                let planned = PlanBuilder::new(&conn.schemas, sql).build(&statement)?;
                debug!(kind = ?planned.kind, "executing statement");
                if planned.is_query() {
                    let mut operator = build_operator(&planned.plan)?;
                    drain(operator.as_mut(), &mut conn.storage)?;
                }
                Ok(planned)
            })?;
            if !planned.is_query() {
                self.run_command(&planned)?;
            }
        }
        Ok(())
    }

    /// Compiles the first statement of `sql`. Anything after it other than
    /// semicolons and whitespace is a syntax error.
    pub fn prepare(&mut self, sql: &str) -> Result<StatementId, DatabaseError> {
        self.ensure_open()?;
        let statement = parse_statement(sql)?;
        let planned = self.pinned(|conn| PlanBuilder::new(&conn.schemas, sql).build(&statement))?;
        let operator = if planned.is_query() {
            Some(build_operator(&planned.plan)?)
        } else {
            None
        };
        let shared = self.storage.shared();
        let versions = planned
            .tables
            .iter()
            .map(|table| (table.clone(), shared.table_version(table)))
            .collect();

        let id = StatementId(self.next_statement);
        self.next_statement += 1;
        debug!(%id, kind = ?planned.kind, "statement prepared");
        self.statements
            .insert(id, PreparedStatement::new(planned, operator, versions));
        Ok(id)
    }

    /// Prepares a statement guarded by a [`ScopedStatement`].
    pub fn prepare_scoped(&mut self, sql: &str) -> Result<ScopedStatement<'_>, DatabaseError> {
        let id = self.prepare(sql)?;
        Ok(ScopedStatement::new(self, id))
    }

    /// Advances a statement. Reaching the end or failing finalizes the
    /// statement, so any later call on `id` fails with `InvalidState`.
    pub fn step(&mut self, id: StatementId) -> Result<StepResult, DatabaseError> {
        self.ensure_open()?;
        let mut statement = self.statements.remove(&id).ok_or_else(|| {
            DatabaseError::invalid_state(format!("{} is not active", id))
        })?;
        match statement.state {
            StatementState::Cancelled => {
                self.statements.insert(id, statement);
                return Err(DatabaseError::invalid_state(format!("{} was cancelled", id)));
            }
            StatementState::Exhausted => {
                return Err(DatabaseError::invalid_state(format!("{} is exhausted", id)));
            }
            StatementState::Prepared | StatementState::Stepping => {}
        }

        // Queries read under the pin; commands take the write lock instead
        let stepped = if statement.operator.is_some() {
            self.pinned(|conn| conn.advance(&mut statement))
        } else {
            self.refresh_if_reader().and_then(|()| self.advance(&mut statement))
        };
        match stepped {
            Ok(StepResult::Row) => {
                self.statements.insert(id, statement);
                Ok(StepResult::Row)
            }
            Ok(StepResult::Done) => {
                debug!(%id, "statement exhausted, finalized");
                Ok(StepResult::Done)
            }
            Err(e) => {
                debug!(%id, error = %e, "step failed, statement finalized");
                statement.release(StatementState::Cancelled);
                Err(e)
            }
        }
    }

    fn advance(&mut self, statement: &mut PreparedStatement) -> Result<StepResult, DatabaseError> {
        let shared = self.storage.shared();
        if let Some((table, _)) = statement
            .versions
            .iter()
            .find(|(table, version)| shared.table_version(table) != *version)
        {
            return Err(DatabaseError::StatementInvalidated {
                table: table.clone(),
            });
        }

        let Some(operator) = statement.operator.as_mut() else {
            self.run_command(&statement.planned)?;
            statement.release(StatementState::Exhausted);
            return Ok(StepResult::Done);
        };

        let mut ctx = ExecContext::new(&mut self.storage);
        if statement.state == StatementState::Prepared {
            operator.open(&mut ctx)?;
            statement.state = StatementState::Stepping;
        }
        match operator.next(&mut ctx)? {
            Some(row) => {
                statement.current = Some(row);
                Ok(StepResult::Row)
            }
            None => {
                statement.release(StatementState::Exhausted);
                Ok(StepResult::Done)
            }
        }
    }

    /// Stops a statement early. It stays known, so later calls fail with
    /// `InvalidState` until it is finalized.
    pub fn cancel(&mut self, id: StatementId) -> Result<(), DatabaseError> {
        let statement = self
            .statements
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::invalid_state(format!("{} is not active", id)))?;
        statement.release(StatementState::Cancelled);
        Ok(())
    }

    /// Forgets a statement. Returns whether it was known.
    pub fn finalize(&mut self, id: StatementId) -> bool {
        match self.statements.remove(&id) {
            Some(mut statement) => {
                statement.release(StatementState::Cancelled);
                true
            }
            None => false,
        }
    }

    pub fn statement_state(&self, id: StatementId) -> Option<StatementState> {
        self.statements.get(&id).map(|statement| statement.state)
    }

    pub fn active_statements(&self) -> usize {
        self.statements.len()
    }

    fn statement(&self, id: StatementId) -> Result<&PreparedStatement, DatabaseError> {
        self.ensure_open()?;
        self.statements
            .get(&id)
            .ok_or_else(|| DatabaseError::invalid_state(format!("{} is not active", id)))
    }

    pub fn column_names(&self, id: StatementId) -> Result<Vec<String>, DatabaseError> {
        Ok(self.statement(id)?.planned.columns.clone())
    }

    pub fn get_value(&self, id: StatementId, column: &str) -> Result<Value, DatabaseError> {
        self.statement(id)?.value(id, column).cloned()
    }

    pub fn get_type(&self, id: StatementId, column: &str) -> Result<ColumnType, DatabaseError> {
        Ok(self.statement(id)?.value(id, column)?.column_type())
    }

    /// Reads a column as a 32-bit integer. NULL reads as 0.
    pub fn get_int(&self, id: StatementId, column: &str) -> Result<i32, DatabaseError> {
        let value = self.statement(id)?.value(id, column)?;
        let wide = integer_of(value, "INT")?;
        i32::try_from(wide).map_err(|_| mismatch("INT", value))
    }

    pub fn get_long(&self, id: StatementId, column: &str) -> Result<i64, DatabaseError> {
        integer_of(self.statement(id)?.value(id, column)?, "LONG")
    }

    pub fn get_double(&self, id: StatementId, column: &str) -> Result<f64, DatabaseError> {
        let value = self.statement(id)?.value(id, column)?;
        match value {
            Value::Null => Ok(0.0),
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(r) => Ok(*r),
            Value::Text(text) => parse_numeric(text.trim())
                .and_then(|number| number.as_f64())
                .ok_or_else(|| mismatch("DOUBLE", value)),
            Value::Blob(_) => Err(mismatch("DOUBLE", value)),
        }
    }

    /// Reads a column as text; NULL is `None` and numbers are formatted.
    pub fn get_string(
        &self,
        id: StatementId,
        column: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let value = self.statement(id)?.value(id, column)?;
        match value {
            Value::Null => Ok(None),
            Value::Blob(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|_| mismatch("STRING", value)),
            other => Ok(Some(other.to_text())),
        }
    }

    pub fn get_blob(
        &self,
        id: StatementId,
        column: &str,
    ) -> Result<Option<Vec<u8>>, DatabaseError> {
        let value = self.statement(id)?.value(id, column)?;
        Ok(match value {
            Value::Null => None,
            Value::Blob(bytes) => Some(bytes.clone()),
            other => Some(other.to_text().into_bytes()),
        })
    }

    /// Runs a query and maps every row into a record of `schema`. A row that
    /// cannot be mapped fails the whole query.
    pub fn query_mapped(
        &mut self,
        sql: &str,
        schema: &RecordSchema,
    ) -> Result<Vec<Record>, DatabaseError> {
        self.pinned(|conn| {
            let (planned, mut operator) = conn.plan_query(sql)?;
            let mapper = RecordMapper::resolve(schema, &planned.columns);
            debug!(
                properties = schema.len(),
                bound = mapper.bound_count(),
                "mapping query rows"
            );
            let mut ctx = ExecContext::new(&mut conn.storage);
            operator.open(&mut ctx)?;
            let mut records = Vec::new();
            let mapped = loop {
                match operator.next(&mut ctx) {
                    Ok(Some(row)) => match mapper.map_row(&row.values) {
                        Ok(record) => records.push(record),
                        Err(e) => break Err(e),
                    },
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            operator.close();
            mapped.map(|()| records)
        })
    }

    /// Runs a query and renders its rows as JSON, or as the raw text of the
    /// first value.
    pub fn query_json(&mut self, sql: &str, format: QueryFormat) -> Result<String, DatabaseError> {
        let (planned, rows) = self.pinned(|conn| {
            let (planned, mut operator) = conn.plan_query(sql)?;
            let rows = drain(operator.as_mut(), &mut conn.storage)?;
            Ok((planned, rows))
        })?;
        match format {
            QueryFormat::Raw => Ok(rows
                .first()
                .and_then(|row| row.values.first())
                .map(|value| match value {
                    Value::Null => String::new(),
                    other => other.to_text(),
                })
                .unwrap_or_default()),
            QueryFormat::Json => {
                let objects: Vec<JsonValue> = rows
                    .iter()
                    .map(|row| {
                        let mut object = Map::new();
                        for (name, value) in planned.columns.iter().zip(&row.values) {
                            object
                                .entry(name.clone())
                                .or_insert_with(|| json_value(value));
                        }
                        JsonValue::Object(object)
                    })
                    .collect();
                serde_json::to_string(&objects).map_err(|e| DatabaseError::SerializationError {
                    details: e.to_string(),
                })
            }
        }
    }

    fn plan_query(
        &mut self,
        sql: &str,
    ) -> Result<(PlannedStatement, Box<dyn Operator>), DatabaseError> {
        let statement = parse_statement(sql)?;
        let planned = PlanBuilder::new(&self.schemas, sql).build(&statement)?;
        if !planned.is_query() {
            return Err(DatabaseError::invalid_state(
                "statement does not return rows",
            ));
        }
        let operator = build_operator(&planned.plan)?;
        Ok((planned, operator))
    }

    /// Walks every tree and the free list, reporting pages that are
    /// referenced twice, out of range or never referenced, plus rows that
    /// do not decode. An empty list means the file is sound.
    pub fn integrity_check(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.pinned(Self::check_integrity)
    }

    fn check_integrity(&mut self) -> Result<Vec<String>, DatabaseError> {
        let mut problems = Vec::new();
        let page_count = self.storage.page_count();
        let mut owners: Vec<Option<String>> = vec![None; page_count as usize];

        let mut trees = vec![(SCHEMA_TABLE_NAME.to_string(), SCHEMA_ROOT_PAGE)];
        trees.extend(
            self.schemas
                .list_tables()
                .into_iter()
                .map(|table| (table.table_name.clone(), table.root_page_id)),
        );

        for (name, root) in &trees {
            let tree = BPlusTree::new(*root);
            let mut pages = Vec::new();
            if let Err(e) = tree.collect_pages(&mut self.storage, &mut pages) {
                problems.push(format!("table {}: {}", name, e));
                continue;
            }
            claim_pages(&mut owners, &pages, name, &mut problems);
            check_rows(&mut self.storage, &tree, name, &mut problems);
        }

        match self.storage.freelist_pages() {
            Ok(pages) => claim_pages(&mut owners, &pages, "free list", &mut problems),
            Err(e) => problems.push(format!("free list: {}", e)),
        }

        for (page_id, owner) in owners.iter().enumerate().skip(1) {
            if owner.is_none() {
                problems.push(format!("page {} is never used", page_id));
            }
        }
        if problems.is_empty() {
            debug!(pages = page_count, "integrity check passed");
        } else {
            warn!(problems = problems.len(), "integrity check found problems");
        }
        Ok(problems)
    }

    /// Finalizes every statement, rolls back an open transaction and
    /// releases the write lock.
    pub fn close(mut self) -> Result<(), DatabaseError> {
        self.shutdown();
        Ok(())
    }

    /// Releases everything the connection holds; later calls fail with
    /// `InvalidState`. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let open_statements = self.statements.len();
        for (_, mut statement) in std::mem::take(&mut self.statements) {
            statement.release(StatementState::Cancelled);
        }
        if self.in_transaction || self.storage.has_pending_changes() {
            warn!("closing with an open transaction, rolling back");
            self.storage.rollback();
            self.in_transaction = false;
        }
        self.storage.shared().unlock_write(self.owner);
        self.closed = true;
        info!(path = %self.storage.path().display(), open_statements, "connection closed");
    }

    // ---------------------------------------------------------------- writes

    /// Runs `read` against a single committed state of the file: other
    /// handles' commits wait until it returns, and those that landed before
    /// it are picked up first.
    fn pinned<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        self.ensure_open()?;
        self.storage.pin();
        let result = self.refresh_if_reader().and_then(|()| read(self));
        self.storage.unpin();
        result
    }

    /// Picks up commits of other handles unless this handle is the writer.
    fn refresh_if_reader(&mut self) -> Result<(), DatabaseError> {
        if self.storage.shared().holds_write(self.owner) {
            return Ok(());
        }
        if self.storage.refresh_if_changed()? {
            self.schemas.refresh(&mut self.storage)?;
        }
        Ok(())
    }

    fn acquire_write(&mut self) -> Result<(), DatabaseError> {
        let shared = self.storage.shared();
        if shared.holds_write(self.owner) {
            return Ok(());
        }
        shared.try_lock_write(self.owner)?;
        if self.storage.refresh_if_changed()? {
            self.schemas.refresh(&mut self.storage)?;
        }
        Ok(())
    }

    fn release_write(&mut self) {
        self.storage.shared().unlock_write(self.owner);
    }

    /// Re-reads the catalog after a rollback changed it underneath us.
    fn reload_schemas(&mut self) {
        if let Err(e) = self.schemas.reload(&mut self.storage) {
            warn!(error = %e, "catalog reload after rollback failed");
        }
    }

    fn run_command(&mut self, planned: &PlannedStatement) -> Result<(), DatabaseError> {
        if let LogicalPlan::Transaction(op) = planned.plan {
            return self.transaction(op);
        }

        self.acquire_write()?;
        let savepoint = self.storage.savepoint();
        let outcome = execute_command(&planned.plan, &mut self.storage, &mut self.schemas)
            .and_then(|outcome| {
                if !self.in_transaction {
                    self.storage.flush()?;
                }
                Ok(outcome)
            });

        match outcome {
            Ok(outcome) => {
                if !self.in_transaction {
                    self.release_write();
                }
                self.record_outcome(planned.kind, outcome);
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    in_transaction = self.in_transaction,
                    "statement failed, rolling back"
                );
                if self.in_transaction {
                    self.storage.rollback_to(savepoint);
                } else {
                    self.storage.rollback();
                    self.release_write();
                }
                self.reload_schemas();
                Err(e)
            }
        }
    }

    fn record_outcome(&mut self, kind: StatementKind, outcome: CommandOutcome) {
        if kind != StatementKind::Dml {
            return;
        }
        self.changes = outcome.changes;
        self.total_changes += outcome.changes;
        if let Some(row_id) = outcome.last_insert_rowid {
            self.last_insert_rowid = row_id;
        }
    }

    fn transaction(&mut self, op: TransactionOp) -> Result<(), DatabaseError> {
        match op {
            TransactionOp::Begin => {
                if self.in_transaction {
                    return Err(DatabaseError::execution(
                        "cannot start a transaction within a transaction",
                    ));
                }
                self.in_transaction = true;
                debug!("transaction started");
            }
            TransactionOp::Commit => {
                if !self.in_transaction {
                    return Err(DatabaseError::execution(
                        "cannot commit - no transaction is active",
                    ));
                }
                self.in_transaction = false;
                let flushed = self.storage.flush();
                self.release_write();
                if let Err(e) = flushed {
                    self.reload_schemas();
                    return Err(e);
                }
                debug!("transaction committed");
            }
            TransactionOp::Rollback => {
                if !self.in_transaction {
                    return Err(DatabaseError::execution(
                        "cannot rollback - no transaction is active",
                    ));
                }
                self.in_transaction = false;
                self.storage.rollback();
                self.release_write();
                self.reload_schemas();
                debug!("transaction rolled back");
            }
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs an operator tree to completion against `storage`.
fn drain(
    operator: &mut dyn Operator,
    storage: &mut StorageManager,
) -> Result<Vec<Row>, DatabaseError> {
    let mut ctx = ExecContext::new(storage);
    crate::executor::collect_rows(operator, &mut ctx)
}

fn mismatch(expected: &str, value: &Value) -> DatabaseError {
    DatabaseError::TypeMismatch {
        expected: expected.to_string(),
        actual: format!("{} {}", value.column_type(), value),
    }
}

/// Integer reading shared by `get_int` and `get_long`: reals truncate and
/// text must hold a number.
fn integer_of(value: &Value, expected: &str) -> Result<i64, DatabaseError> {
    let truncate = |r: f64| {
        if r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64 {
            Ok(r.trunc() as i64)
        } else {
            Err(mismatch(expected, value))
        }
    };
    match value {
        Value::Null => Ok(0),
        Value::Integer(i) => Ok(*i),
        Value::Real(r) => truncate(*r),
        Value::Text(text) => match parse_numeric(text.trim()) {
            Some(Value::Integer(i)) => Ok(i),
            Some(Value::Real(r)) => truncate(r),
            _ => Err(mismatch(expected, value)),
        },
        Value::Blob(_) => Err(mismatch(expected, value)),
    }
}

fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(i) => JsonValue::Number((*i).into()),
        Value::Real(r) => Number::from_f64(*r)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(text) => JsonValue::String(text.clone()),
        Value::Blob(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{:02X}", b)).collect())
        }
    }
}

fn claim_pages(
    owners: &mut [Option<String>],
    pages: &[PageId],
    owner: &str,
    problems: &mut Vec<String>,
) {
    for &page_id in pages {
        match owners.get_mut(page_id as usize) {
            None => problems.push(format!(
                "{} references page {} beyond the end of the file",
                owner, page_id
            )),
            Some(_) if page_id == 0 => {
                problems.push(format!("{} references the header page", owner))
            }
            Some(Some(previous)) => problems.push(format!(
                "page {} is used by both {} and {}",
                page_id, previous, owner
            )),
            Some(slot) => *slot = Some(owner.to_string()),
        }
    }
}

fn check_rows(
    storage: &mut StorageManager,
    tree: &BPlusTree,
    name: &str,
    problems: &mut Vec<String>,
) {
    let mut cursor = tree.scan();
    let mut previous: Option<RowId> = None;
    loop {
        match cursor.next(storage) {
            Ok(Some((row_id, payload))) => {
                if previous.is_some_and(|p| p >= row_id) {
                    problems.push(format!("table {}: rowid {} out of order", name, row_id));
                }
                if let Err(e) = Row::from_bytes(&payload) {
                    problems.push(format!("table {}: row {} does not decode: {}", name, row_id, e));
                }
                previous = Some(row_id);
            }
            Ok(None) => break,
            Err(e) => {
                problems.push(format!("table {}: {}", name, e));
                break;
            }
        }
    }
}
