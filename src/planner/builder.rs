//! Turns a parsed statement into a logical plan.
//!
//! Names are resolved against a [`Scope`]: every table in FROM contributes
//! its columns followed by a hidden rowid column, so a scan row and a scope
//! line up position for position. Joins concatenate scopes the same way
//! their output rows concatenate.

use std::ops::Bound;

use crate::{
    executor::eval::evaluate,
    planner::{
        ast::{
            AlterTableAction as AstAlterAction, BinaryOp, ColumnDefinition, CreateTableStatement,
            DeleteStatement, Expr, FromClause, InsertStatement, JoinKind, SelectItem,
            SelectStatement, Statement, TableReference, UpdateStatement, is_aggregate_call,
        },
        expression::{AggregateExpression, AggregateFunction, Expression, ScalarFunction},
        logical_plan::{
            AggregatePlan, AlterTableAction, AlterTablePlan, ColumnTarget, CreateTablePlan,
            DeletePlan, DistinctPlan, DropTablePlan, FilterPlan, InsertPlan, JoinPlan, JoinType,
            KeyRange, LimitPlan, LogicalPlan, PlannedStatement, ProjectPlan, ScanPlan, SortKey,
            SortPlan, StatementKind, TransactionOp, UpdatePlan, ValuesPlan,
        },
        token::Span,
    },
    storage::schema::{ColumnSchema, SchemaManager, TableSchema},
    types::{
        SCHEMA_TABLE_NAME,
        error::DatabaseError,
        value::{DataType, Value},
    },
};

const ROWID_NAMES: [&str; 3] = ["rowid", "_rowid_", "oid"];

fn is_rowid_name(name: &str) -> bool {
    ROWID_NAMES.iter().any(|alias| alias.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone)]
struct ScopeColumn {
    binding: String,
    name: String,
    hidden: bool,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    columns: Vec<ScopeColumn>,
}

impl Scope {
    fn for_table(table: &TableSchema, binding: &str) -> Self {
        let mut columns: Vec<ScopeColumn> = table
            .columns
            .iter()
            .map(|col| ScopeColumn {
                binding: binding.to_string(),
                name: col.name.clone(),
                hidden: false,
            })
            .collect();
        columns.push(ScopeColumn {
            binding: binding.to_string(),
            name: "rowid".to_string(),
            hidden: true,
        });
        Self { columns }
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    fn join(mut self, other: Scope) -> Scope {
        self.columns.extend(other.columns);
        self
    }

    fn has_binding(&self, binding: &str) -> bool {
        self.columns
            .iter()
            .any(|col| col.binding.eq_ignore_ascii_case(binding))
    }

    fn resolve(&self, table: Option<&str>, name: &str) -> Result<usize, DatabaseError> {
        let in_binding =
            |col: &ScopeColumn| table.is_none_or(|t| col.binding.eq_ignore_ascii_case(t));
        let visible = self.lookup(name, |col| {
            !col.hidden && in_binding(col) && col.name.eq_ignore_ascii_case(name)
        })?;
        let found = match visible {
            Some(index) => Some(index),
            None if is_rowid_name(name) => self.lookup(name, |col| col.hidden && in_binding(col))?,
            None => None,
        };
        found.ok_or_else(|| DatabaseError::ColumnNotFound {
            name: match table {
                Some(t) => format!("{}.{}", t, name),
                None => name.to_string(),
            },
        })
    }

    /// First match within a binding; matches under two bindings are ambiguous.
    fn lookup(
        &self,
        name: &str,
        matches: impl Fn(&ScopeColumn) -> bool,
    ) -> Result<Option<usize>, DatabaseError> {
        let mut found: Option<usize> = None;
        for (index, col) in self.columns.iter().enumerate() {
            if !matches(col) {
                continue;
            }
            match found {
                None => found = Some(index),
                Some(first) if self.columns[first].binding.eq_ignore_ascii_case(&col.binding) => {}
                Some(_) => {
                    return Err(DatabaseError::execution(format!(
                        "ambiguous column name: {}",
                        name
                    )));
                }
            }
        }
        Ok(found)
    }

    fn visible(&self, binding: Option<&str>) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| {
                !col.hidden && binding.is_none_or(|b| col.binding.eq_ignore_ascii_case(b))
            })
            .map(|(index, _)| index)
            .collect()
    }
}

/// A SELECT list entry after wildcard expansion.
enum Projection<'s> {
    Slot(usize),
    Item {
        expr: &'s Expr,
        alias: Option<&'s str>,
        span: Span,
    },
}

/// Group-by keys and aggregate calls collected while binding an aggregate
/// query. Bound expressions address the aggregate output row.
struct Grouping<'s> {
    scope: &'s Scope,
    group_by: Vec<Expression>,
    aggregates: Vec<AggregateExpression>,
}

impl Grouping<'_> {
    fn slot(&mut self, aggregate: AggregateExpression) -> Expression {
        let index = match self.aggregates.iter().position(|a| *a == aggregate) {
            Some(index) => index,
            None => {
                self.aggregates.push(aggregate);
                self.aggregates.len() - 1
            }
        };
        Expression::Column(self.group_by.len() + index)
    }

    /// A source column outside an aggregate call.
    fn column(&mut self, bound: Expression) -> Expression {
        match self.group_by.iter().position(|g| *g == bound) {
            Some(index) => Expression::Column(index),
            None => self.slot(AggregateExpression {
                function: AggregateFunction::AnyValue,
                arg: Some(bound),
                distinct: false,
            }),
        }
    }
}

fn misuse_of_aggregate(name: &str) -> DatabaseError {
    DatabaseError::execution(format!("misuse of aggregate function {}()", name))
}

fn boxed(plan: LogicalPlan) -> Box<LogicalPlan> {
    Box::new(plan)
}

fn command(plan: LogicalPlan, kind: StatementKind, tables: Vec<String>) -> PlannedStatement {
    PlannedStatement {
        plan,
        columns: Vec::new(),
        tables,
        kind,
    }
}

pub struct PlanBuilder<'a> {
    schemas: &'a SchemaManager,
    /// Full text the statement was parsed from; spans index into it.
    sql: &'a str,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(schemas: &'a SchemaManager, sql: &'a str) -> Self {
        Self { schemas, sql }
    }

    pub fn build(&self, statement: &Statement) -> Result<PlannedStatement, DatabaseError> {
        match statement {
            Statement::Select(select) => self.build_select(select),
            Statement::Insert(insert) => self.build_insert(insert),
            Statement::Update(update) => self.build_update(update),
            Statement::Delete(delete) => self.build_delete(delete),
            Statement::CreateTable(create) => self.build_create_table(create),
            Statement::DropTable { name, if_exists } => {
                reject_catalog(name)?;
                Ok(command(
                    LogicalPlan::DropTable(DropTablePlan {
                        table_name: name.clone(),
                        if_exists: *if_exists,
                    }),
                    StatementKind::Ddl,
                    vec![name.to_ascii_lowercase()],
                ))
            }
            Statement::AlterTable { table, action } => {
                reject_catalog(table)?;
                let action = match action {
                    AstAlterAction::AddColumn(definition) => {
                        AlterTableAction::AddColumn(self.column_schema(definition, 0)?)
                    }
                    AstAlterAction::RenameTo(new_name) => {
                        AlterTableAction::RenameTo(new_name.clone())
                    }
                };
                Ok(command(
                    LogicalPlan::AlterTable(AlterTablePlan {
                        table_name: table.clone(),
                        action,
                    }),
                    StatementKind::Ddl,
                    vec![table.to_ascii_lowercase()],
                ))
            }
            Statement::Begin => Ok(transaction(TransactionOp::Begin)),
            Statement::Commit => Ok(transaction(TransactionOp::Commit)),
            Statement::Rollback => Ok(transaction(TransactionOp::Rollback)),
        }
    }

    fn table(&self, name: &str) -> Result<TableSchema, DatabaseError> {
        if name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME) {
            return Ok(TableSchema::catalog());
        }
        self.schemas.lookup_table(name).cloned()
    }

    fn writable_table(&self, name: &str) -> Result<TableSchema, DatabaseError> {
        reject_catalog(name)?;
        self.table(name)
    }

    // ---------------------------------------------------------------- DDL

    fn build_create_table(
        &self,
        create: &CreateTableStatement,
    ) -> Result<PlannedStatement, DatabaseError> {
        let mut columns: Vec<ColumnSchema> = Vec::with_capacity(create.columns.len());
        for (position, definition) in create.columns.iter().enumerate() {
            if columns
                .iter()
                .any(|col| col.name.eq_ignore_ascii_case(&definition.name))
            {
                return Err(DatabaseError::execution(format!(
                    "duplicate column name: {}",
                    definition.name
                )));
            }
            columns.push(self.column_schema(definition, position)?);
        }
        Ok(command(
            LogicalPlan::CreateTable(CreateTablePlan {
                table_name: create.name.clone(),
                columns,
                sql: create.sql.clone(),
                if_not_exists: create.if_not_exists,
            }),
            StatementKind::Ddl,
            vec![create.name.to_ascii_lowercase()],
        ))
    }

    fn column_schema(
        &self,
        definition: &ColumnDefinition,
        position: usize,
    ) -> Result<ColumnSchema, DatabaseError> {
        let mut column = ColumnSchema::new(&definition.name, &definition.type_name, position);
        if definition.primary_key {
            column = column.primary_key();
        }
        if definition.autoincrement {
            column = column.autoincrement();
        }
        if definition.not_null {
            column = column.not_null();
        }
        if definition.unique {
            column = column.unique();
        }
        if let Some(default) = &definition.default {
            let what = format!("default value of column [{}]", definition.name);
            column = column.with_default(self.constant(default, &what)?);
        }
        Ok(column)
    }

    /// Folds an expression that may not read any column.
    fn constant(&self, expr: &Expr, what: &str) -> Result<Value, DatabaseError> {
        match self.bind(expr, &Scope::default()) {
            Ok(bound) => evaluate(&bound, &[]),
            Err(DatabaseError::ColumnNotFound { .. }) => {
                Err(DatabaseError::execution(format!("{} is not constant", what)))
            }
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------- DML

    fn column_target(table: &TableSchema, index: usize) -> ColumnTarget {
        if table.columns[index].is_rowid_alias() {
            ColumnTarget::RowId
        } else {
            ColumnTarget::Column(index)
        }
    }

    fn resolve_target(table: &TableSchema, name: &str) -> Result<ColumnTarget, DatabaseError> {
        match table.get_column_index(name) {
            Some(index) => Ok(Self::column_target(table, index)),
            None if is_rowid_name(name) => Ok(ColumnTarget::RowId),
            None => Err(DatabaseError::ColumnNotFound {
                name: format!("{}.{}", table.table_name, name),
            }),
        }
    }

    fn build_insert(&self, insert: &InsertStatement) -> Result<PlannedStatement, DatabaseError> {
        let table = self.writable_table(&insert.table)?;
        let targets: Vec<ColumnTarget> = match &insert.columns {
            None => (0..table.columns.len())
                .map(|index| Self::column_target(&table, index))
                .collect(),
            Some(names) => names
                .iter()
                .map(|name| Self::resolve_target(&table, name))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let empty = Scope::default();
        let mut rows = Vec::with_capacity(insert.rows.len());
        for values in &insert.rows {
            if values.len() != targets.len() {
                return Err(DatabaseError::execution(match &insert.columns {
                    None => format!(
                        "table {} has {} columns but {} values were supplied",
                        table.table_name,
                        targets.len(),
                        values.len()
                    ),
                    Some(_) => format!("{} values for {} columns", values.len(), targets.len()),
                }));
            }
            let row = values
                .iter()
                .map(|value| self.bind(value, &empty))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }

        let name = table.table_name.to_ascii_lowercase();
        Ok(command(
            LogicalPlan::Insert(InsertPlan {
                table,
                targets,
                rows,
            }),
            StatementKind::Dml,
            vec![name],
        ))
    }

    /// Scan of `table` narrowed by `where_clause`, as DML sees it.
    fn filtered_scan(
        &self,
        table: &TableSchema,
        scope: &Scope,
        where_clause: Option<&Expr>,
    ) -> Result<LogicalPlan, DatabaseError> {
        let mut scan = ScanPlan {
            table: table.clone(),
            range: KeyRange::full(),
        };
        let Some(where_clause) = where_clause else {
            return Ok(LogicalPlan::Scan(scan));
        };
        let predicate = self.bind(where_clause, scope)?;
        scan.range = key_range(table, &predicate);
        Ok(LogicalPlan::Filter(FilterPlan {
            input: boxed(LogicalPlan::Scan(scan)),
            predicate,
        }))
    }

    fn build_update(&self, update: &UpdateStatement) -> Result<PlannedStatement, DatabaseError> {
        let table = self.writable_table(&update.table)?;
        let scope = Scope::for_table(&table, &table.table_name);
        let source = self.filtered_scan(&table, &scope, update.where_clause.as_ref())?;
        let assignments = update
            .assignments
            .iter()
            .map(|(name, expr)| Ok((Self::resolve_target(&table, name)?, self.bind(expr, &scope)?)))
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let name = table.table_name.to_ascii_lowercase();
        Ok(command(
            LogicalPlan::Update(UpdatePlan {
                table,
                source: boxed(source),
                assignments,
            }),
            StatementKind::Dml,
            vec![name],
        ))
    }

    fn build_delete(&self, delete: &DeleteStatement) -> Result<PlannedStatement, DatabaseError> {
        let table = self.writable_table(&delete.table)?;
        let scope = Scope::for_table(&table, &table.table_name);
        let source = self.filtered_scan(&table, &scope, delete.where_clause.as_ref())?;
        let name = table.table_name.to_ascii_lowercase();
        Ok(command(
            LogicalPlan::Delete(DeletePlan {
                table,
                source: boxed(source),
            }),
            StatementKind::Dml,
            vec![name],
        ))
    }

    // ---------------------------------------------------------------- SELECT

    fn plan_table(
        &self,
        reference: &TableReference,
        tables: &mut Vec<String>,
    ) -> Result<(LogicalPlan, Scope), DatabaseError> {
        let table = self.table(&reference.name)?;
        let name = table.table_name.to_ascii_lowercase();
        if !tables.contains(&name) {
            tables.push(name);
        }
        let scope = Scope::for_table(&table, reference.binding_name());
        let plan = LogicalPlan::Scan(ScanPlan {
            table,
            range: KeyRange::full(),
        });
        Ok((plan, scope))
    }

    fn plan_from(
        &self,
        from: &FromClause,
        tables: &mut Vec<String>,
    ) -> Result<(LogicalPlan, Scope), DatabaseError> {
        let (mut plan, mut scope) = self.plan_table(&from.first, tables)?;
        for join in &from.joins {
            let (right, right_scope) = self.plan_table(&join.table, tables)?;
            let left_width = scope.width();
            let right_width = right_scope.width();
            scope = scope.join(right_scope);

            let condition = match &join.on {
                Some(on) => Some(self.bind(on, &scope)?),
                None => None,
            };
            let equi_keys = condition
                .as_ref()
                .map(|c| equi_keys(c, left_width, right_width))
                .unwrap_or_default();
            let join_type = match (join.kind, &condition) {
                (JoinKind::Left, _) => JoinType::Left,
                (_, None) => JoinType::Cross,
                (_, Some(_)) => JoinType::Inner,
            };
            plan = LogicalPlan::Join(JoinPlan {
                left: boxed(plan),
                right: boxed(right),
                join_type,
                condition,
                equi_keys,
                left_width,
                right_width,
            });
        }
        Ok((plan, scope))
    }

    fn expand_items<'s>(
        &self,
        items: &'s [SelectItem],
        scope: &Scope,
    ) -> Result<Vec<Projection<'s>>, DatabaseError> {
        let mut projections = Vec::new();
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    let slots = scope.visible(None);
                    if slots.is_empty() {
                        return Err(DatabaseError::execution("no tables specified"));
                    }
                    projections.extend(slots.into_iter().map(Projection::Slot));
                }
                SelectItem::QualifiedWildcard(binding) => {
                    if !scope.has_binding(binding) {
                        return Err(DatabaseError::TableNotFound {
                            name: binding.clone(),
                        });
                    }
                    projections
                        .extend(scope.visible(Some(binding)).into_iter().map(Projection::Slot));
                }
                SelectItem::Expr { expr, alias, span } => projections.push(Projection::Item {
                    expr,
                    alias: alias.as_deref(),
                    span: *span,
                }),
            }
        }
        Ok(projections)
    }

    fn column_name(&self, projection: &Projection<'_>, scope: &Scope) -> String {
        match projection {
            Projection::Slot(index) => scope.columns[*index].name.clone(),
            Projection::Item {
                alias: Some(alias), ..
            } => alias.to_string(),
            Projection::Item {
                expr: Expr::Column { name, .. },
                ..
            } => name.clone(),
            Projection::Item { span, .. } => self
                .sql
                .get(span.start..span.end)
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
        }
    }

    fn build_select(&self, select: &SelectStatement) -> Result<PlannedStatement, DatabaseError> {
        let mut tables = Vec::new();
        let (mut plan, scope) = match &select.from {
            Some(from) => self.plan_from(from, &mut tables)?,
            None => (
                LogicalPlan::Values(ValuesPlan {
                    rows: vec![Vec::new()],
                }),
                Scope::default(),
            ),
        };

        if let Some(where_clause) = &select.where_clause {
            let predicate = self.bind(where_clause, &scope)?;
            if let LogicalPlan::Scan(scan) = &mut plan {
                scan.range = key_range(&scan.table, &predicate);
            }
            plan = LogicalPlan::Filter(FilterPlan {
                input: boxed(plan),
                predicate,
            });
        }

        let projections = self.expand_items(&select.items, &scope)?;
        let columns: Vec<String> = projections
            .iter()
            .map(|p| self.column_name(p, &scope))
            .collect();

        let aggregate = !select.group_by.is_empty()
            || select.having.is_some()
            || projections.iter().any(|p| match p {
                Projection::Item { expr, .. } => expr.contains_aggregate(),
                Projection::Slot(_) => false,
            })
            || select.order_by.iter().any(|o| o.expr.contains_aggregate());

        let expressions;
        let sort_keys;
        if aggregate {
            let group_by = select
                .group_by
                .iter()
                .map(|expr| self.bind_group_key(expr, &projections, &scope))
                .collect::<Result<Vec<_>, _>>()?;
            let mut grouping = Grouping {
                scope: &scope,
                group_by,
                aggregates: Vec::new(),
            };
            let mut bound = Vec::with_capacity(projections.len());
            for projection in &projections {
                bound.push(match projection {
                    Projection::Slot(index) => grouping.column(Expression::Column(*index)),
                    Projection::Item { expr, .. } => self.bind_grouped(expr, &mut grouping)?,
                });
            }
            let having = match &select.having {
                Some(having) => Some(self.bind_grouped(having, &mut grouping)?),
                None => None,
            };
            sort_keys = self.sort_keys(select, &bound, &projections, |expr| {
                self.bind_grouped(expr, &mut grouping)
            })?;

            plan = LogicalPlan::Aggregate(AggregatePlan {
                input: boxed(plan),
                group_by: grouping.group_by,
                aggregates: grouping.aggregates,
            });
            if let Some(predicate) = having {
                plan = LogicalPlan::Filter(FilterPlan {
                    input: boxed(plan),
                    predicate,
                });
            }
            expressions = bound;
        } else {
            let bound = projections
                .iter()
                .map(|projection| match projection {
                    Projection::Slot(index) => Ok(Expression::Column(*index)),
                    Projection::Item { expr, .. } => self.bind(expr, &scope),
                })
                .collect::<Result<Vec<_>, DatabaseError>>()?;
            sort_keys =
                self.sort_keys(select, &bound, &projections, |expr| self.bind(expr, &scope))?;
            expressions = bound;
        }

        if !sort_keys.is_empty() {
            plan = LogicalPlan::Sort(SortPlan {
                input: boxed(plan),
                keys: sort_keys,
            });
        }
        plan = LogicalPlan::Project(ProjectPlan {
            input: boxed(plan),
            expressions,
        });
        if select.distinct {
            plan = LogicalPlan::Distinct(DistinctPlan { input: boxed(plan) });
        }
        if select.limit.is_some() || select.offset.is_some() {
            let limit = match &select.limit {
                Some(expr) => u64::try_from(self.integer_constant(expr, "LIMIT")?).ok(),
                None => None,
            };
            let offset = match &select.offset {
                Some(expr) => u64::try_from(self.integer_constant(expr, "OFFSET")?).unwrap_or(0),
                None => 0,
            };
            plan = LogicalPlan::Limit(LimitPlan {
                input: boxed(plan),
                limit,
                offset,
            });
        }

        Ok(PlannedStatement {
            plan,
            columns,
            tables,
            kind: StatementKind::Query,
        })
    }

    /// ORDER BY terms may name a result alias or a 1-based result position;
    /// anything else is bound by `bind_term` against the pre-projection row.
    fn sort_keys(
        &self,
        select: &SelectStatement,
        projected: &[Expression],
        projections: &[Projection<'_>],
        mut bind_term: impl FnMut(&Expr) -> Result<Expression, DatabaseError>,
    ) -> Result<Vec<SortKey>, DatabaseError> {
        let mut keys = Vec::with_capacity(select.order_by.len());
        for item in &select.order_by {
            let expression = match &item.expr {
                Expr::Literal(Value::Integer(position)) => {
                    let index = usize::try_from(*position)
                        .ok()
                        .filter(|p| (1..=projected.len()).contains(p))
                        .ok_or_else(|| {
                            DatabaseError::execution(format!(
                                "ORDER BY term out of range - should be between 1 and {}",
                                projected.len()
                            ))
                        })?;
                    projected[index - 1].clone()
                }
                Expr::Column { table: None, name } => {
                    match alias_position(projections, name) {
                        Some(index) => projected[index].clone(),
                        None => bind_term(&item.expr)?,
                    }
                }
                other => bind_term(other)?,
            };
            keys.push(SortKey {
                expression,
                descending: item.descending,
            });
        }
        Ok(keys)
    }

    /// GROUP BY terms are source expressions, result aliases or positions.
    fn bind_group_key(
        &self,
        expr: &Expr,
        projections: &[Projection<'_>],
        scope: &Scope,
    ) -> Result<Expression, DatabaseError> {
        let target = match expr {
            Expr::Literal(Value::Integer(position)) => {
                let index = usize::try_from(*position)
                    .ok()
                    .filter(|p| (1..=projections.len()).contains(p))
                    .ok_or_else(|| {
                        DatabaseError::execution(format!(
                            "GROUP BY term out of range - should be between 1 and {}",
                            projections.len()
                        ))
                    })?;
                Some(&projections[index - 1])
            }
            Expr::Column { table: None, name } => match self.bind(expr, scope) {
                Ok(bound) => return Ok(bound),
                Err(e @ DatabaseError::ColumnNotFound { .. }) => {
                    match alias_position(projections, name) {
                        Some(index) => Some(&projections[index]),
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            },
            _ => None,
        };
        match target {
            Some(Projection::Slot(index)) => Ok(Expression::Column(*index)),
            Some(Projection::Item { expr, .. }) if expr.contains_aggregate() => {
                Err(DatabaseError::execution(
                    "aggregate functions are not allowed in the GROUP BY clause",
                ))
            }
            Some(Projection::Item { expr, .. }) => self.bind(expr, scope),
            None => self.bind(expr, scope),
        }
    }

    fn integer_constant(&self, expr: &Expr, clause: &str) -> Result<i64, DatabaseError> {
        match self.constant(expr, clause)?.apply_affinity(DataType::Integer) {
            Value::Integer(n) => Ok(n),
            other => Err(DatabaseError::TypeMismatch {
                expected: format!("integer {}", clause),
                actual: other.column_type().to_string(),
            }),
        }
    }

    // ---------------------------------------------------------------- binding

    fn bind(&self, expr: &Expr, scope: &Scope) -> Result<Expression, DatabaseError> {
        self.bind_with(expr, scope, &mut |_| Ok(None))
    }

    /// Binds `expr` over the aggregate output row, registering group keys
    /// and aggregate calls in `grouping` as they are met.
    fn bind_grouped(
        &self,
        expr: &Expr,
        grouping: &mut Grouping<'_>,
    ) -> Result<Expression, DatabaseError> {
        let scope = grouping.scope;
        self.bind_with(expr, scope, &mut |node| {
            if let Expr::Function {
                name,
                args,
                distinct,
                star,
            } = node
                && is_aggregate_call(name, args.len(), *star)
            {
                let function = match (name.as_str(), *star) {
                    ("count", true) => AggregateFunction::CountStar,
                    ("count", false) => AggregateFunction::Count,
                    ("sum", _) => AggregateFunction::Sum,
                    ("total", _) => AggregateFunction::Total,
                    ("avg", _) => AggregateFunction::Avg,
                    ("min", _) => AggregateFunction::Min,
                    _ => AggregateFunction::Max,
                };
                let arg = match args.first() {
                    Some(arg) => Some(self.bind(arg, scope)?),
                    None => None,
                };
                return Ok(Some(grouping.slot(AggregateExpression {
                    function,
                    arg,
                    distinct: *distinct,
                })));
            }
            if matches!(node, Expr::Literal(_)) || node.contains_aggregate() {
                return Ok(None);
            }
            // Unresolvable names fall through and fail at the column leaf.
            let Ok(bound) = self.bind(node, scope) else {
                return Ok(None);
            };
            if let Some(index) = grouping.group_by.iter().position(|g| *g == bound) {
                return Ok(Some(Expression::Column(index)));
            }
            if matches!(node, Expr::Column { .. }) {
                return Ok(Some(grouping.column(bound)));
            }
            Ok(None)
        })
    }

    fn bind_with(
        &self,
        expr: &Expr,
        scope: &Scope,
        hook: &mut dyn FnMut(&Expr) -> Result<Option<Expression>, DatabaseError>,
    ) -> Result<Expression, DatabaseError> {
        if let Some(bound) = hook(expr)? {
            return Ok(bound);
        }
        let mut bind = |e: &Expr| self.bind_with(e, scope, &mut *hook).map(Box::new);
        let bound = match expr {
            Expr::Literal(value) => Expression::Literal(value.clone()),
            Expr::Column { table, name } => {
                Expression::Column(scope.resolve(table.as_deref(), name)?)
            }
            Expr::Unary { op, expr } => Expression::Unary {
                op: *op,
                expr: bind(expr)?,
            },
            Expr::Binary { left, op, right } => Expression::Binary {
                left: bind(left)?,
                op: *op,
                right: bind(right)?,
            },
            Expr::IsNull { expr, negated } => Expression::IsNull {
                expr: bind(expr)?,
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expression::Like {
                expr: bind(expr)?,
                pattern: bind(pattern)?,
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let expr = bind(expr)?;
                let list = list
                    .iter()
                    .map(|item| bind(item).map(|b| *b))
                    .collect::<Result<Vec<_>, _>>()?;
                Expression::InList {
                    expr,
                    list,
                    negated: *negated,
                }
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expression::Between {
                expr: bind(expr)?,
                low: bind(low)?,
                high: bind(high)?,
                negated: *negated,
            },
            Expr::Cast { expr, type_name } => Expression::Cast {
                expr: bind(expr)?,
                target: DataType::from_declared(type_name),
            },
            Expr::Function {
                name,
                args,
                distinct,
                star,
            } => {
                if is_aggregate_call(name, args.len(), *star) {
                    return Err(misuse_of_aggregate(name));
                }
                if *star {
                    return Err(DatabaseError::execution(format!(
                        "wrong number of arguments to function {}()",
                        name
                    )));
                }
                if *distinct {
                    return Err(DatabaseError::execution(format!(
                        "DISTINCT is only allowed in aggregate functions, not {}()",
                        name
                    )));
                }
                let function = ScalarFunction::resolve(name, args.len())?;
                let args = args
                    .iter()
                    .map(|arg| bind(arg).map(|b| *b))
                    .collect::<Result<Vec<_>, _>>()?;
                Expression::Function { function, args }
            }
        };
        Ok(bound)
    }
}

fn transaction(op: TransactionOp) -> PlannedStatement {
    command(LogicalPlan::Transaction(op), StatementKind::Transaction, Vec::new())
}

fn reject_catalog(name: &str) -> Result<(), DatabaseError> {
    if name.eq_ignore_ascii_case(SCHEMA_TABLE_NAME) {
        return Err(DatabaseError::execution(format!(
            "table {} may not be modified",
            SCHEMA_TABLE_NAME
        )));
    }
    Ok(())
}

fn alias_position(projections: &[Projection<'_>], name: &str) -> Option<usize> {
    projections.iter().position(|p| {
        matches!(p, Projection::Item { alias: Some(alias), .. } if alias.eq_ignore_ascii_case(name))
    })
}

/// Equality conjuncts comparing one side of a join with the other.
fn equi_keys(
    condition: &Expression,
    left_width: usize,
    right_width: usize,
) -> Vec<(Expression, Expression)> {
    let left_range = 0..left_width;
    let right_range = left_width..left_width + right_width;
    condition
        .conjuncts()
        .into_iter()
        .filter_map(|conjunct| {
            let Expression::Binary {
                left,
                op: BinaryOp::Eq,
                right,
            } = conjunct
            else {
                return None;
            };
            if left.only_references(left_range.clone())
                && right.only_references(right_range.clone())
            {
                Some(((**left).clone(), right.shift_columns(left_width)))
            } else if right.only_references(left_range.clone())
                && left.only_references(right_range.clone())
            {
                Some(((**right).clone(), left.shift_columns(left_width)))
            } else {
                None
            }
        })
        .collect()
}

fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}

/// Rowid bounds implied by comparisons of the rowid (or its INTEGER
/// PRIMARY KEY alias) with integer constants.
fn key_range(table: &TableSchema, predicate: &Expression) -> KeyRange {
    let rowid = table.columns.len();
    let alias = table.rowid_alias_index();
    let is_key =
        |e: &Expression| matches!(e, Expression::Column(i) if *i == rowid || Some(*i) == alias);

    let mut range = KeyRange::full();
    for conjunct in predicate.conjuncts() {
        let Expression::Binary { left, op, right } = conjunct else {
            continue;
        };
        let (op, constant) = if is_key(left) && right.is_constant() {
            (*op, right)
        } else if is_key(right) && left.is_constant() {
            (flip(*op), left)
        } else {
            continue;
        };
        let Ok(Value::Integer(key)) = evaluate(constant, &[]) else {
            continue;
        };
        match op {
            BinaryOp::Eq => {
                range.restrict_low(Bound::Included(key));
                range.restrict_high(Bound::Included(key));
            }
            BinaryOp::Gt => range.restrict_low(Bound::Excluded(key)),
            BinaryOp::GtEq => range.restrict_low(Bound::Included(key)),
            BinaryOp::Lt => range.restrict_high(Bound::Excluded(key)),
            BinaryOp::LtEq => range.restrict_high(Bound::Included(key)),
            _ => {}
        }
    }
    range
}
