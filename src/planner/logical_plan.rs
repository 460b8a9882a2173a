use std::ops::Bound;

use crate::{
    planner::expression::{AggregateExpression, Expression},
    storage::schema::{ColumnSchema, TableSchema},
    types::RowId,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan(ScanPlan),
    Values(ValuesPlan),
    Filter(FilterPlan),
    Project(ProjectPlan),
    Join(JoinPlan),
    Aggregate(AggregatePlan),
    Sort(SortPlan),
    Distinct(DistinctPlan),
    Limit(LimitPlan),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
    CreateTable(CreateTablePlan),
    DropTable(DropTablePlan),
    AlterTable(AlterTablePlan),
    Transaction(TransactionOp),
}

/// Rowid bounds of a scan. Rows outside the range are never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub low: Bound<RowId>,
    pub high: Bound<RowId>,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::full()
    }
}

impl KeyRange {
    pub fn full() -> Self {
        Self {
            low: Bound::Unbounded,
            high: Bound::Unbounded,
        }
    }

    pub fn is_full(&self) -> bool {
        self.low == Bound::Unbounded && self.high == Bound::Unbounded
    }

    /// Narrows the lower bound; the tighter of the two wins.
    pub fn restrict_low(&mut self, bound: Bound<RowId>) {
        self.low = match (self.low, bound) {
            (Bound::Unbounded, b) | (b, Bound::Unbounded) => b,
            (Bound::Included(a), Bound::Included(b)) => Bound::Included(a.max(b)),
            (Bound::Excluded(a), Bound::Excluded(b)) => Bound::Excluded(a.max(b)),
            (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
                if i > e { Bound::Included(i) } else { Bound::Excluded(e) }
            }
        };
    }

    pub fn restrict_high(&mut self, bound: Bound<RowId>) {
        self.high = match (self.high, bound) {
            (Bound::Unbounded, b) | (b, Bound::Unbounded) => b,
            (Bound::Included(a), Bound::Included(b)) => Bound::Included(a.min(b)),
            (Bound::Excluded(a), Bound::Excluded(b)) => Bound::Excluded(a.min(b)),
            (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
                if i < e { Bound::Included(i) } else { Bound::Excluded(e) }
            }
        };
    }
}

/// Reads a table. Output rows hold every column followed by the rowid.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub table: TableSchema,
    pub range: KeyRange,
}

/// Literal rows, e.g. the single empty row of a SELECT without FROM.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesPlan {
    pub rows: Vec<Vec<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterPlan {
    pub input: Box<LogicalPlan>,
    pub predicate: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPlan {
    pub input: Box<LogicalPlan>,
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

/// Output rows are the left row followed by the right row.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
    pub join_type: JoinType,
    /// Evaluated over the combined row.
    pub condition: Option<Expression>,
    /// Equality pairs of the condition: (over the left row, over the right row).
    pub equi_keys: Vec<(Expression, Expression)>,
    pub left_width: usize,
    pub right_width: usize,
}

/// Output rows are the group-by values followed by the aggregate values.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    pub input: Box<LogicalPlan>,
    pub group_by: Vec<Expression>,
    pub aggregates: Vec<AggregateExpression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expression: Expression,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortPlan {
    pub input: Box<LogicalPlan>,
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistinctPlan {
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitPlan {
    pub input: Box<LogicalPlan>,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Where an inserted or assigned value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTarget {
    Column(usize),
    /// The rowid itself, via `rowid` or an INTEGER PRIMARY KEY column.
    RowId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub table: TableSchema,
    pub targets: Vec<ColumnTarget>,
    pub rows: Vec<Vec<Expression>>,
}

/// Assignments are evaluated over the scan row of `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub table: TableSchema,
    pub source: Box<LogicalPlan>,
    pub assignments: Vec<(ColumnTarget, Expression)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub table: TableSchema,
    pub source: Box<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTablePlan {
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    pub sql: String,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTablePlan {
    pub table_name: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableAction {
    AddColumn(ColumnSchema),
    RenameTo(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTablePlan {
    pub table_name: String,
    pub action: AlterTableAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOp {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Dml,
    Ddl,
    Transaction,
}

/// A plan together with what the session layer needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStatement {
    pub plan: LogicalPlan,
    /// Result column names; empty for commands.
    pub columns: Vec<String>,
    /// Lowercase names of the tables the statement reads or writes.
    pub tables: Vec<String>,
    pub kind: StatementKind,
}

impl PlannedStatement {
    pub fn is_query(&self) -> bool {
        self.kind == StatementKind::Query
    }
}
