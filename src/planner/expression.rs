use crate::{
    planner::ast::{BinaryOp, UnaryOp},
    types::{
        error::DatabaseError,
        value::{DataType, Value},
    },
};

/// An expression whose column references are resolved to positions in the
/// input row of the operator evaluating it.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Column(usize),
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Cast {
        expr: Box<Expression>,
        target: DataType,
    },
    Function {
        function: ScalarFunction,
        args: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Upper,
    Lower,
    Length,
    Abs,
    Coalesce,
    IfNull,
    TypeOf,
    Substr,
    Hex,
    Round,
    Min,
    Max,
}

impl ScalarFunction {
    /// Resolves a call by name, checking the argument count.
    pub fn resolve(name: &str, arg_count: usize) -> Result<Self, DatabaseError> {
        let (function, arity_ok) = match name {
            "upper" => (ScalarFunction::Upper, arg_count == 1),
            "lower" => (ScalarFunction::Lower, arg_count == 1),
            "length" => (ScalarFunction::Length, arg_count == 1),
            "abs" => (ScalarFunction::Abs, arg_count == 1),
            "coalesce" => (ScalarFunction::Coalesce, arg_count >= 2),
            "ifnull" => (ScalarFunction::IfNull, arg_count == 2),
            "typeof" => (ScalarFunction::TypeOf, arg_count == 1),
            "substr" | "substring" => (ScalarFunction::Substr, matches!(arg_count, 2 | 3)),
            "hex" => (ScalarFunction::Hex, arg_count == 1),
            "round" => (ScalarFunction::Round, matches!(arg_count, 1 | 2)),
            "min" => (ScalarFunction::Min, arg_count >= 2),
            "max" => (ScalarFunction::Max, arg_count >= 2),
            _ => {
                return Err(DatabaseError::execution(format!("no such function: {}", name)));
            }
        };
        if !arity_ok {
            return Err(DatabaseError::execution(format!(
                "wrong number of arguments to function {}()",
                name
            )));
        }
        Ok(function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Total,
    Avg,
    Min,
    Max,
    /// Value of a bare column in an aggregate query: taken from the last
    /// row of the group.
    AnyValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpression {
    pub function: AggregateFunction,
    pub arg: Option<Expression>,
    pub distinct: bool,
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::Column(index)
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn binary(left: Expression, op: BinaryOp, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_) | Expression::Column(_) => Vec::new(),
            Expression::Unary { expr, .. }
            | Expression::IsNull { expr, .. }
            | Expression::Cast { expr, .. } => vec![expr],
            Expression::Binary { left, right, .. } => vec![left, right],
            Expression::Like { expr, pattern, .. } => vec![expr, pattern],
            Expression::InList { expr, list, .. } => {
                std::iter::once(expr.as_ref()).chain(list.iter()).collect()
            }
            Expression::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
            Expression::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Every column position the expression reads.
    pub fn referenced_columns(&self, out: &mut Vec<usize>) {
        if let Expression::Column(index) = self {
            out.push(*index);
        }
        for child in self.children() {
            child.referenced_columns(out);
        }
    }

    pub fn is_constant(&self) -> bool {
        let mut columns = Vec::new();
        self.referenced_columns(&mut columns);
        columns.is_empty()
    }

    /// True when every column read falls in `range`.
    pub fn only_references(&self, range: std::ops::Range<usize>) -> bool {
        let mut columns = Vec::new();
        self.referenced_columns(&mut columns);
        !columns.is_empty() && columns.iter().all(|c| range.contains(c))
    }

    /// Same expression with every column position moved down by `offset`.
    pub fn shift_columns(&self, offset: usize) -> Expression {
        self.map_columns(&|index| index - offset)
    }

    fn map_columns(&self, f: &dyn Fn(usize) -> usize) -> Expression {
        let boxed = |e: &Expression| Box::new(e.map_columns(f));
        match self {
            Expression::Literal(v) => Expression::Literal(v.clone()),
            Expression::Column(index) => Expression::Column(f(*index)),
            Expression::Unary { op, expr } => Expression::Unary {
                op: *op,
                expr: boxed(expr),
            },
            Expression::Binary { left, op, right } => Expression::Binary {
                left: boxed(left),
                op: *op,
                right: boxed(right),
            },
            Expression::IsNull { expr, negated } => Expression::IsNull {
                expr: boxed(expr),
                negated: *negated,
            },
            Expression::Like {
                expr,
                pattern,
                negated,
            } => Expression::Like {
                expr: boxed(expr),
                pattern: boxed(pattern),
                negated: *negated,
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: boxed(expr),
                list: list.iter().map(|e| e.map_columns(f)).collect(),
                negated: *negated,
            },
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => Expression::Between {
                expr: boxed(expr),
                low: boxed(low),
                high: boxed(high),
                negated: *negated,
            },
            Expression::Cast { expr, target } => Expression::Cast {
                expr: boxed(expr),
                target: *target,
            },
            Expression::Function { function, args } => Expression::Function {
                function: *function,
                args: args.iter().map(|e| e.map_columns(f)).collect(),
            },
        }
    }

    /// Splits an `AND` chain into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        match self {
            Expression::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }
}
