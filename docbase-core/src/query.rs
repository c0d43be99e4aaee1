//! Query construction over index columns.
//!
//! Queries filter against the columns of one registered index (the query's
//! *primary* index), optionally joined to further indexes on document id.
//! [`col`] starts a field expression; expressions combine with `and`/`or`/
//! `not` into the predicate tree the compiler renders to SQL.
//!
//! # Example
//!
//! ```ignore
//! use docbase_core::query::{col, desc};
//!
//! let expr = col("name").eq("Alice").and(col("age").gte(21i64));
//! let order = desc("age");
//! ```

use crate::filter::DateFilter;
use crate::value::SqlValue;

/// A reference to an index column: bare (`"name"`) for the primary index,
/// dotted (`"by_tag.tag"`) for a joined index.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// The joined index carrying the column, or `None` for the primary.
    pub index: Option<String>,
    /// The column name within that index.
    pub column: String,
}

impl ColumnRef {
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((index, column)) => Self {
                index: Some(index.to_string()),
                column: column.to_string(),
            },
            None => Self { index: None, column: name.to_string() },
        }
    }
}

/// Comparison operators usable in field expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// A predicate over index columns.
///
/// Combine with [`Expr::and`], [`Expr::or`] and [`Expr::not`]; `And`/`Or`
/// flatten when chained, mirroring how callers read them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: SqlValue,
    },
    /// Inclusive range check.
    Between {
        column: ColumnRef,
        low: SqlValue,
        high: SqlValue,
    },
    In {
        column: ColumnRef,
        values: Vec<SqlValue>,
    },
    IsNull {
        column: ColumnRef,
        negated: bool,
    },
}

impl Expr {
    /// Combines this expression with another using logical AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// A field expression in progress; finish it with a comparison method.
#[derive(Debug, Clone)]
pub struct FieldExpr {
    column: ColumnRef,
}

/// Starts a field expression on the named column.
pub fn col(name: &str) -> FieldExpr {
    FieldExpr { column: ColumnRef::parse(name) }
}

impl FieldExpr {
    pub fn eq(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    pub fn lte(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    pub fn gte(self, value: impl Into<SqlValue>) -> Expr {
        self.compare(CompareOp::Ge, value)
    }

    /// SQL LIKE with the backend's default escape rules.
    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Compare {
            column: self.column,
            op: CompareOp::Like,
            value: SqlValue::Text(pattern.into()),
        }
    }

    /// Inclusive BETWEEN.
    pub fn between(self, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Expr {
        Expr::Between {
            column: self.column,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn is_in<T: Into<SqlValue>>(self, values: impl IntoIterator<Item = T>) -> Expr {
        Expr::In {
            column: self.column,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull { column: self.column, negated: false }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull { column: self.column, negated: true }
    }

    /// Applies a parsed date-filter expression to this column.
    pub fn within(self, filter: DateFilter) -> Expr {
        filter.into_expr(self.column)
    }

    fn compare(self, op: CompareOp, value: impl Into<SqlValue>) -> Expr {
        Expr::Compare { column: self.column, op, value: value.into() }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

/// Ascending order on a column.
pub fn asc(name: &str) -> OrderBy {
    OrderBy { column: ColumnRef::parse(name), descending: false }
}

/// Descending order on a column.
pub fn desc(name: &str) -> OrderBy {
    OrderBy { column: ColumnRef::parse(name), descending: true }
}

/// The assembled query: predicate, joins, ordering and paging.
///
/// Built through the session's typed query builder; carried to the compiler
/// as plain data.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Option<Expr>,
    /// Names of further indexes inner-joined on document id.
    pub joins: Vec<String>,
    pub order: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }
}
