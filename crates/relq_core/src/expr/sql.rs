//! SQL abstract syntax tree nodes produced by the binder.

use std::fmt;

use super::Expr;
use super::source::Method;
use crate::types::DataType;

/// A base table reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableExpr {
    /// Table name from the entity registry.
    pub name: String,
    pub alias: String,
    /// Entity (element type) backing this table.
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnExpr {
    /// Alias of the select or table this column resolves against. Empty for
    /// a column of the unaliased table an existence sub-query scans.
    pub alias: String,
    pub name: String,
    pub ordinal: usize,
    pub datatype: DataType,
}

/// A named output column of a select.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDeclaration {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectExpr {
    pub alias: String,
    /// Output columns. Column `i` always has ordinal `i`.
    pub columns: Vec<ColumnDeclaration>,
    pub from: Box<Expr>,
    /// WHERE predicate.
    pub filter: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Cross,
    Inner,
    CrossApply,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cross => write!(f, "CROSS JOIN"),
            Self::Inner => write!(f, "INNER JOIN"),
            Self::CrossApply => write!(f, "CROSS APPLY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinExpr {
    pub kind: JoinKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    /// Join condition, absent for cross joins.
    pub condition: Option<Box<Expr>>,
}

/// Shape a nested projection is materialized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultShape {
    /// A queryable wrapping the materialized rows.
    #[default]
    Queryable,
    /// A plain list.
    List,
}

/// A select paired with the logical projector building one value per row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectionExpr {
    pub source: Box<SelectExpr>,
    /// References only columns at `source.alias`, or nested projections.
    pub projector: Box<Expr>,
    pub shape: ResultShape,
}

impl ProjectionExpr {
    pub fn alias(&self) -> &str {
        &self.source.alias
    }
}

/// SQL functions the binder lowers calls to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Substr,
    Exists,
    NotExists,
}

impl fmt::Display for SqlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substr => write!(f, "SUBSTR"),
            Self::Exists => write!(f, "EXISTS"),
            Self::NotExists => write!(f, "NOT EXISTS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionCallExpr {
    /// The call this function was lowered from.
    pub method: Method,
    pub function: SqlFunction,
    pub instance: Option<Box<Expr>>,
    pub args: Vec<Expr>,
    pub datatype: DataType,
}

/// A sub-query embedded as literal SQL text.
///
/// Used for `Exists`/`NotExists`. `sql` is the literal `SELECT * FROM <table>`
/// text, emitted verbatim. The call identifies where it came from and holds
/// the bound predicate in `args`, so columns it references from enclosing
/// selects are still rewritten by column projection and correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubQueryExpr {
    pub call: FunctionCallExpr,
    pub sql: String,
}
