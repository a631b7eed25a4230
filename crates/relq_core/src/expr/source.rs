//! Nodes of the composed operation tree, before binding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Expr;
use crate::types::{DataType, Value};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a lambda parameter.
///
/// Two parameters with the same name are distinct unless they share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterExpr {
    pub id: ParamId,
    pub name: String,
    pub datatype: DataType,
}

impl ParameterExpr {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ParameterExpr {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            datatype,
        }
    }

    pub fn expr(&self) -> Expr {
        Expr::Parameter(self.clone())
    }

    /// Member access on this parameter, e.g. `s.name`.
    pub fn member(&self, name: impl Into<String>) -> Expr {
        super::member(self.expr(), name)
    }
}

impl From<ParameterExpr> for Expr {
    fn from(value: ParameterExpr) -> Self {
        Expr::Parameter(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantExpr {
    pub value: Value,
    pub datatype: DataType,
}

/// A value captured from the caller's scope.
///
/// Always folded into a constant before binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableExpr {
    pub name: String,
    pub value: Value,
}

/// A raw table-backed collection of entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionExpr {
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberExpr {
    pub target: Box<Expr>,
    pub member: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "!"),
            Self::Negate => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnaryExpr {
    pub op: UnaryOperator,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOperator {
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub const fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Eq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Mod => write!(f, "%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryExpr {
    pub op: BinaryOperator,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

/// Identity of a method call in the operation tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `select(source, selector)`
    Select,
    /// `where(source, predicate)`
    Where,
    /// `join(outer, inner, outer_key, inner_key, result_selector)`
    Join,
    /// `to_list(source)`, declares a nested result as a list.
    ToList,
    /// `string[index]`, single character string indexing.
    CharAt,
    /// `collection.exists(predicate)`
    Exists,
    /// `collection.not_exists(predicate)`
    NotExists,
    /// Anything else. Never bindable.
    Named(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select => write!(f, "Select"),
            Self::Where => write!(f, "Where"),
            Self::Join => write!(f, "Join"),
            Self::ToList => write!(f, "ToList"),
            Self::CharAt => write!(f, "CharAt"),
            Self::Exists => write!(f, "Exists"),
            Self::NotExists => write!(f, "NotExists"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallExpr {
    pub method: Method,
    pub instance: Option<Box<Expr>>,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LambdaExpr {
    pub params: Vec<ParameterExpr>,
    pub body: Box<Expr>,
}

/// Constructor or member-init expression producing a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewExpr {
    pub datatype: DataType,
    pub members: Vec<(String, Expr)>,
}

impl NewExpr {
    /// Get the expression bound to a member.
    pub fn member(&self, name: &str) -> Option<&Expr> {
        self.members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, expr)| expr)
    }
}

/// Read of an enclosing row currently being materialized.
///
/// Only exists inside nested projections compiled for correlated sub-query
/// execution. `depth` 0 is the row of the immediately enclosing projection,
/// each further level of nesting adds one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OuterRowExpr {
    pub depth: usize,
    pub ordinal: usize,
    pub datatype: DataType,
}
