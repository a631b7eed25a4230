pub mod source;
pub mod sql;

use std::fmt;

use relq_error::Result;
use source::{
    BinaryExpr,
    BinaryOperator,
    CallExpr,
    CollectionExpr,
    ConstantExpr,
    LambdaExpr,
    MemberExpr,
    Method,
    NewExpr,
    OuterRowExpr,
    ParameterExpr,
    UnaryExpr,
    UnaryOperator,
    VariableExpr,
};
use sql::{
    ColumnExpr,
    FunctionCallExpr,
    JoinExpr,
    ProjectionExpr,
    ResultShape,
    SelectExpr,
    SubQueryExpr,
    TableExpr,
};

use crate::types::{DataType, Value};

/// An expression in either the composed operation tree or the bound SQL tree.
///
/// Binding rewrites source-level nodes into the SQL node kinds (`Table`
/// through `SubQuery`). Both live in one enum so that a single rewrite pass
/// can hold a mix of them, the way a projector mixes columns with plain value
/// expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant(ConstantExpr),
    Variable(VariableExpr),
    Parameter(ParameterExpr),
    Collection(CollectionExpr),
    Member(MemberExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Call(CallExpr),
    Lambda(LambdaExpr),
    New(NewExpr),
    OuterRow(OuterRowExpr),

    Table(TableExpr),
    Column(ColumnExpr),
    Select(SelectExpr),
    Join(JoinExpr),
    Projection(ProjectionExpr),
    FunctionCall(FunctionCallExpr),
    SubQuery(SubQueryExpr),
}

impl Expr {
    /// A null constant.
    pub fn null() -> Self {
        Expr::Constant(ConstantExpr {
            value: Value::Null,
            datatype: DataType::Null,
        })
    }

    /// Take the expression, leaving a null constant in its place.
    pub fn take(&mut self) -> Expr {
        std::mem::replace(self, Expr::null())
    }

    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Variable(_) => "variable",
            Self::Parameter(_) => "parameter",
            Self::Collection(_) => "collection",
            Self::Member(_) => "member access",
            Self::Unary(_) => "unary operator",
            Self::Binary(_) => "binary operator",
            Self::Call(_) => "method call",
            Self::Lambda(_) => "lambda",
            Self::New(_) => "constructor",
            Self::OuterRow(_) => "outer row reference",
            Self::Table(_) => "table",
            Self::Column(_) => "column",
            Self::Select(_) => "select",
            Self::Join(_) => "join",
            Self::Projection(_) => "projection",
            Self::FunctionCall(_) => "function call",
            Self::SubQuery(_) => "sub-query",
        }
    }

    /// If this is one of the SQL tree node kinds.
    pub const fn is_sql_node(&self) -> bool {
        matches!(
            self,
            Self::Table(_)
                | Self::Column(_)
                | Self::Select(_)
                | Self::Join(_)
                | Self::Projection(_)
                | Self::FunctionCall(_)
                | Self::SubQuery(_)
        )
    }

    /// Static type of the expression if it can be determined without the
    /// entity registry.
    pub fn static_type(&self) -> Option<DataType> {
        Some(match self {
            Self::Constant(c) => c.datatype.clone(),
            Self::Variable(v) => v.value.datatype(),
            Self::Parameter(p) => p.datatype.clone(),
            Self::Collection(c) => DataType::query_of(DataType::entity(&c.entity)),
            Self::Member(m) => match m.target.static_type()? {
                DataType::Record(fields) => fields
                    .into_iter()
                    .find(|f| f.name == m.member)?
                    .datatype,
                _ => return None,
            },
            Self::Unary(u) => match u.op {
                UnaryOperator::Not => DataType::Boolean,
                UnaryOperator::Negate => u.expr.static_type()?,
            },
            Self::Binary(b) => {
                if b.op.is_comparison() || b.op.is_logical() {
                    DataType::Boolean
                } else {
                    let left = b.left.static_type()?;
                    let right = b.right.static_type()?;
                    if b.op == BinaryOperator::Add && (left.is_text() || right.is_text()) {
                        DataType::Utf8
                    } else {
                        DataType::promote_numeric(&left, &right)?
                    }
                }
            }
            Self::Call(c) => match c.method {
                Method::CharAt => DataType::Char,
                Method::Exists | Method::NotExists => DataType::Boolean,
                _ => return None,
            },
            Self::Lambda(_) => return None,
            Self::New(n) => n.datatype.clone(),
            Self::OuterRow(r) => r.datatype.clone(),
            Self::Table(t) => DataType::query_of(DataType::entity(&t.entity)),
            Self::Column(c) => c.datatype.clone(),
            Self::Select(_) | Self::Join(_) => return None,
            Self::Projection(p) => {
                let elem = p.projector.static_type().unwrap_or(DataType::Null);
                match p.shape {
                    ResultShape::Queryable => DataType::query_of(elem),
                    ResultShape::List => DataType::list_of(elem),
                }
            }
            Self::FunctionCall(f) => f.datatype.clone(),
            Self::SubQuery(_) => DataType::Boolean,
        })
    }

    /// Call `func` on every direct child of this expression.
    ///
    /// Every pass over the tree relies on this (and `for_each_child_mut`)
    /// visiting children in the same order.
    pub fn for_each_child<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a Expr) -> Result<()>,
    {
        match self {
            Self::Constant(_)
            | Self::Variable(_)
            | Self::Parameter(_)
            | Self::Collection(_)
            | Self::OuterRow(_)
            | Self::Table(_)
            | Self::Column(_) => (),
            Self::Member(member) => func(&member.target)?,
            Self::Unary(unary) => func(&unary.expr)?,
            Self::Binary(binary) => {
                func(&binary.left)?;
                func(&binary.right)?;
            }
            Self::Call(call) => {
                if let Some(instance) = &call.instance {
                    func(instance)?;
                }
                for arg in &call.args {
                    func(arg)?;
                }
            }
            Self::Lambda(lambda) => func(&lambda.body)?,
            Self::New(new) => {
                for (_, expr) in &new.members {
                    func(expr)?;
                }
            }
            Self::Select(select) => select_for_each_child(select, func)?,
            Self::Join(join) => {
                func(&join.left)?;
                func(&join.right)?;
                if let Some(condition) = &join.condition {
                    func(condition)?;
                }
            }
            Self::Projection(projection) => {
                select_for_each_child(&projection.source, func)?;
                func(&projection.projector)?;
            }
            Self::FunctionCall(call) => function_for_each_child(call, func)?,
            Self::SubQuery(subquery) => function_for_each_child(&subquery.call, func)?,
        }
        Ok(())
    }

    /// Mutable variant of `for_each_child`.
    pub fn for_each_child_mut<F>(&mut self, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut Expr) -> Result<()>,
    {
        match self {
            Self::Constant(_)
            | Self::Variable(_)
            | Self::Parameter(_)
            | Self::Collection(_)
            | Self::OuterRow(_)
            | Self::Table(_)
            | Self::Column(_) => (),
            Self::Member(member) => func(&mut member.target)?,
            Self::Unary(unary) => func(&mut unary.expr)?,
            Self::Binary(binary) => {
                func(&mut binary.left)?;
                func(&mut binary.right)?;
            }
            Self::Call(call) => {
                if let Some(instance) = &mut call.instance {
                    func(instance)?;
                }
                for arg in &mut call.args {
                    func(arg)?;
                }
            }
            Self::Lambda(lambda) => func(&mut lambda.body)?,
            Self::New(new) => {
                for (_, expr) in &mut new.members {
                    func(expr)?;
                }
            }
            Self::Select(select) => select_for_each_child_mut(select, func)?,
            Self::Join(join) => {
                func(&mut join.left)?;
                func(&mut join.right)?;
                if let Some(condition) = &mut join.condition {
                    func(condition)?;
                }
            }
            Self::Projection(projection) => {
                select_for_each_child_mut(&mut projection.source, func)?;
                func(&mut projection.projector)?;
            }
            Self::FunctionCall(call) => function_for_each_child_mut(call, func)?,
            Self::SubQuery(subquery) => function_for_each_child_mut(&mut subquery.call, func)?,
        }
        Ok(())
    }

    /// Replace every direct child with the output of `func`.
    pub fn map_children<F>(mut self, func: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        self.for_each_child_mut(&mut |child| {
            let owned = child.take();
            *child = func(owned)?;
            Ok(())
        })?;
        Ok(self)
    }

    /// Walk the entire tree, parents before children.
    pub fn walk<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a Expr) -> Result<()>,
    {
        func(self)?;
        self.for_each_child(&mut |child| child.walk(func))
    }
}

fn select_for_each_child<'a, F>(select: &'a SelectExpr, func: &mut F) -> Result<()>
where
    F: FnMut(&'a Expr) -> Result<()>,
{
    for column in &select.columns {
        func(&column.expr)?;
    }
    func(&select.from)?;
    if let Some(filter) = &select.filter {
        func(filter)?;
    }
    Ok(())
}

fn select_for_each_child_mut<F>(select: &mut SelectExpr, func: &mut F) -> Result<()>
where
    F: FnMut(&mut Expr) -> Result<()>,
{
    for column in &mut select.columns {
        func(&mut column.expr)?;
    }
    func(&mut select.from)?;
    if let Some(filter) = &mut select.filter {
        func(filter)?;
    }
    Ok(())
}

fn function_for_each_child<'a, F>(call: &'a FunctionCallExpr, func: &mut F) -> Result<()>
where
    F: FnMut(&'a Expr) -> Result<()>,
{
    if let Some(instance) = &call.instance {
        func(instance)?;
    }
    for arg in &call.args {
        func(arg)?;
    }
    Ok(())
}

fn function_for_each_child_mut<F>(call: &mut FunctionCallExpr, func: &mut F) -> Result<()>
where
    F: FnMut(&mut Expr) -> Result<()>,
{
    if let Some(instance) = &mut call.instance {
        func(instance)?;
    }
    for arg in &mut call.args {
        func(arg)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(c) => match &c.value {
                Value::Utf8(s) => write!(f, "'{s}'"),
                Value::Char(ch) => write!(f, "'{ch}'"),
                other => write!(f, "{other}"),
            },
            Self::Variable(v) => write!(f, "{}", v.name),
            Self::Parameter(p) => write!(f, "{}", p.name),
            Self::Collection(c) => write!(f, "Collection<{}>", c.entity),
            Self::Member(m) => write!(f, "{}.{}", m.target, m.member),
            Self::Unary(u) => write!(f, "{}({})", u.op, u.expr),
            Self::Binary(b) => write!(f, "({} {} {})", b.left, b.op, b.right),
            Self::Call(c) => {
                if let Some(instance) = &c.instance {
                    write!(f, "{instance}.")?;
                }
                write!(f, "{}(", c.method)?;
                write_list(f, &c.args)?;
                write!(f, ")")
            }
            Self::Lambda(l) => {
                write!(f, "(")?;
                for (idx, param) in l.params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param.name)?;
                }
                write!(f, ") => {}", l.body)
            }
            Self::New(n) => {
                write!(f, "new {} {{", n.datatype)?;
                for (idx, (name, expr)) in n.members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name} = {expr}")?;
                }
                write!(f, " }}")
            }
            Self::OuterRow(r) => write!(f, "outer{}[{}]", r.depth, r.ordinal),
            Self::Table(t) => write!(f, "{} {}", t.name, t.alias),
            Self::Column(c) if c.alias.is_empty() => write!(f, "{}", c.name),
            Self::Column(c) => write!(f, "{}.{}", c.alias, c.name),
            Self::Select(s) => write!(f, "Select({})", s.alias),
            Self::Join(j) => write!(f, "Join({})", j.kind),
            Self::Projection(p) => write!(f, "Projection({}, {})", p.source.alias, p.projector),
            Self::FunctionCall(c) => {
                write!(f, "{}(", c.function)?;
                if let Some(instance) = &c.instance {
                    write!(f, "{instance}")?;
                    if !c.args.is_empty() {
                        write!(f, ", ")?;
                    }
                }
                write_list(f, &c.args)?;
                write!(f, ")")
            }
            Self::SubQuery(s) => {
                write!(f, "{}(rawSql({}), ", s.call.function, s.sql)?;
                write_list(f, &s.call.args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}

pub fn lit(value: impl Into<Value>) -> Expr {
    let value = value.into();
    Expr::Constant(ConstantExpr {
        datatype: value.datatype(),
        value,
    })
}

/// A captured local variable.
pub fn var(name: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Variable(VariableExpr {
        name: name.into(),
        value: value.into(),
    })
}

pub fn param(name: impl Into<String>, datatype: DataType) -> ParameterExpr {
    ParameterExpr::new(name, datatype)
}

pub fn collection(entity: impl Into<String>) -> Expr {
    Expr::Collection(CollectionExpr {
        entity: entity.into(),
    })
}

pub fn member(target: Expr, name: impl Into<String>) -> Expr {
    Expr::Member(MemberExpr {
        target: Box::new(target),
        member: name.into(),
    })
}

pub fn unary(op: UnaryOperator, expr: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        op,
        expr: Box::new(expr),
    })
}

pub fn not(expr: Expr) -> Expr {
    unary(UnaryOperator::Not, expr)
}

pub fn negate(expr: Expr) -> Expr {
    unary(UnaryOperator::Negate, expr)
}

pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
    Expr::Binary(BinaryExpr {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

macro_rules! binary_builder {
    ($name:ident, $op:ident) => {
        pub fn $name(left: Expr, right: Expr) -> Expr {
            binary(BinaryOperator::$op, left, right)
        }
    };
}

binary_builder!(and, And);
binary_builder!(or, Or);
binary_builder!(eq, Eq);
binary_builder!(not_eq, NotEq);
binary_builder!(lt, Lt);
binary_builder!(lt_eq, LtEq);
binary_builder!(gt, Gt);
binary_builder!(gt_eq, GtEq);
binary_builder!(add, Add);
binary_builder!(sub, Sub);
binary_builder!(mul, Mul);
binary_builder!(div, Div);
binary_builder!(rem, Mod);

pub fn call(method: Method, instance: Option<Expr>, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        method,
        instance: instance.map(Box::new),
        args,
    })
}

/// Single character string indexing, `string[index]`.
pub fn char_at(string: Expr, index: Expr) -> Expr {
    call(Method::CharAt, Some(string), vec![index])
}

pub fn lambda(params: impl IntoIterator<Item = ParameterExpr>, body: Expr) -> Expr {
    Expr::Lambda(LambdaExpr {
        params: params.into_iter().collect(),
        body: Box::new(body),
    })
}

/// Construct a record of the given type from member expressions.
pub fn record<S>(datatype: DataType, members: impl IntoIterator<Item = (S, Expr)>) -> Expr
where
    S: Into<String>,
{
    Expr::New(NewExpr {
        datatype,
        members: members
            .into_iter()
            .map(|(name, expr)| (name.into(), expr))
            .collect(),
    })
}

pub fn select(source: Expr, selector: Expr) -> Expr {
    call(Method::Select, None, vec![source, selector])
}

pub fn filter(source: Expr, predicate: Expr) -> Expr {
    call(Method::Where, None, vec![source, predicate])
}

pub fn join(
    outer: Expr,
    inner: Expr,
    outer_key: Expr,
    inner_key: Expr,
    result_selector: Expr,
) -> Expr {
    call(
        Method::Join,
        None,
        vec![outer, inner, outer_key, inner_key, result_selector],
    )
}

pub fn to_list(source: Expr) -> Expr {
    call(Method::ToList, None, vec![source])
}

pub fn exists(collection: Expr, predicate: Expr) -> Expr {
    call(Method::Exists, Some(collection), vec![predicate])
}

pub fn not_exists(collection: Expr, predicate: Expr) -> Expr {
    call(Method::NotExists, Some(collection), vec![predicate])
}
