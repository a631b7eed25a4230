//! Rendering of bound SQL trees to query text.

pub mod ident;

use std::fmt::Write as _;

use ident::IdentifierCase;
use relq_error::{DbError, Result};

use crate::catalog::TableInfo;
use crate::config::ProviderConfig;
use crate::expr::Expr;
use crate::expr::source::{BinaryExpr, BinaryOperator, ParamId, UnaryOperator};
use crate::expr::sql::{JoinExpr, SelectExpr};
use crate::types::{DataType, Value};

/// A lambda parameter rendered as the bare column names of a table.
///
/// Used for predicates of commands against a single unaliased table.
#[derive(Debug, Clone, Copy)]
pub struct BareParameter<'a> {
    pub id: ParamId,
    pub table: &'a TableInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indentation {
    Same,
    Inner,
    Outer,
}

#[derive(Debug)]
pub struct QueryFormatter<'a> {
    case: IdentifierCase,
    indent_width: usize,
    bare: Option<BareParameter<'a>>,
}

impl<'a> QueryFormatter<'a> {
    pub fn new(config: &ProviderConfig) -> Self {
        QueryFormatter {
            case: config.identifier_case,
            indent_width: config.indent_width,
            bare: None,
        }
    }

    pub fn with_bare_parameter(mut self, id: ParamId, table: &'a TableInfo) -> Self {
        self.bare = Some(BareParameter { id, table });
        self
    }

    /// Format a select, projection, or scalar expression.
    pub fn format(&self, expr: &Expr) -> Result<String> {
        let mut state = FormatState {
            buf: String::new(),
            depth: 0,
        };

        match expr {
            Expr::Select(select) => self.write_select(&mut state, select)?,
            Expr::Projection(projection) => self.write_select(&mut state, &projection.source)?,
            other => self.write_scalar(&mut state, other, false)?,
        }

        Ok(state.buf)
    }

    /// Format an expression in condition position, e.g. the body of a `WHERE`.
    pub fn format_predicate(&self, expr: &Expr) -> Result<String> {
        let mut state = FormatState {
            buf: String::new(),
            depth: 0,
        };
        self.write_predicate(&mut state, expr, false)?;
        Ok(state.buf)
    }

    /// Normalize an identifier according to the configured case.
    pub fn ident(&self, ident: &str) -> String {
        self.case.normalize(ident)
    }

    fn write_select(&self, state: &mut FormatState, select: &SelectExpr) -> Result<()> {
        state.buf.push_str("SELECT ");

        if select.columns.is_empty() {
            // Keep the row count of the source.
            state.buf.push_str("NULL");
        }

        for (idx, column) in select.columns.iter().enumerate() {
            if idx > 0 {
                state.buf.push_str(", ");
            }
            self.write_scalar(state, &column.expr, false)?;

            let same_name = matches!(&column.expr, Expr::Column(c) if c.name == column.name);
            if !same_name {
                write!(state.buf, " AS {}", self.ident(&column.name))?;
            }
        }

        state.newline(Indentation::Same, self.indent_width);
        state.buf.push_str("FROM ");
        self.write_source(state, &select.from)?;

        if let Some(filter) = &select.filter {
            state.newline(Indentation::Same, self.indent_width);
            state.buf.push_str("WHERE ");
            self.write_predicate(state, filter, false)?;
        }

        Ok(())
    }

    fn write_source(&self, state: &mut FormatState, source: &Expr) -> Result<()> {
        match source {
            Expr::Table(table) => {
                write!(
                    state.buf,
                    "{} {}",
                    self.ident(&table.name),
                    self.ident(&table.alias)
                )?;
            }
            Expr::Select(select) => {
                state.buf.push('(');
                state.newline(Indentation::Inner, self.indent_width);
                self.write_select(state, select)?;
                state.newline(Indentation::Outer, self.indent_width);
                write!(state.buf, ") {}", self.ident(&select.alias))?;
            }
            Expr::Join(join) => self.write_join(state, join)?,
            other => {
                return Err(unsupported(other, "as a query source"));
            }
        }
        Ok(())
    }

    fn write_join(&self, state: &mut FormatState, join: &JoinExpr) -> Result<()> {
        self.write_source(state, &join.left)?;
        state.newline(Indentation::Same, self.indent_width);
        write!(state.buf, "{} ", join.kind)?;
        self.write_source(state, &join.right)?;

        if let Some(condition) = &join.condition {
            state.newline(Indentation::Inner, self.indent_width);
            state.buf.push_str("ON ");
            self.write_predicate(state, condition, false)?;
            state.depth -= 1;
        }

        Ok(())
    }

    /// Write an expression where a condition is required.
    ///
    /// Boolean values aren't conditions, so constants become `1 = 1` or
    /// `1 = 0` and boolean columns are compared against 1.
    fn write_predicate(&self, state: &mut FormatState, expr: &Expr, nested: bool) -> Result<()> {
        match expr {
            Expr::Constant(constant) if constant.value == Value::Boolean(true) => {
                write_wrapped(state, nested, "1 = 1");
            }
            Expr::Constant(constant) if constant.value == Value::Boolean(false) => {
                write_wrapped(state, nested, "1 = 0");
            }
            Expr::Column(column) if column.datatype == DataType::Boolean => {
                if nested {
                    state.buf.push('(');
                }
                self.write_scalar(state, expr, false)?;
                state.buf.push_str(" = 1");
                if nested {
                    state.buf.push(')');
                }
            }
            Expr::Binary(binary) if binary.op.is_logical() => {
                if nested {
                    state.buf.push('(');
                }
                let op = if binary.op == BinaryOperator::And { "AND" } else { "OR" };
                self.write_predicate(state, &binary.left, true)?;
                write!(state.buf, " {op} ")?;
                self.write_predicate(state, &binary.right, true)?;
                if nested {
                    state.buf.push(')');
                }
            }
            Expr::Unary(unary) if unary.op == UnaryOperator::Not => {
                state.buf.push_str("NOT ");
                self.write_predicate(state, &unary.expr, true)?;
            }
            other => self.write_scalar(state, other, nested)?,
        }
        Ok(())
    }

    /// Write a scalar expression. Nested binary expressions are wrapped in
    /// parentheses.
    fn write_scalar(&self, state: &mut FormatState, expr: &Expr, nested: bool) -> Result<()> {
        match expr {
            Expr::Constant(constant) => write_constant(state, &constant.value)?,
            Expr::Variable(variable) => write_constant(state, &variable.value)?,
            // Columns of an existence sub-query's table are unqualified.
            Expr::Column(column) if column.alias.is_empty() => {
                state.buf.push_str(&self.ident(&column.name));
            }
            Expr::Column(column) => {
                write!(
                    state.buf,
                    "{}.{}",
                    self.ident(&column.alias),
                    self.ident(&column.name)
                )?;
            }
            Expr::Member(member) => match (&self.bare, member.target.as_ref()) {
                (Some(bare), Expr::Parameter(param)) if param.id == bare.id => {
                    let info = bare.table.member(&member.member)?;
                    state.buf.push_str(&self.ident(&info.name));
                }
                _ => return Err(unsupported(expr, "in query text")),
            },
            Expr::Unary(unary) => {
                match unary.op {
                    UnaryOperator::Not => state.buf.push_str("NOT "),
                    UnaryOperator::Negate => state.buf.push('-'),
                }
                self.write_scalar(state, &unary.expr, true)?;
            }
            Expr::Binary(binary) => {
                // MOD is written as a function call.
                let wrap = nested && binary.op != BinaryOperator::Mod;
                if wrap {
                    state.buf.push('(');
                }
                self.write_binary(state, binary)?;
                if wrap {
                    state.buf.push(')');
                }
            }
            Expr::FunctionCall(call) => {
                write!(state.buf, "{}(", call.function)?;
                let args = call.instance.iter().map(|b| &**b).chain(call.args.iter());
                for (idx, arg) in args.enumerate() {
                    if idx > 0 {
                        state.buf.push_str(", ");
                    }
                    self.write_scalar(state, arg, false)?;
                }
                state.buf.push(')');
            }
            Expr::SubQuery(subquery) => {
                write!(state.buf, "{} ({}", subquery.call.function, subquery.sql)?;
                for (idx, predicate) in subquery.call.args.iter().enumerate() {
                    state.buf.push_str(if idx == 0 { " WHERE " } else { " AND " });
                    self.write_predicate(state, predicate, subquery.call.args.len() > 1)?;
                }
                state.buf.push(')');
            }
            other => return Err(unsupported(other, "in query text")),
        }
        Ok(())
    }

    fn write_binary(&self, state: &mut FormatState, binary: &BinaryExpr) -> Result<()> {
        if matches!(binary.op, BinaryOperator::Eq | BinaryOperator::NotEq) {
            let operand = match (is_null_constant(&binary.left), is_null_constant(&binary.right)) {
                (_, true) => Some(&binary.left),
                (true, false) => Some(&binary.right),
                (false, false) => None,
            };
            if let Some(operand) = operand {
                self.write_scalar(state, operand, true)?;
                if binary.op == BinaryOperator::Eq {
                    state.buf.push_str(" IS NULL");
                } else {
                    state.buf.push_str(" IS NOT NULL");
                }
                return Ok(());
            }
        }

        if binary.op == BinaryOperator::Mod {
            state.buf.push_str("MOD(");
            self.write_scalar(state, &binary.left, false)?;
            state.buf.push_str(", ");
            self.write_scalar(state, &binary.right, false)?;
            state.buf.push(')');
            return Ok(());
        }

        let op = match binary.op {
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::Add if is_text(&binary.left) || is_text(&binary.right) => "||",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "MOD",
        };

        self.write_scalar(state, &binary.left, true)?;
        write!(state.buf, " {op} ")?;
        self.write_scalar(state, &binary.right, true)?;

        Ok(())
    }
}

#[derive(Debug)]
struct FormatState {
    buf: String,
    depth: usize,
}

impl FormatState {
    fn newline(&mut self, indentation: Indentation, width: usize) {
        self.buf.push('\n');
        match indentation {
            Indentation::Same => (),
            Indentation::Inner => self.depth += 1,
            Indentation::Outer => self.depth = self.depth.saturating_sub(1),
        }
        for _ in 0..(self.depth * width) {
            self.buf.push(' ');
        }
    }
}

fn write_constant(state: &mut FormatState, value: &Value) -> Result<()> {
    match value {
        Value::Null => state.buf.push_str("NULL"),
        Value::Boolean(v) => state.buf.push(if *v { '1' } else { '0' }),
        Value::Int32(v) => write!(state.buf, "{v}")?,
        Value::Int64(v) => write!(state.buf, "{v}")?,
        Value::Float64(v) => write!(state.buf, "{v}")?,
        Value::Char(v) => write_quoted(state, &v.to_string()),
        Value::Utf8(v) => write_quoted(state, v),
        Value::Record(_) | Value::List(_) => {
            return Err(DbError::unsupported(format!(
                "The constant '{value}' is not supported in query text"
            )));
        }
    }
    Ok(())
}

fn write_wrapped(state: &mut FormatState, nested: bool, s: &str) {
    if nested {
        state.buf.push('(');
        state.buf.push_str(s);
        state.buf.push(')');
    } else {
        state.buf.push_str(s);
    }
}

fn write_quoted(state: &mut FormatState, s: &str) {
    state.buf.push('\'');
    state.buf.push_str(&s.replace('\'', "''"));
    state.buf.push('\'');
}

fn is_null_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Constant(c) if c.value.is_null())
}

fn is_text(expr: &Expr) -> bool {
    expr.static_type().is_some_and(|t| t.is_text())
}

fn unsupported(expr: &Expr, context: &str) -> DbError {
    DbError::unsupported(format!(
        "The {} expression is not supported {context}",
        expr.kind_name()
    ))
    .with_field("expression", expr)
}
