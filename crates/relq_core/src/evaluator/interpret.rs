use std::cmp::Ordering;

use relq_error::{DbError, DbErrorKind, Result};

use crate::expr::Expr;
use crate::expr::source::{BinaryOperator, Method, UnaryOperator};
use crate::types::{RecordValue, Value};

/// Evaluate an expression that has no dependency on query parameters or rows.
pub fn evaluate_constant(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Constant(c) => Ok(c.value.clone()),
        Expr::Variable(v) => Ok(v.value.clone()),
        Expr::Member(m) => match evaluate_constant(&m.target)? {
            Value::Record(record) => record.get(&m.member).cloned().ok_or_else(|| {
                DbError::new(format!("Record is missing member '{}'", m.member))
                    .with_kind(DbErrorKind::MissingMapping)
            }),
            Value::Null => Ok(Value::Null),
            other => Err(DbError::new(format!(
                "Cannot access member '{}' on {other}",
                m.member
            ))),
        },
        Expr::Unary(u) => apply_unary(u.op, evaluate_constant(&u.expr)?),
        Expr::Binary(b) => {
            let left = evaluate_constant(&b.left)?;
            let right = evaluate_constant(&b.right)?;
            apply_binary(b.op, left, right)
        }
        Expr::New(n) => {
            let mut record = RecordValue::new();
            for (name, expr) in &n.members {
                record.push(name.clone(), evaluate_constant(expr)?);
            }
            Ok(Value::Record(record))
        }
        Expr::Call(c) if c.method == Method::CharAt => {
            let (Some(instance), [index]) = (&c.instance, c.args.as_slice()) else {
                return Err(DbError::internal("Character index expects one argument"));
            };
            char_at(evaluate_constant(instance)?, evaluate_constant(index)?)
        }
        other => Err(DbError::unsupported(format!(
            "Cannot evaluate {} outside of a query",
            other.kind_name()
        ))
        .with_field("expression", other)),
    }
}

fn char_at(string: Value, index: Value) -> Result<Value> {
    if string.is_null() || index.is_null() {
        return Ok(Value::Null);
    }
    let idx = index.try_as_i64()?;
    let s = string.try_as_str()?;
    usize::try_from(idx)
        .ok()
        .and_then(|idx| s.chars().nth(idx))
        .map(Value::Char)
        .ok_or_else(|| {
            DbError::new(format!("Index {idx} out of range for '{s}'"))
                .with_kind(DbErrorKind::OutOfRange)
        })
}

pub fn apply_unary(op: UnaryOperator, value: Value) -> Result<Value> {
    Ok(match (op, value) {
        (_, Value::Null) => Value::Null,
        (UnaryOperator::Not, Value::Boolean(v)) => Value::Boolean(!v),
        (UnaryOperator::Negate, Value::Int32(v)) => Value::Int32(
            v.checked_neg()
                .ok_or_else(|| DbError::new("Integer overflow on negation"))?,
        ),
        (UnaryOperator::Negate, Value::Int64(v)) => Value::Int64(
            v.checked_neg()
                .ok_or_else(|| DbError::new("Integer overflow on negation"))?,
        ),
        (UnaryOperator::Negate, Value::Float64(v)) => Value::Float64(-v),
        (op, other) => {
            return Err(DbError::unsupported(format!(
                "Cannot apply unary operator '{op}' to {other}"
            )));
        }
    })
}

pub fn apply_binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value> {
    if op.is_logical() {
        let l = left.try_as_bool()?;
        let r = right.try_as_bool()?;
        return Ok(Value::Boolean(match op {
            BinaryOperator::And => l && r,
            _ => l || r,
        }));
    }

    if left.is_null() || right.is_null() {
        return Ok(match op {
            BinaryOperator::Eq => Value::Boolean(left.is_null() && right.is_null()),
            BinaryOperator::NotEq => Value::Boolean(!(left.is_null() && right.is_null())),
            _ => Value::Null,
        });
    }

    if op.is_comparison() {
        let ord = compare(&left, &right)?;
        return Ok(Value::Boolean(match op {
            BinaryOperator::Eq => ord == Ordering::Equal,
            BinaryOperator::NotEq => ord != Ordering::Equal,
            BinaryOperator::Lt => ord == Ordering::Less,
            BinaryOperator::LtEq => ord != Ordering::Greater,
            BinaryOperator::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        }));
    }

    if op == BinaryOperator::Add && (is_text(&left) || is_text(&right)) {
        return Ok(Value::Utf8(format!("{left}{right}")));
    }

    arithmetic(op, left, right)
}

fn is_text(value: &Value) -> bool {
    matches!(value, Value::Utf8(_) | Value::Char(_))
}

fn compare(left: &Value, right: &Value) -> Result<Ordering> {
    match (left, right) {
        (Value::Boolean(l), Value::Boolean(r)) => Ok(l.cmp(r)),
        (Value::Float64(_), _) | (_, Value::Float64(_)) => {
            let l = left.try_as_f64()?;
            let r = right.try_as_f64()?;
            l.partial_cmp(&r)
                .ok_or_else(|| DbError::new("Cannot compare NaN values"))
        }
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            Ok(left.try_as_i64()?.cmp(&right.try_as_i64()?))
        }
        (l, r) if is_text(l) && is_text(r) => Ok(l.to_string().cmp(&r.to_string())),
        (l, r) => Err(DbError::unsupported(format!("Cannot compare {l} with {r}"))),
    }
}

fn arithmetic(op: BinaryOperator, left: Value, right: Value) -> Result<Value> {
    let overflow = || DbError::new(format!("Integer overflow evaluating '{op}'"));
    let div_zero = || DbError::new("Division by zero");

    Ok(match (left, right) {
        (Value::Int32(l), Value::Int32(r)) => Value::Int32(match op {
            BinaryOperator::Add => l.checked_add(r).ok_or_else(overflow)?,
            BinaryOperator::Sub => l.checked_sub(r).ok_or_else(overflow)?,
            BinaryOperator::Mul => l.checked_mul(r).ok_or_else(overflow)?,
            BinaryOperator::Div => l.checked_div(r).ok_or_else(div_zero)?,
            BinaryOperator::Mod => l.checked_rem(r).ok_or_else(div_zero)?,
            _ => return Err(DbError::internal(format!("Not an arithmetic operator: {op}"))),
        }),
        (l @ (Value::Float64(_) | Value::Int32(_) | Value::Int64(_)), r)
            if matches!(l, Value::Float64(_)) || matches!(r, Value::Float64(_)) =>
        {
            let l = l.try_as_f64()?;
            let r = r.try_as_f64()?;
            Value::Float64(match op {
                BinaryOperator::Add => l + r,
                BinaryOperator::Sub => l - r,
                BinaryOperator::Mul => l * r,
                BinaryOperator::Div => l / r,
                BinaryOperator::Mod => l % r,
                _ => return Err(DbError::internal(format!("Not an arithmetic operator: {op}"))),
            })
        }
        (l @ (Value::Int32(_) | Value::Int64(_)), r @ (Value::Int32(_) | Value::Int64(_))) => {
            let l = l.try_as_i64()?;
            let r = r.try_as_i64()?;
            Value::Int64(match op {
                BinaryOperator::Add => l.checked_add(r).ok_or_else(overflow)?,
                BinaryOperator::Sub => l.checked_sub(r).ok_or_else(overflow)?,
                BinaryOperator::Mul => l.checked_mul(r).ok_or_else(overflow)?,
                BinaryOperator::Div => l.checked_div(r).ok_or_else(div_zero)?,
                BinaryOperator::Mod => l.checked_rem(r).ok_or_else(div_zero)?,
                _ => return Err(DbError::internal(format!("Not an arithmetic operator: {op}"))),
            })
        }
        (l, r) => {
            return Err(DbError::unsupported(format!(
                "Cannot apply '{op}' to {l} and {r}"
            )));
        }
    })
}
