use std::sync::Arc;

use relq_error::{DbError, Result};

use super::{Materializer, RowAccessor};
use crate::evaluator::interpret::{apply_binary, apply_unary};
use crate::expr::Expr;
use crate::expr::source::{ConstantExpr, OuterRowExpr};
use crate::expr::sql::ProjectionExpr;
use crate::types::{RecordValue, Value};

/// Compiles the logical projector of a projection into a materializer.
#[derive(Debug)]
pub struct ProjectionBuilder<'a> {
    /// Alias of the select every row comes from.
    row_alias: &'a str,
}

impl<'a> ProjectionBuilder<'a> {
    pub fn build(projection: &'a ProjectionExpr) -> Result<Materializer> {
        let builder = ProjectionBuilder {
            row_alias: projection.alias(),
        };
        builder.build_expr(&projection.projector)
    }

    fn build_expr(&self, expr: &Expr) -> Result<Materializer> {
        let materializer: Materializer = match expr {
            Expr::Column(column) => {
                if column.alias != self.row_alias {
                    return Err(DbError::internal(format!(
                        "Column '{}.{}' does not belong to row alias '{}'",
                        column.alias, column.name, self.row_alias
                    )));
                }
                let ordinal = column.ordinal;
                let datatype = column.datatype.clone();
                Arc::new(move |row: &dyn RowAccessor| row.get_value(ordinal)?.cast_to(&datatype))
            }
            Expr::Constant(constant) => {
                let value = constant.value.clone();
                Arc::new(move |_: &dyn RowAccessor| Ok(value.clone()))
            }
            Expr::New(new) => {
                let members = new
                    .members
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), self.build_expr(expr)?)))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(move |row: &dyn RowAccessor| {
                    let mut record = RecordValue::new();
                    for (name, materialize) in &members {
                        record.push(name.clone(), materialize(row)?);
                    }
                    Ok(Value::Record(record))
                })
            }
            Expr::Member(member) => {
                let target = self.build_expr(&member.target)?;
                let name = member.member.clone();
                Arc::new(move |row: &dyn RowAccessor| match target(row)? {
                    Value::Record(mut record) => record.take(&name),
                    Value::Null => Ok(Value::Null),
                    other => Err(DbError::new(format!(
                        "Cannot access member '{name}' on {other}"
                    ))),
                })
            }
            Expr::Unary(unary) => {
                let op = unary.op;
                let inner = self.build_expr(&unary.expr)?;
                Arc::new(move |row: &dyn RowAccessor| apply_unary(op, inner(row)?))
            }
            Expr::Binary(binary) => {
                let op = binary.op;
                let left = self.build_expr(&binary.left)?;
                let right = self.build_expr(&binary.right)?;
                Arc::new(move |row: &dyn RowAccessor| apply_binary(op, left(row)?, right(row)?))
            }
            Expr::OuterRow(outer) => {
                let depth = outer.depth;
                let ordinal = outer.ordinal;
                let datatype = outer.datatype.clone();
                Arc::new(move |row: &dyn RowAccessor| {
                    row.outer_value(depth, ordinal)?.cast_to(&datatype)
                })
            }
            Expr::Projection(nested) => {
                let nested = Arc::new(self.correlate(nested)?);
                Arc::new(move |row: &dyn RowAccessor| row.execute_subquery(&nested))
            }
            other => {
                return Err(DbError::unsupported(format!(
                    "Cannot materialize {} expression",
                    other.kind_name()
                ))
                .with_field("expression", other));
            }
        };

        Ok(materializer)
    }

    /// Replace references to the current row inside a nested projection with
    /// outer row reads. Reads of rows further out move one level deeper.
    fn correlate(&self, nested: &ProjectionExpr) -> Result<ProjectionExpr> {
        let mut expr = Expr::Projection(nested.clone());
        replace_row_columns(&mut expr, self.row_alias)?;
        match expr {
            Expr::Projection(projection) => Ok(projection),
            other => Err(DbError::internal(format!(
                "Expected projection after correlation, got {}",
                other.kind_name()
            ))),
        }
    }
}

fn replace_row_columns(expr: &mut Expr, row_alias: &str) -> Result<()> {
    match expr {
        Expr::Column(column) => {
            if column.alias == row_alias {
                *expr = Expr::OuterRow(OuterRowExpr {
                    depth: 0,
                    ordinal: column.ordinal,
                    datatype: column.datatype.clone(),
                });
            }
            Ok(())
        }
        Expr::OuterRow(outer) => {
            outer.depth += 1;
            Ok(())
        }
        _ => expr.for_each_child_mut(&mut |child| replace_row_columns(child, row_alias)),
    }
}

/// Replace outer row references with values read through `row`, the row a
/// sub-query is executed for.
pub(crate) fn substitute_outer_row(expr: &mut Expr, row: &dyn RowAccessor) -> Result<()> {
    if let Expr::OuterRow(outer) = expr {
        let value = match outer.depth {
            0 => row.get_value(outer.ordinal)?,
            depth => row.outer_value(depth - 1, outer.ordinal)?,
        };
        let datatype = outer.datatype.clone();
        *expr = Expr::Constant(ConstantExpr {
            value: value.cast_to(&datatype)?,
            datatype,
        });
        return Ok(());
    }
    expr.for_each_child_mut(&mut |child| substitute_outer_row(child, row))
}
