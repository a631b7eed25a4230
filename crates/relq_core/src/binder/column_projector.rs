use hashbrown::{HashMap, HashSet};
use relq_error::Result;

use crate::evaluator::nominate::Nomination;
use crate::expr::Expr;
use crate::expr::sql::{ColumnDeclaration, ColumnExpr};
use crate::types::DataType;

/// Output of projecting an expression through a new select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumns {
    /// The rewritten projector, referencing columns of the new select.
    pub projector: Expr,
    /// Columns of the new select, ordinal `i` at index `i`.
    pub columns: Vec<ColumnDeclaration>,
}

/// Rewrites `expr` so every column it needs from the `existing` aliases is an
/// output column of a new select at `new_alias`.
///
/// Columns are nominated whole. Function calls and sub-queries are always
/// nominated as a single unit and become synthesized `c<n>` columns, anything
/// else is left in the projector for client side evaluation. Columns at an
/// alias outside of `existing` are outer scope references and left as is.
///
/// Inside a nested projection only columns are projected. Its calls and
/// sub-queries belong to its own select, and only the correlated columns
/// they read from `existing` move to the new select.
pub fn project_columns(expr: Expr, new_alias: &str, existing: &[&str]) -> Result<ProjectedColumns> {
    let nomination = Nomination::compute_scoped(
        &expr,
        |e| matches!(e, Expr::Column(_)),
        |e| matches!(e, Expr::FunctionCall(_) | Expr::SubQuery(_)),
        |e| matches!(e, Expr::Projection(_)),
    )?;

    let mut projector = ColumnProjector {
        new_alias,
        existing,
        columns: Vec::new(),
        names: HashSet::new(),
        map: HashMap::new(),
        next_column: 0,
    };

    let mut expr = expr;
    nomination.rewrite(&mut expr, &mut |candidate| {
        projector.project(candidate);
        Ok(())
    })?;

    Ok(ProjectedColumns {
        projector: expr,
        columns: projector.columns,
    })
}

#[derive(Debug)]
struct ColumnProjector<'a> {
    new_alias: &'a str,
    existing: &'a [&'a str],
    columns: Vec<ColumnDeclaration>,
    names: HashSet<String>,
    /// Original column -> column in the new select.
    map: HashMap<ColumnExpr, ColumnExpr>,
    next_column: usize,
}

impl ColumnProjector<'_> {
    fn project(&mut self, candidate: &mut Expr) {
        match candidate {
            Expr::Column(column) => {
                if let Some(mapped) = self.map.get(&*column) {
                    *candidate = Expr::Column(mapped.clone());
                    return;
                }
                if !self.existing.contains(&column.alias.as_str()) {
                    // Outer scope reference.
                    return;
                }

                let column = column.clone();
                let name = self.unique_name(&column.name);
                let mapped =
                    self.push_column(name, column.datatype.clone(), Expr::Column(column.clone()));
                self.map.insert(column, mapped.clone());

                *candidate = Expr::Column(mapped);
            }
            other => {
                let base = format!("c{}", self.next_column);
                self.next_column += 1;
                let name = self.unique_name(&base);

                let datatype = other.static_type().unwrap_or(DataType::Null);
                let mapped = self.push_column(name, datatype, other.take());

                *other = Expr::Column(mapped);
            }
        }
    }

    fn push_column(&mut self, name: String, datatype: DataType, expr: Expr) -> ColumnExpr {
        let ordinal = self.columns.len();
        self.names.insert(name.clone());
        self.columns.push(ColumnDeclaration {
            name: name.clone(),
            expr,
        });

        ColumnExpr {
            alias: self.new_alias.to_string(),
            name,
            ordinal,
            datatype,
        }
    }

    fn unique_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        let mut suffix = 1;
        while self.names.contains(&name) {
            name = format!("{base}{suffix}");
            suffix += 1;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::source::Method;
    use crate::expr::sql::{
        FunctionCallExpr,
        ProjectionExpr,
        ResultShape,
        SelectExpr,
        SqlFunction,
        TableExpr,
    };
    use crate::expr::{add, eq, lit, record};

    fn col(alias: &str, name: &str, ordinal: usize) -> Expr {
        Expr::Column(ColumnExpr {
            alias: alias.to_string(),
            name: name.to_string(),
            ordinal,
            datatype: DataType::Utf8,
        })
    }

    #[test]
    fn columns_moved_to_new_alias() {
        let expr = record(
            DataType::Null,
            [("a", col("t1", "Name", 1)), ("b", col("t1", "Id", 0))],
        );
        let got = project_columns(expr, "t2", &["t1"]).unwrap();

        assert_eq!(
            record(
                DataType::Null,
                [("a", col("t2", "Name", 0)), ("b", col("t2", "Id", 1))]
            ),
            got.projector
        );
        assert_eq!(
            vec![
                ColumnDeclaration {
                    name: "Name".to_string(),
                    expr: col("t1", "Name", 1),
                },
                ColumnDeclaration {
                    name: "Id".to_string(),
                    expr: col("t1", "Id", 0),
                },
            ],
            got.columns
        );
    }

    #[test]
    fn repeated_column_projected_once() {
        let expr = add(col("t1", "Name", 0), col("t1", "Name", 0));
        let got = project_columns(expr, "t2", &["t1"]).unwrap();

        assert_eq!(add(col("t2", "Name", 0), col("t2", "Name", 0)), got.projector);
        assert_eq!(1, got.columns.len());
    }

    #[test]
    fn colliding_names_suffixed() {
        let expr = record(
            DataType::Null,
            [("a", col("t1", "Name", 0)), ("b", col("t3", "Name", 0))],
        );
        let got = project_columns(expr, "t4", &["t1", "t3"]).unwrap();

        let names: Vec<_> = got.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Name", "Name1"], names);
    }

    #[test]
    fn outer_scope_column_untouched() {
        let expr = add(col("t0", "Id", 0), lit(1));
        let got = project_columns(expr.clone(), "t2", &["t1"]).unwrap();

        assert_eq!(expr, got.projector);
        assert!(got.columns.is_empty());
    }

    #[test]
    fn function_call_synthesized() {
        let call = Expr::FunctionCall(FunctionCallExpr {
            method: Method::CharAt,
            function: SqlFunction::Substr,
            instance: Some(Box::new(col("t1", "Name", 0))),
            args: vec![lit(1), lit(1)],
            datatype: DataType::Char,
        });
        let got = project_columns(call.clone(), "t2", &["t1"]).unwrap();

        assert_eq!(
            Expr::Column(ColumnExpr {
                alias: "t2".to_string(),
                name: "c0".to_string(),
                ordinal: 0,
                datatype: DataType::Char,
            }),
            got.projector
        );
        assert_eq!(
            vec![ColumnDeclaration {
                name: "c0".to_string(),
                expr: call,
            }],
            got.columns
        );
    }

    #[test]
    fn constants_stay_in_projector() {
        let got = project_columns(lit(5), "t1", &["t0"]).unwrap();
        assert_eq!(lit(5), got.projector);
        assert!(got.columns.is_empty());
    }

    #[test]
    fn nested_projection_keeps_its_calls() {
        let substr = Expr::FunctionCall(FunctionCallExpr {
            method: Method::CharAt,
            function: SqlFunction::Substr,
            instance: Some(Box::new(col("t3", "Title", 1))),
            args: vec![lit(1), lit(1)],
            datatype: DataType::Char,
        });
        let nested = |outer: Expr| {
            Expr::Projection(ProjectionExpr {
                source: Box::new(SelectExpr {
                    alias: "t4".to_string(),
                    columns: vec![ColumnDeclaration {
                        name: "c0".to_string(),
                        expr: substr.clone(),
                    }],
                    from: Box::new(Expr::Table(TableExpr {
                        name: "Groups".to_string(),
                        alias: "t3".to_string(),
                        entity: "Group".to_string(),
                    })),
                    filter: Some(Box::new(eq(col("t3", "Id", 0), outer))),
                }),
                projector: Box::new(col("t4", "c0", 0)),
                shape: ResultShape::List,
            })
        };

        let expr = record(
            DataType::Null,
            [
                ("Id", col("t1", "Id", 0)),
                ("Initials", nested(col("t1", "GroupId", 2))),
            ],
        );
        let got = project_columns(expr, "t5", &["t1"]).unwrap();

        assert_eq!(
            record(
                DataType::Null,
                [
                    ("Id", col("t5", "Id", 0)),
                    ("Initials", nested(col("t5", "GroupId", 1))),
                ]
            ),
            got.projector
        );
        let names: Vec<_> = got.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Id", "GroupId"], names);
    }
}
