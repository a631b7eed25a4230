//! Binding of composed query operations into a SQL tree.

pub mod alias;
pub mod column_projector;

use alias::AliasGenerator;
use column_projector::{ProjectedColumns, project_columns};
use hashbrown::HashMap;
use relq_error::{DbError, DbErrorKind, Result};
use tracing::trace;

use crate::catalog::EntityRegistry;
use crate::config::ProviderConfig;
use crate::evaluator::interpret::apply_binary;
use crate::expr::source::{
    BinaryOperator,
    CallExpr,
    ConstantExpr,
    LambdaExpr,
    MemberExpr,
    Method,
    ParamId,
    ParameterExpr,
};
use crate::expr::sql::{
    ColumnDeclaration,
    ColumnExpr,
    FunctionCallExpr,
    JoinExpr,
    JoinKind,
    ProjectionExpr,
    ResultShape,
    SelectExpr,
    SqlFunction,
    SubQueryExpr,
    TableExpr,
};
use crate::expr::{self, Expr};
use crate::format::QueryFormatter;
use crate::types::{DataType, Value};
use crate::util::similar::SimilarName;

/// Binds a composed operation tree into a projection.
///
/// A binder owns the alias counter and the parameter substitution map for
/// exactly one translation. `bind` consumes the binder.
#[derive(Debug)]
pub struct QueryBinder<'a> {
    registry: &'a EntityRegistry,
    config: &'a ProviderConfig,
    aliases: AliasGenerator,
    /// Lambda parameter -> projector it's currently bound to.
    map: HashMap<ParamId, Expr>,
}

impl<'a> QueryBinder<'a> {
    pub fn new(registry: &'a EntityRegistry, config: &'a ProviderConfig) -> Self {
        QueryBinder {
            registry,
            config,
            aliases: AliasGenerator::new(),
            map: HashMap::new(),
        }
    }

    pub fn bind(mut self, expr: Expr) -> Result<ProjectionExpr> {
        match self.visit(expr)? {
            Expr::Projection(projection) => Ok(projection),
            other => Err(DbError::unsupported(format!(
                "Expected a query, got {} expression",
                other.kind_name()
            ))
            .with_field("expression", other)),
        }
    }

    fn visit(&mut self, expr: Expr) -> Result<Expr> {
        match expr {
            Expr::Call(call) => self.bind_call(call),
            Expr::Collection(collection) => self.bind_collection(&collection.entity),
            Expr::Parameter(param) => match self.map.get(&param.id) {
                Some(projector) => Ok(projector.clone()),
                // Unbound parameters are only valid inside existence
                // predicates, checked when formatting.
                None => Ok(Expr::Parameter(param)),
            },
            Expr::Member(member) => self.bind_member(member),
            Expr::Variable(variable) => Ok(expr::lit(variable.value)),
            Expr::Lambda(_) => Err(DbError::unsupported(
                "Lambdas are only supported as arguments to query methods",
            )),
            Expr::OuterRow(_) => Err(DbError::internal(
                "Outer row references cannot appear before binding",
            )),
            expr if expr.is_sql_node() => Ok(expr),
            other => other.map_children(&mut |child| self.visit(child)),
        }
    }

    fn bind_call(&mut self, call: CallExpr) -> Result<Expr> {
        match call.method {
            Method::Select => {
                let [source, selector] = take_args(call)?;
                self.bind_select(source, selector)
            }
            Method::Where => {
                let [source, predicate] = take_args(call)?;
                self.bind_where(source, predicate)
            }
            Method::Join => {
                let [outer, inner, outer_key, inner_key, result_selector] = take_args(call)?;
                self.bind_join(outer, inner, outer_key, inner_key, result_selector)
            }
            Method::ToList => {
                let [source] = take_args(call)?;
                let mut projection = self.bind_source(source)?;
                projection.shape = ResultShape::List;
                Ok(Expr::Projection(projection))
            }
            Method::CharAt => self.bind_char_at(call),
            Method::Exists | Method::NotExists => self.bind_exists(call),
            Method::Named(name) => Err(DbError::unsupported(format!(
                "The method '{name}' is not supported"
            ))),
        }
    }

    /// Bind an expression that must produce a projection.
    fn bind_source(&mut self, source: Expr) -> Result<ProjectionExpr> {
        match self.visit(source)? {
            Expr::Projection(projection) => Ok(projection),
            other => Err(DbError::unsupported(format!(
                "Expected a query source, got {} expression",
                other.kind_name()
            ))
            .with_field("expression", other)),
        }
    }

    fn bind_collection(&mut self, entity: &str) -> Result<Expr> {
        let info = self.registry.get(entity)?;

        let table_alias = self.aliases.next_alias();
        let select_alias = self.aliases.next_alias();

        let mut columns = Vec::with_capacity(info.members.len());
        let mut bindings = Vec::with_capacity(info.members.len());

        for (ordinal, member) in info.members.iter().enumerate() {
            columns.push(ColumnDeclaration {
                name: member.name.clone(),
                expr: Expr::Column(ColumnExpr {
                    alias: table_alias.clone(),
                    name: member.name.clone(),
                    ordinal,
                    datatype: member.datatype.clone(),
                }),
            });
            bindings.push((
                member.name.clone(),
                Expr::Column(ColumnExpr {
                    alias: select_alias.clone(),
                    name: member.name.clone(),
                    ordinal,
                    datatype: member.datatype.clone(),
                }),
            ));
        }

        let table = Expr::Table(TableExpr {
            name: info.table_name.clone(),
            alias: table_alias,
            entity: info.entity.clone(),
        });

        Ok(Expr::Projection(ProjectionExpr {
            source: Box::new(SelectExpr {
                alias: select_alias,
                columns,
                from: Box::new(table),
                filter: None,
            }),
            projector: Box::new(expr::record(DataType::entity(&info.entity), bindings)),
            shape: ResultShape::Queryable,
        }))
    }

    fn bind_where(&mut self, source: Expr, predicate: Expr) -> Result<Expr> {
        let projection = self.bind_source(source)?;
        let [(param, body)] = take_lambda_params(predicate)?;
        self.map.insert(param.id, (*projection.projector).clone());
        let filter = self.visit(body)?;

        let alias = self.aliases.next_alias();
        let existing = projection.source.alias.clone();
        let projected = project_columns(*projection.projector, &alias, &[existing.as_str()])?;

        Ok(new_projection(
            alias,
            projected,
            Expr::Select(*projection.source),
            Some(filter),
        ))
    }

    fn bind_select(&mut self, source: Expr, selector: Expr) -> Result<Expr> {
        let projection = self.bind_source(source)?;
        let [(param, body)] = take_lambda_params(selector)?;
        self.map.insert(param.id, (*projection.projector).clone());
        let body = self.visit(body)?;

        let alias = self.aliases.next_alias();
        let existing = projection.source.alias.clone();
        let projected = project_columns(body, &alias, &[existing.as_str()])?;

        Ok(new_projection(
            alias,
            projected,
            Expr::Select(*projection.source),
            None,
        ))
    }

    fn bind_join(
        &mut self,
        outer: Expr,
        inner: Expr,
        outer_key: Expr,
        inner_key: Expr,
        result_selector: Expr,
    ) -> Result<Expr> {
        let outer = self.bind_source(outer)?;
        let inner = self.bind_source(inner)?;

        let [(outer_param, outer_body)] = take_lambda_params(outer_key)?;
        self.map.insert(outer_param.id, (*outer.projector).clone());
        let outer_key = self.visit(outer_body)?;

        let [(inner_param, inner_body)] = take_lambda_params(inner_key)?;
        self.map.insert(inner_param.id, (*inner.projector).clone());
        let inner_key = self.visit(inner_body)?;

        let lambda = take_lambda(result_selector)?;
        let [outer_param, inner_param] = <[ParameterExpr; 2]>::try_from(lambda.params)
            .map_err(|params| arity_error("join result selector", 2, params.len()))?;
        self.map.insert(outer_param.id, *outer.projector);
        self.map.insert(inner_param.id, *inner.projector);
        let result = self.visit(*lambda.body)?;

        let outer_alias = outer.source.alias.clone();
        let inner_alias = inner.source.alias.clone();
        let join = Expr::Join(JoinExpr {
            kind: JoinKind::Inner,
            left: Box::new(Expr::Select(*outer.source)),
            right: Box::new(Expr::Select(*inner.source)),
            condition: Some(Box::new(expr::eq(outer_key, inner_key))),
        });

        let alias = self.aliases.next_alias();
        let existing = [outer_alias.as_str(), inner_alias.as_str()];
        let projected = project_columns(result, &alias, &existing)?;

        Ok(new_projection(alias, projected, join, None))
    }

    /// Lower single character indexing to `SUBSTR(s, i + 1, 1)`.
    fn bind_char_at(&mut self, call: CallExpr) -> Result<Expr> {
        let instance = call
            .instance
            .ok_or_else(|| DbError::unsupported("Character index requires a string instance"))?;
        let instance = self.visit(*instance)?;
        let [index] = <[Expr; 1]>::try_from(call.args)
            .map_err(|args| arity_error("character index", 1, args.len()))?;

        let start = match self.visit(index)? {
            Expr::Constant(constant) => {
                let value = apply_binary(BinaryOperator::Add, constant.value, Value::Int32(1))?;
                Expr::Constant(ConstantExpr {
                    datatype: value.datatype(),
                    value,
                })
            }
            other => expr::add(other, expr::lit(1)),
        };

        Ok(Expr::FunctionCall(FunctionCallExpr {
            method: Method::CharAt,
            function: SqlFunction::Substr,
            instance: Some(Box::new(instance)),
            args: vec![start, expr::lit(1)],
            datatype: DataType::Char,
        }))
    }

    /// Bind `Exists`/`NotExists` into a sub-query over the unaliased table.
    ///
    /// The predicate's own parameter reads bare columns of that table.
    /// References to enclosing parameters become qualified columns, which
    /// stay visible to later column projection and correlation.
    fn bind_exists(&mut self, call: CallExpr) -> Result<Expr> {
        let function = match call.method {
            Method::Exists => SqlFunction::Exists,
            _ => SqlFunction::NotExists,
        };

        let entity = match call.instance.map(|instance| *instance) {
            Some(Expr::Collection(collection)) => collection.entity,
            Some(other) => {
                return Err(DbError::unsupported(format!(
                    "{function} is only supported on a table collection, got {} expression",
                    other.kind_name()
                )));
            }
            None => {
                return Err(DbError::unsupported(format!(
                    "{function} requires a collection instance"
                )));
            }
        };

        let [predicate] = <[Expr; 1]>::try_from(call.args)
            .map_err(|args| arity_error("existence predicate", 1, args.len()))?;
        let [(param, body)] = take_lambda_params(predicate)?;

        let info = self.registry.get(&entity)?;
        let bare = info.members.iter().enumerate().map(|(ordinal, member)| {
            let column = Expr::Column(ColumnExpr {
                alias: String::new(),
                name: member.name.clone(),
                ordinal,
                datatype: member.datatype.clone(),
            });
            (member.name.clone(), column)
        });
        let bare = expr::record(info.record_type(), bare);
        let sql = format!(
            "SELECT * FROM {}",
            QueryFormatter::new(self.config).ident(&info.table_name)
        );

        self.map.insert(param.id, bare);
        let body = self.visit(body);
        self.map.remove(&param.id);
        let body = body?;
        trace!(%sql, %body, "bound existence sub-query");

        Ok(Expr::SubQuery(SubQueryExpr {
            call: FunctionCallExpr {
                method: call.method,
                function,
                instance: None,
                args: vec![body],
                datatype: DataType::Boolean,
            },
            sql,
        }))
    }

    fn bind_member(&mut self, member: MemberExpr) -> Result<Expr> {
        match self.visit(*member.target)? {
            // Splice through the constructor rather than accessing a member
            // of it.
            Expr::New(new) => {
                let names: Vec<_> = new.members.iter().map(|(name, _)| name.clone()).collect();
                match new
                    .members
                    .into_iter()
                    .find(|(name, _)| *name == member.member)
                {
                    Some((_, expr)) => Ok(expr),
                    None => {
                        let mut err = DbError::new(format!(
                            "Missing member '{}' on {}",
                            member.member, new.datatype
                        ))
                        .with_kind(DbErrorKind::MissingMapping);
                        if let Some(similar) =
                            SimilarName::find(names.iter().map(|n| n.as_str()), &member.member)
                        {
                            err = err.with_field("did you mean", similar);
                        }
                        Err(err)
                    }
                }
            }
            target => Ok(expr::member(target, member.member)),
        }
    }
}

fn new_projection(
    alias: String,
    projected: ProjectedColumns,
    from: Expr,
    filter: Option<Expr>,
) -> Expr {
    Expr::Projection(ProjectionExpr {
        source: Box::new(SelectExpr {
            alias,
            columns: projected.columns,
            from: Box::new(from),
            filter: filter.map(Box::new),
        }),
        projector: Box::new(projected.projector),
        shape: ResultShape::Queryable,
    })
}

fn arity_error(what: &str, expected: usize, got: usize) -> DbError {
    DbError::unsupported(format!(
        "Expected {expected} arguments for {what}, got {got}"
    ))
}

fn take_args<const N: usize>(call: CallExpr) -> Result<[Expr; N]> {
    let method = call.method;
    <[Expr; N]>::try_from(call.args)
        .map_err(|args| arity_error(&format!("'{method}'"), N, args.len()))
}

fn take_lambda(expr: Expr) -> Result<LambdaExpr> {
    match expr {
        Expr::Lambda(lambda) => Ok(lambda),
        other => Err(DbError::unsupported(format!(
            "Expected a lambda, got {} expression",
            other.kind_name()
        ))),
    }
}

/// Take a lambda's parameters paired with its body.
///
/// Only single parameter lambdas are destructured this way, the body is
/// attached to the parameter.
pub(crate) fn take_lambda_params(expr: Expr) -> Result<[(ParameterExpr, Expr); 1]> {
    let lambda = take_lambda(expr)?;
    let [param] = <[ParameterExpr; 1]>::try_from(lambda.params)
        .map_err(|params| arity_error("lambda", 1, params.len()))?;
    Ok([(param, *lambda.body)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableInfo;
    use crate::expr::{
        char_at,
        collection,
        exists,
        filter,
        join,
        lambda,
        lit,
        not_eq,
        param,
        select,
    };

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .register(
                TableInfo::new("Student", "Students")
                    .with_member("Id", DataType::Int32)
                    .with_member("Name", DataType::Utf8)
                    .with_member("GroupId", DataType::Int32),
            )
            .unwrap();
        registry
            .register(
                TableInfo::new("Group", "Groups")
                    .with_member("Id", DataType::Int32)
                    .with_member("Title", DataType::Utf8),
            )
            .unwrap();
        registry
    }

    fn bind(expr: Expr) -> Result<ProjectionExpr> {
        let registry = registry();
        let config = ProviderConfig::default();
        QueryBinder::new(&registry, &config).bind(expr)
    }

    fn col(alias: &str, name: &str, ordinal: usize, datatype: DataType) -> Expr {
        Expr::Column(ColumnExpr {
            alias: alias.to_string(),
            name: name.to_string(),
            ordinal,
            datatype,
        })
    }

    fn student() -> ParameterExpr {
        param("s", DataType::entity("Student"))
    }

    /// Collect every alias in the tree.
    fn aliases(expr: &Expr) -> Vec<String> {
        let mut out = Vec::new();
        expr.walk(&mut |e| {
            match e {
                Expr::Table(t) => out.push(t.alias.clone()),
                Expr::Select(s) => out.push(s.alias.clone()),
                Expr::Projection(p) => out.push(p.source.alias.clone()),
                _ => (),
            }
            Ok(())
        })
        .unwrap();
        out
    }

    /// Check every projector column resolves to the declaration at its
    /// ordinal, and declaration names are unique per select.
    fn assert_columns_resolve(expr: &Expr) {
        expr.walk(&mut |e| {
            let Expr::Projection(projection) = e else {
                return Ok(());
            };
            let select = &projection.source;
            for (idx, column) in select.columns.iter().enumerate() {
                assert!(select.columns[..idx].iter().all(|o| o.name != column.name));
            }
            projection.projector.walk(&mut |p| {
                if let Expr::Column(c) = p {
                    if c.alias == select.alias {
                        assert_eq!(select.columns[c.ordinal].name, c.name);
                    }
                }
                Ok(())
            })
        })
        .unwrap();
    }

    #[test]
    fn table_projection() {
        let got = bind(collection("Student")).unwrap();

        assert_eq!("t1", got.source.alias);
        assert_eq!(
            Expr::Table(TableExpr {
                name: "Students".to_string(),
                alias: "t0".to_string(),
                entity: "Student".to_string(),
            }),
            *got.source.from
        );
        assert_eq!(
            vec![
                ColumnDeclaration {
                    name: "Id".to_string(),
                    expr: col("t0", "Id", 0, DataType::Int32),
                },
                ColumnDeclaration {
                    name: "Name".to_string(),
                    expr: col("t0", "Name", 1, DataType::Utf8),
                },
                ColumnDeclaration {
                    name: "GroupId".to_string(),
                    expr: col("t0", "GroupId", 2, DataType::Int32),
                },
            ],
            got.source.columns
        );
        assert_eq!(
            expr::record(
                DataType::entity("Student"),
                [
                    ("Id", col("t1", "Id", 0, DataType::Int32)),
                    ("Name", col("t1", "Name", 1, DataType::Utf8)),
                    ("GroupId", col("t1", "GroupId", 2, DataType::Int32)),
                ]
            ),
            *got.projector
        );
    }

    #[test]
    fn filter_then_select() {
        let s = student();
        let s2 = student();
        let expr = select(
            filter(
                collection("Student"),
                lambda([s.clone()], not_eq(s.member("Id"), lit(1))),
            ),
            lambda([s2.clone()], s2.member("Name")),
        );

        let got = bind(expr).unwrap();
        assert_eq!("t3", got.source.alias);
        assert_eq!(col("t3", "Name", 0, DataType::Utf8), *got.projector);
        assert_eq!(
            vec![ColumnDeclaration {
                name: "Name".to_string(),
                expr: col("t2", "Name", 1, DataType::Utf8),
            }],
            got.source.columns
        );

        let Expr::Select(inner) = got.source.from.as_ref() else {
            panic!("expected select, got {}", got.source.from);
        };
        assert_eq!("t2", inner.alias);
        assert_eq!(
            Some(Box::new(not_eq(col("t1", "Id", 0, DataType::Int32), lit(1)))),
            inner.filter
        );

        let proj = Expr::Projection(got);
        assert_eq!(vec!["t3", "t2", "t1", "t0"], aliases(&proj));
        assert_columns_resolve(&proj);
    }

    #[test]
    fn join_binds_both_sides() {
        let s = student();
        let g = param("g", DataType::entity("Group"));
        let rs = student();
        let rg = param("g", DataType::entity("Group"));
        let expr = join(
            collection("Student"),
            collection("Group"),
            lambda([s.clone()], s.member("GroupId")),
            lambda([g.clone()], g.member("Id")),
            lambda([rs.clone(), rg.clone()], rs.member("Name")),
        );

        let got = bind(expr).unwrap();
        assert_eq!("t4", got.source.alias);
        assert_eq!(
            vec![ColumnDeclaration {
                name: "Name".to_string(),
                expr: col("t1", "Name", 1, DataType::Utf8),
            }],
            got.source.columns
        );

        let Expr::Join(join) = got.source.from.as_ref() else {
            panic!("expected join, got {}", got.source.from);
        };
        assert_eq!(JoinKind::Inner, join.kind);
        assert_eq!(
            Some(Box::new(expr::eq(
                col("t1", "GroupId", 2, DataType::Int32),
                col("t3", "Id", 0, DataType::Int32)
            ))),
            join.condition
        );

        let proj = Expr::Projection(got);
        let mut all = aliases(&proj);
        all.sort();
        all.dedup();
        assert_eq!(5, all.len());
    }

    #[test]
    fn char_at_lowers_to_substr() {
        let s = student();
        let expr = select(
            collection("Student"),
            lambda([s.clone()], char_at(s.member("Name"), lit(0))),
        );

        let got = bind(expr).unwrap();
        assert_eq!(
            vec![ColumnDeclaration {
                name: "c0".to_string(),
                expr: Expr::FunctionCall(FunctionCallExpr {
                    method: Method::CharAt,
                    function: SqlFunction::Substr,
                    instance: Some(Box::new(col("t1", "Name", 1, DataType::Utf8))),
                    args: vec![lit(1), lit(1)],
                    datatype: DataType::Char,
                }),
            }],
            got.source.columns
        );
        assert_eq!(col("t2", "c0", 0, DataType::Char), *got.projector);
    }

    #[test]
    fn correlated_exists() {
        let s = student();
        let s1 = student();
        let expr = filter(
            collection("Student"),
            lambda(
                [s.clone()],
                exists(
                    collection("Student"),
                    lambda(
                        [s1.clone()],
                        expr::and(
                            expr::eq(s1.member("Id"), lit(215)),
                            expr::eq(s1.member("GroupId"), s.member("GroupId")),
                        ),
                    ),
                ),
            ),
        );

        let got = bind(expr).unwrap();
        let Some(filter) = &got.source.filter else {
            panic!("missing filter");
        };
        let Expr::SubQuery(subquery) = filter.as_ref() else {
            panic!("expected sub-query, got {filter}");
        };
        assert_eq!("SELECT * FROM students", subquery.sql);
        assert_eq!(Method::Exists, subquery.call.method);
        assert_eq!(
            vec![expr::and(
                expr::eq(col("", "Id", 0, DataType::Int32), lit(215)),
                expr::eq(
                    col("", "GroupId", 2, DataType::Int32),
                    col("t1", "GroupId", 2, DataType::Int32)
                ),
            )],
            subquery.call.args
        );

        let config = ProviderConfig::default();
        assert_eq!(
            "EXISTS (SELECT * FROM students WHERE (id = 215) AND (group_id = t1.group_id))",
            QueryFormatter::new(&config).format(filter).unwrap()
        );
    }

    #[test]
    fn unknown_member_on_entity() {
        let s = student();
        let expr = select(collection("Student"), lambda([s.clone()], s.member("Nmae")));
        let err = bind(expr).unwrap_err();
        assert_eq!(DbErrorKind::MissingMapping, err.kind());
        assert_eq!(Some("Name"), err.get_field("did you mean"));
    }

    #[test]
    fn unknown_method_unsupported() {
        let expr = expr::call(
            Method::Named("OrderBy".to_string()),
            None,
            vec![collection("Student")],
        );
        let err = bind(expr).unwrap_err();
        assert_eq!(DbErrorKind::Unsupported, err.kind());
        assert!(err.message().contains("OrderBy"));
    }

    #[test]
    fn unmapped_entity() {
        let err = bind(collection("Course")).unwrap_err();
        assert_eq!(DbErrorKind::MissingMapping, err.kind());
    }

    #[test]
    fn to_list_marks_shape() {
        let got = bind(expr::to_list(collection("Student"))).unwrap();
        assert_eq!(ResultShape::List, got.shape);
    }
}
