//! Data modification commands against the table of a single entity.

use relq_error::{DbError, Result};
use tracing::trace;

use crate::binder::take_lambda_params;
use crate::catalog::TableInfo;
use crate::config::ProviderConfig;
use crate::evaluator::PartialEvaluator;
use crate::expr::Expr;
use crate::format::QueryFormatter;
use crate::types::DataType;

/// Builds `DELETE` and `UPDATE` text for one table.
///
/// Predicates are single parameter lambdas over the entity, and members of
/// that parameter render as bare column names. Captured variables are folded
/// before formatting, same as for queries.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    table: &'a TableInfo,
    config: &'a ProviderConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(table: &'a TableInfo, config: &'a ProviderConfig) -> Self {
        CommandBuilder { table, config }
    }

    /// Delete every row.
    pub fn clear(&self) -> String {
        format!(
            "DELETE FROM {}",
            QueryFormatter::new(self.config).ident(&self.table.table_name)
        )
    }

    /// Delete rows matching `predicate`.
    pub fn delete(&self, predicate: Expr) -> Result<String> {
        let (formatter, body) = self.predicate(predicate)?;
        let filter = formatter.format_predicate(&body)?;

        let sql = format!("{}\nWHERE {filter}", self.clear());
        trace!(%sql, "built delete command");
        Ok(sql)
    }

    /// Set members to new values on rows matching `predicate`.
    ///
    /// Values may read members of the predicate's parameter, e.g. to
    /// increment a column in place.
    pub fn update<S>(
        &self,
        assignments: impl IntoIterator<Item = (S, Expr)>,
        predicate: Expr,
    ) -> Result<String>
    where
        S: AsRef<str>,
    {
        let (formatter, body) = self.predicate(predicate)?;
        let evaluator = PartialEvaluator::new();

        let mut set = Vec::new();
        for (member, value) in assignments {
            let member = self.table.member(member.as_ref())?;
            let value = evaluator.evaluate(value)?;
            set.push(format!(
                "{} = {}",
                formatter.ident(&member.name),
                formatter.format(&value)?
            ));
        }
        if set.is_empty() {
            return Err(DbError::new(format!(
                "Update of '{}' requires at least one assignment",
                self.table.table_name
            )));
        }

        let filter = formatter.format_predicate(&body)?;
        let sql = format!(
            "UPDATE {}\nSET {}\nWHERE {filter}",
            formatter.ident(&self.table.table_name),
            set.join(", ")
        );
        trace!(%sql, "built update command");
        Ok(sql)
    }

    fn predicate(&self, predicate: Expr) -> Result<(QueryFormatter<'a>, Expr)> {
        let predicate = PartialEvaluator::new().evaluate(predicate)?;
        let [(param, body)] = take_lambda_params(predicate)?;

        let expected = DataType::entity(&self.table.entity);
        if param.datatype != expected {
            return Err(DbError::unsupported(format!(
                "Command predicate over '{}' must take a {expected} parameter, got {}",
                self.table.table_name, param.datatype
            )));
        }

        let formatter = QueryFormatter::new(self.config).with_bare_parameter(param.id, self.table);
        Ok((formatter, body))
    }
}
