//! Glue between the translation pipeline and a row source.

pub mod cache;
pub mod command;
pub mod query;

use std::sync::Arc;

use cache::MaterializerCache;
use command::CommandBuilder;
use query::Query;
use relq_error::Result;
use tracing::debug;

use crate::binder::QueryBinder;
use crate::catalog::{Entity, EntityRegistry};
use crate::config::ProviderConfig;
use crate::evaluator::PartialEvaluator;
use crate::expr::sql::ProjectionExpr;
use crate::expr::{self, Expr};
use crate::format::QueryFormatter;
use crate::projection::Materializer;
use crate::projection::builder::ProjectionBuilder;
use crate::projection::reader::ProjectionReader;
use crate::rowsource::RowSource;

/// Output of translating a composed query.
#[derive(Clone)]
pub struct Translation {
    /// Command text to send to the row source.
    pub sql: String,
    /// The bound projection the text was formatted from.
    pub projection: ProjectionExpr,
    /// Materializer for rows produced by executing `sql`.
    pub materializer: Materializer,
}

impl std::fmt::Debug for Translation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translation")
            .field("sql", &self.sql)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ProviderState {
    row_source: Arc<dyn RowSource>,
    registry: EntityRegistry,
    config: ProviderConfig,
    cache: MaterializerCache,
}

/// Translates and executes composed queries against a row source.
///
/// Cheap to clone, clones share the registry, config and materializer cache.
#[derive(Debug, Clone)]
pub struct QueryProvider {
    state: Arc<ProviderState>,
}

impl QueryProvider {
    pub fn new(
        row_source: Arc<dyn RowSource>,
        registry: EntityRegistry,
        config: ProviderConfig,
    ) -> Self {
        QueryProvider {
            state: Arc::new(ProviderState {
                row_source,
                registry,
                config,
                cache: MaterializerCache::new(),
            }),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.state.registry
    }

    pub fn materializer_cache(&self) -> &MaterializerCache {
        &self.state.cache
    }

    /// Deferred query over every row of an entity's table.
    pub fn query<E: Entity>(&self) -> Query<E> {
        self.create_query(expr::collection(E::NAME))
    }

    /// Deferred query for an arbitrary composed expression. Nothing is
    /// translated until the query is executed.
    pub fn create_query<T>(&self, expr: Expr) -> Query<T> {
        Query::new(self.clone(), expr)
    }

    /// Run the full translation pipeline for a composed query.
    ///
    /// Every call uses a fresh binder, so translating the same expression
    /// twice produces identical text.
    pub fn translate(&self, expr: Expr) -> Result<Translation> {
        let expr = PartialEvaluator::new().evaluate(expr)?;
        let projection = QueryBinder::new(&self.state.registry, &self.state.config).bind(expr)?;
        let sql = self.format(&projection)?;
        let materializer = self.materializer(&projection)?;

        Ok(Translation {
            sql,
            projection,
            materializer,
        })
    }

    /// Translate and execute a composed query.
    pub fn execute(&self, expr: Expr) -> Result<ProjectionReader> {
        let translation = self.translate(expr)?;
        self.execute_command(&translation.sql, translation.materializer)
    }

    /// Execute an already bound projection.
    ///
    /// Used for correlated sub-queries, which are bound as part of their
    /// enclosing query.
    pub fn execute_projection(&self, projection: &ProjectionExpr) -> Result<ProjectionReader> {
        let sql = self.format(projection)?;
        let materializer = self.materializer(projection)?;
        self.execute_command(&sql, materializer)
    }

    /// Builder for data modification commands against the table of `E`.
    pub fn commands<E: Entity>(&self) -> Result<CommandBuilder<'_>> {
        let table = self.state.registry.get(E::NAME)?;
        Ok(CommandBuilder::new(table, &self.state.config))
    }

    /// Delete every row of the table of `E`.
    pub fn clear<E: Entity>(&self) -> Result<()> {
        let sql = self.commands::<E>()?.clear();
        self.execute_non_query(&sql)
    }

    /// Delete rows of `E` matching `predicate`.
    pub fn delete<E: Entity>(&self, predicate: Expr) -> Result<()> {
        let sql = self.commands::<E>()?.delete(predicate)?;
        self.execute_non_query(&sql)
    }

    /// Set members of rows of `E` matching `predicate`.
    pub fn update<E, S>(
        &self,
        assignments: impl IntoIterator<Item = (S, Expr)>,
        predicate: Expr,
    ) -> Result<()>
    where
        E: Entity,
        S: AsRef<str>,
    {
        let sql = self.commands::<E>()?.update(assignments, predicate)?;
        self.execute_non_query(&sql)
    }

    fn format(&self, projection: &ProjectionExpr) -> Result<String> {
        let sql = QueryFormatter::new(&self.state.config)
            .format(&Expr::Select(projection.source.as_ref().clone()))?;
        debug!(%sql, "formatted query");
        Ok(sql)
    }

    fn materializer(&self, projection: &ProjectionExpr) -> Result<Materializer> {
        if self.state.config.enable_materializer_cache {
            self.state.cache.get_or_build(projection)
        } else {
            ProjectionBuilder::build(projection)
        }
    }

    fn execute_command(&self, sql: &str, materializer: Materializer) -> Result<ProjectionReader> {
        let cursor = self
            .state
            .row_source
            .execute(sql)
            .map_err(|e| e.with_field("sql", sql))?;
        Ok(ProjectionReader::new(cursor, materializer, self.clone()))
    }

    /// Execute a command whose rows, if any, are discarded.
    fn execute_non_query(&self, sql: &str) -> Result<()> {
        debug!(%sql, "executing command");
        self.state
            .row_source
            .execute(sql)
            .map_err(|e| e.with_field("sql", sql))?;
        Ok(())
    }
}
