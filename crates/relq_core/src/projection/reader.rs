use std::sync::Arc;

use relq_error::{DbError, DbErrorKind, Result};
use tracing::trace;

use super::builder::substitute_outer_row;
use super::{Materializer, RowAccessor};
use crate::evaluator::{PartialEvaluator, can_evaluate_in_subquery};
use crate::expr::Expr;
use crate::expr::sql::ProjectionExpr;
use crate::provider::QueryProvider;
use crate::rowsource::Cursor;
use crate::types::Value;

/// Streams rows from a cursor through a materializer.
///
/// The cursor is released as soon as it's exhausted, a row fails, or the
/// reader is dropped.
pub struct ProjectionReader {
    cursor: Option<Box<dyn Cursor>>,
    materializer: Materializer,
    provider: QueryProvider,
    /// Snapshots of the enclosing rows a correlated sub-query runs for,
    /// innermost first.
    outer: Vec<Arc<[Value]>>,
}

impl ProjectionReader {
    pub fn new(
        cursor: Box<dyn Cursor>,
        materializer: Materializer,
        provider: QueryProvider,
    ) -> Self {
        ProjectionReader {
            cursor: Some(cursor),
            materializer,
            provider,
            outer: Vec::new(),
        }
    }

    /// Reader for a correlated sub-query executed for the given enclosing
    /// rows.
    pub(crate) fn with_outer_rows(mut self, outer: Vec<Arc<[Value]>>) -> Self {
        self.outer = outer;
        self
    }

    /// If the underlying cursor has been released.
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    fn current(&self) -> Result<&dyn Cursor> {
        self.cursor
            .as_deref()
            .ok_or_else(|| DbError::new("Reader is not positioned on a row"))
    }

    fn snapshot(&self) -> Result<Arc<[Value]>> {
        let field_count = self.current()?.field_count();
        (0..field_count)
            .map(|ordinal| self.get_value(ordinal))
            .collect::<Result<Vec<_>>>()
            .map(Arc::from)
    }
}

impl std::fmt::Debug for ProjectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionReader")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Iterator for ProjectionReader {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        match cursor.read() {
            Ok(true) => (),
            Ok(false) => {
                self.cursor = None;
                return None;
            }
            Err(e) => {
                self.cursor = None;
                return Some(Err(e));
            }
        }

        let materializer = self.materializer.clone();
        let result = materializer(&*self);
        if result.is_err() {
            self.cursor = None;
        }

        Some(result)
    }
}

impl RowAccessor for ProjectionReader {
    fn get_value(&self, ordinal: usize) -> Result<Value> {
        let cursor = self.current()?;
        let field_count = cursor.field_count();
        if ordinal >= field_count {
            return Err(DbError::new(format!("Ordinal {ordinal} out of range"))
                .with_kind(DbErrorKind::OutOfRange)
                .with_field("field_count", field_count));
        }

        if cursor.is_null(ordinal)? {
            return Ok(Value::Null);
        }
        cursor.get_value(ordinal)
    }

    fn outer_value(&self, depth: usize, ordinal: usize) -> Result<Value> {
        let row = self.outer.get(depth).ok_or_else(|| {
            DbError::internal(format!("No enclosing row at depth {depth}"))
        })?;
        row.get(ordinal).cloned().ok_or_else(|| {
            DbError::new(format!("Ordinal {ordinal} out of range"))
                .with_kind(DbErrorKind::OutOfRange)
                .with_field("field_count", row.len())
        })
    }

    fn execute_subquery(&self, projection: &ProjectionExpr) -> Result<Value> {
        // Only the select is bound to this row. The projector keeps its outer
        // row reads, so its materializer is the same for every row.
        let mut source = Expr::Select(projection.source.as_ref().clone());
        substitute_outer_row(&mut source, self)?;

        let source = PartialEvaluator::with_predicate(can_evaluate_in_subquery).evaluate(source)?;
        let source = match source {
            Expr::Select(select) => select,
            other => {
                return Err(DbError::internal(format!(
                    "Expected select after evaluation, got {}",
                    other.kind_name()
                )));
            }
        };
        let projection = ProjectionExpr {
            source: Box::new(source),
            projector: projection.projector.clone(),
            shape: projection.shape,
        };

        let mut outer = Vec::with_capacity(self.outer.len() + 1);
        outer.push(self.snapshot()?);
        outer.extend(self.outer.iter().cloned());

        trace!(alias = %projection.alias(), "executing correlated sub-query");
        let values = self
            .provider
            .execute_projection(&projection)?
            .with_outer_rows(outer)
            .collect::<Result<Vec<_>>>()?;

        Ok(Value::List(values))
    }
}
