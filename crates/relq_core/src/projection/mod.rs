//! Compiling projectors into materializers and streaming rows through them.

pub mod builder;
pub mod reader;

use std::sync::Arc;

use relq_error::Result;

use crate::expr::sql::ProjectionExpr;
use crate::types::Value;

/// Builds one output value from the current row.
pub type Materializer = Arc<dyn Fn(&dyn RowAccessor) -> Result<Value> + Sync + Send>;

/// The interface a materializer reads the current row through.
pub trait RowAccessor {
    /// Read a single value of the current row. Nulls are returned as
    /// `Value::Null`.
    fn get_value(&self, ordinal: usize) -> Result<Value>;

    /// Read a value of an enclosing row. `depth` 0 is the row the current
    /// sub-query was executed for.
    fn outer_value(&self, depth: usize, ordinal: usize) -> Result<Value>;

    /// Execute a nested projection correlated with the current row, returning
    /// every value it produces as a list.
    fn execute_subquery(&self, projection: &ProjectionExpr) -> Result<Value>;
}
