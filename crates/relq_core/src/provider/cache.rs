use std::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;
use relq_error::Result;
use tracing::debug;

use crate::expr::Expr;
use crate::expr::sql::ProjectionExpr;
use crate::projection::Materializer;
use crate::projection::builder::ProjectionBuilder;

/// Compiled materializers owned by a single provider.
///
/// Keyed on the row alias and the logical projector. Both are deterministic
/// for a given composed query, so re-executing a query reuses the materializer
/// compiled the first time around. Nested projectors keep their outer row
/// reads, so a correlated sub-query has one entry however many rows run it.
#[derive(Default)]
pub struct MaterializerCache {
    materializers: Mutex<HashMap<(String, Expr), Materializer>>,
}

impl MaterializerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the materializer for a projection, building and caching it if
    /// needed.
    pub fn get_or_build(&self, projection: &ProjectionExpr) -> Result<Materializer> {
        let key = (
            projection.alias().to_string(),
            projection.projector.as_ref().clone(),
        );
        if let Some(materializer) = self.materializers.lock().get(&key) {
            return Ok(materializer.clone());
        }

        // Built outside the lock. A concurrent build of the same key produces
        // an equivalent materializer, last one wins.
        let materializer = ProjectionBuilder::build(projection)?;
        debug!(alias = %key.0, "built materializer");
        self.materializers.lock().insert(key, materializer.clone());

        Ok(materializer)
    }

    pub fn len(&self) -> usize {
        self.materializers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.materializers.lock().clear();
    }
}

impl fmt::Debug for MaterializerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializerCache")
            .field("len", &self.len())
            .finish()
    }
}
