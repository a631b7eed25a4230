//! Row sources execute query text and stream back rows.

pub mod memory;

use std::fmt::Debug;

use relq_error::Result;

use crate::types::Value;

/// Executes query text against some database.
pub trait RowSource: Debug + Sync + Send {
    /// Execute a command, returning a cursor over its rows.
    ///
    /// Resources held by the cursor are released when it's dropped.
    fn execute(&self, command_text: &str) -> Result<Box<dyn Cursor>>;
}

/// A forward-only cursor over the rows of one command.
pub trait Cursor: Debug + Send {
    /// Advance to the next row. Returns false once there are no more rows.
    fn read(&mut self) -> Result<bool>;

    /// Number of fields in every row.
    fn field_count(&self) -> usize;

    fn is_null(&self, ordinal: usize) -> Result<bool>;

    /// Raw value at `ordinal` in the current row.
    fn get_value(&self, ordinal: usize) -> Result<Value>;
}
