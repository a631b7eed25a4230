use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use relq_error::{DbError, DbErrorKind, Result};

use super::{Cursor, RowSource};
use crate::types::Value;

type Responder = Box<dyn Fn(&str) -> Option<Vec<Vec<Value>>> + Sync + Send>;

/// Row source answering commands from memory.
///
/// Commands are matched by exact text first, then handed to the fallback
/// responder if one is set. Every executed command is recorded.
pub struct MemoryRowSource {
    responses: Mutex<HashMap<String, Vec<Vec<Value>>>>,
    fallback: Option<Responder>,
    executed: Mutex<Vec<String>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        MemoryRowSource {
            responses: Mutex::new(HashMap::new()),
            fallback: None,
            executed: Mutex::new(Vec::new()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_response(self, command_text: impl Into<String>, rows: Vec<Vec<Value>>) -> Self {
        self.add_response(command_text, rows);
        self
    }

    pub fn with_fallback<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<Vec<Value>>> + Sync + Send + 'static,
    {
        self.fallback = Some(Box::new(responder));
        self
    }

    pub fn add_response(&self, command_text: impl Into<String>, rows: Vec<Vec<Value>>) {
        self.responses.lock().insert(command_text.into(), rows);
    }

    /// All commands executed so far, in order.
    pub fn executed_commands(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Number of cursors handed out that haven't been dropped yet.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }
}

impl Default for MemoryRowSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryRowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRowSource")
            .field("responses", &self.responses.lock().len())
            .field("has_fallback", &self.fallback.is_some())
            .field("open_cursors", &self.open_cursors())
            .finish_non_exhaustive()
    }
}

impl RowSource for MemoryRowSource {
    fn execute(&self, command_text: &str) -> Result<Box<dyn Cursor>> {
        self.executed.lock().push(command_text.to_string());

        let rows = self.responses.lock().get(command_text).cloned();
        let rows = match rows {
            Some(rows) => rows,
            None => self
                .fallback
                .as_ref()
                .and_then(|responder| responder(command_text))
                .ok_or_else(|| {
                    DbError::new("No response for command").with_field("command", command_text)
                })?,
        };

        Ok(Box::new(MemoryCursor::new(rows, self.open_cursors.clone())))
    }
}

#[derive(Debug)]
pub struct MemoryCursor {
    field_count: usize,
    rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryCursor {
    fn new(rows: Vec<Vec<Value>>, open_cursors: Arc<AtomicUsize>) -> Self {
        open_cursors.fetch_add(1, Ordering::SeqCst);
        MemoryCursor {
            field_count: rows.first().map(|row| row.len()).unwrap_or(0),
            rows: rows.into(),
            current: None,
            open_cursors,
        }
    }

    fn current_field(&self, ordinal: usize) -> Result<&Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::new("Cursor is not positioned on a row"))?;

        row.get(ordinal).ok_or_else(|| {
            DbError::new(format!("Ordinal {ordinal} out of range"))
                .with_kind(DbErrorKind::OutOfRange)
                .with_field("field_count", row.len())
        })
    }
}

impl Cursor for MemoryCursor {
    fn read(&mut self) -> Result<bool> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    fn field_count(&self) -> usize {
        match &self.current {
            Some(row) => row.len(),
            None => self.field_count,
        }
    }

    fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.current_field(ordinal)?.is_null())
    }

    fn get_value(&self, ordinal: usize) -> Result<Value> {
        Ok(self.current_field(ordinal)?.clone())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_response() {
        let source =
            MemoryRowSource::new().with_response("SELECT 1", vec![vec![Value::Int32(1)]]);

        let mut cursor = source.execute("SELECT 1").unwrap();
        assert_eq!(1, source.open_cursors());
        assert!(cursor.read().unwrap());
        assert_eq!(1, cursor.field_count());
        assert_eq!(Value::Int32(1), cursor.get_value(0).unwrap());
        assert!(!cursor.read().unwrap());

        drop(cursor);
        assert_eq!(0, source.open_cursors());
        assert_eq!(vec!["SELECT 1".to_string()], source.executed_commands());
    }

    #[test]
    fn fallback_response() {
        let source = MemoryRowSource::new().with_fallback(|cmd| {
            cmd.contains("students")
                .then(|| vec![vec![Value::from("A")], vec![Value::from("B")]])
        });

        let mut cursor = source.execute("SELECT name FROM students").unwrap();
        assert!(cursor.read().unwrap());
        assert!(cursor.read().unwrap());
        assert_eq!(Value::from("B"), cursor.get_value(0).unwrap());

        source.execute("SELECT name FROM groups").unwrap_err();
    }

    #[test]
    fn ordinal_out_of_range() {
        let source = MemoryRowSource::new().with_response("q", vec![vec![Value::Null]]);
        let mut cursor = source.execute("q").unwrap();
        cursor.read().unwrap();

        assert!(cursor.is_null(0).unwrap());
        let err = cursor.get_value(1).unwrap_err();
        assert_eq!(DbErrorKind::OutOfRange, err.kind());
    }
}
