use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Coarse classification of an error.
///
/// Callers should generally just surface the message. The kind exists so that
/// tests and embedding code can distinguish invariant violations from user
/// errors without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// An operation, operator, or node kind that isn't supported.
    Unsupported,
    /// An internal invariant was violated. This indicates a bug.
    Internal,
    /// A single-pass resource was consumed more than once.
    SinglePass,
    /// Ordinal or index out of range.
    OutOfRange,
    /// A table or member mapping is missing.
    MissingMapping,
    /// A value could not be converted to the requested type.
    Conversion,
    /// Everything else.
    Other,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported"),
            Self::Internal => write!(f, "internal"),
            Self::SinglePass => write!(f, "single pass"),
            Self::OutOfRange => write!(f, "out of range"),
            Self::MissingMapping => write!(f, "missing mapping"),
            Self::Conversion => write!(f, "conversion"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    msg: String,
    kind: DbErrorKind,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(Cow<'static, str>, String)>,
    backtrace: Backtrace,
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                msg: msg.into(),
                kind: DbErrorKind::Other,
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(DbErrorKind::Unsupported)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(DbErrorKind::Internal)
    }

    pub fn with_kind(mut self, kind: DbErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Attach a key/value pair to the error for additional context.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display,
    {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> DbErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.inner.backtrace
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for (key, value) in &self.inner.fields {
            write!(f, "\n{key}: {value}")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if self.inner.backtrace.status() == BacktraceStatus::Captured {
            write!(f, "\nBacktrace: {}", self.inner.backtrace)?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for DbError {
    fn from(value: fmt::Error) -> Self {
        Self::with_source("Format error", Box::new(value))
    }
}

impl From<std::num::TryFromIntError> for DbError {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::with_source("Int conversion error", Box::new(value))
            .with_kind(DbErrorKind::Conversion)
    }
}

/// Return early with an unsupported error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        return Err($crate::DbError::unsupported(format!("Not yet implemented: {msg}")));
    }};
}

/// An extension trait for adding context to the Error variant of a result.
pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a context string generated from a function.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: Fn() -> String;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: Fn() -> String,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(DbError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::internal(format!("Missing required value: {msg}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = DbError::new("Column not found")
            .with_field("column", "name")
            .with_field("ordinal", 3);

        let s = err.to_string();
        assert!(s.starts_with("Column not found\ncolumn: name\nordinal: 3"), "{s}");
        assert_eq!(Some("3"), err.get_field("ordinal"));
        assert_eq!(DbErrorKind::Other, err.kind());
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), fmt::Error> = Err(fmt::Error);
        let err = res.context("failed to write").unwrap_err();

        assert_eq!("failed to write", err.message());
        assert!(err.source().is_some());
    }

    #[test]
    fn required_none_is_internal() {
        let err = None::<i32>.required("alias").unwrap_err();
        assert_eq!(DbErrorKind::Internal, err.kind());
        assert_eq!(Some(4), Some(4).required("alias").ok());
    }

    #[test]
    fn not_implemented_returns_unsupported() {
        fn check() -> Result<()> {
            not_implemented!("lateral {}", "joins");
        }

        let err = check().unwrap_err();
        assert_eq!(DbErrorKind::Unsupported, err.kind());
        assert_eq!("Not yet implemented: lateral joins", err.message());
    }
}
