use std::fmt;
use std::hash::{Hash, Hasher};

use relq_error::{DbError, DbErrorKind, Result};

use super::datatype::{DataType, Field};
use super::from_value::FromValue;

/// A single runtime value.
///
/// Floats compare and hash by their bit pattern so that values (and the
/// expression trees holding them) can be used as map keys.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Char(char),
    Utf8(String),
    Record(RecordValue),
    List(Vec<Value>),
}

/// Ordered named fields, the materialized form of an entity or anonymous
/// record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RecordValue {
    fields: Vec<(String, Value)>,
}

impl RecordValue {
    pub fn new() -> Self {
        RecordValue { fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Take a field out of the record and convert it.
    ///
    /// The field is left as null in the record.
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let value = self
            .fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, value)| std::mem::replace(value, Value::Null))
            .ok_or_else(|| {
                DbError::new(format!("Record is missing field '{name}'"))
                    .with_kind(DbErrorKind::MissingMapping)
            })?;

        T::from_value(value)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Natural type of this value.
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Char(_) => DataType::Char,
            Self::Utf8(_) => DataType::Utf8,
            Self::Record(record) => DataType::Record(
                record
                    .fields
                    .iter()
                    .map(|(name, value)| Field::new(name.clone(), value.datatype()))
                    .collect(),
            ),
            Self::List(values) => DataType::list_of(
                values
                    .first()
                    .map(|v| v.datatype())
                    .unwrap_or(DataType::Null),
            ),
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(conversion_error(other, &DataType::Boolean)),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int32(v) => Ok(*v as i64),
            Self::Int64(v) => Ok(*v),
            other => Err(conversion_error(other, &DataType::Int64)),
        }
    }

    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Self::Int32(v) => Ok(*v as f64),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            other => Err(conversion_error(other, &DataType::Float64)),
        }
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(conversion_error(other, &DataType::Utf8)),
        }
    }

    /// Convert this value to the given type.
    ///
    /// Null converts to null of any type, and casting to `DataType::Null` is
    /// a no-op.
    pub fn cast_to(self, datatype: &DataType) -> Result<Value> {
        Ok(match (self, datatype) {
            (value, DataType::Null) => value,
            (Value::Null, _) => Value::Null,

            (Value::Boolean(b), DataType::Boolean) => Value::Boolean(b),
            (Value::Boolean(b), DataType::Int32) => Value::Int32(b as i32),
            (Value::Boolean(b), DataType::Int64) => Value::Int64(b as i64),
            (Value::Boolean(b), DataType::Float64) => Value::Float64(b as i64 as f64),
            (Value::Int32(v), DataType::Boolean) => Value::Boolean(v != 0),
            (Value::Int64(v), DataType::Boolean) => Value::Boolean(v != 0),
            (Value::Float64(v), DataType::Boolean) => Value::Boolean(v != 0.0),
            (Value::Utf8(s), DataType::Boolean) => match s.trim() {
                "1" | "true" | "TRUE" => Value::Boolean(true),
                "0" | "false" | "FALSE" => Value::Boolean(false),
                _ => return Err(conversion_error(&Value::Utf8(s.clone()), datatype)),
            },

            (Value::Int32(v), DataType::Int32) => Value::Int32(v),
            (Value::Int64(v), DataType::Int32) => Value::Int32(i32::try_from(v)?),
            (Value::Int32(v), DataType::Int64) => Value::Int64(v as i64),
            (Value::Int64(v), DataType::Int64) => Value::Int64(v),
            (Value::Float64(v), DataType::Int32) => Value::Int32(float_to_int(v, datatype)? as i32),
            (Value::Float64(v), DataType::Int64) => Value::Int64(float_to_int(v, datatype)?),
            (Value::Int32(v), DataType::Float64) => Value::Float64(v as f64),
            (Value::Int64(v), DataType::Float64) => Value::Float64(v as f64),
            (Value::Float64(v), DataType::Float64) => Value::Float64(v),
            (Value::Utf8(s), DataType::Int32 | DataType::Int64 | DataType::Float64) => {
                parse_numeric(s, datatype)?
            }

            (Value::Char(c), DataType::Char) => Value::Char(c),
            (Value::Utf8(s), DataType::Char) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(conversion_error(&Value::Utf8(s.clone()), datatype)),
                }
            }
            (Value::Utf8(s), DataType::Utf8) => Value::Utf8(s),
            (
                v @ (Value::Boolean(_)
                | Value::Int32(_)
                | Value::Int64(_)
                | Value::Float64(_)
                | Value::Char(_)),
                DataType::Utf8,
            ) => Value::Utf8(v.to_string()),

            (Value::Record(record), DataType::Entity(_)) => Value::Record(record),
            (Value::Record(record), DataType::Record(fields)) => {
                let mut out = RecordValue::new();
                for (name, value) in record.fields {
                    let value = match fields.iter().find(|f| f.name == name) {
                        Some(field) => value.cast_to(&field.datatype)?,
                        None => value,
                    };
                    out.push(name, value);
                }
                Value::Record(out)
            }

            (Value::List(values), DataType::List(elem) | DataType::Query(elem)) => Value::List(
                values
                    .into_iter()
                    .map(|v| v.cast_to(elem))
                    .collect::<Result<Vec<_>>>()?,
            ),

            (other, datatype) => return Err(conversion_error(&other, datatype)),
        })
    }
}

fn conversion_error(value: &Value, datatype: &DataType) -> DbError {
    DbError::new(format!("Cannot convert '{value}' to {datatype}"))
        .with_kind(DbErrorKind::Conversion)
}

fn float_to_int(v: f64, datatype: &DataType) -> Result<i64> {
    if v.fract() != 0.0 || !v.is_finite() || v < i64::MIN as f64 || v > i64::MAX as f64 {
        return Err(conversion_error(&Value::Float64(v), datatype));
    }
    let v = v as i64;
    if datatype == &DataType::Int32 && i32::try_from(v).is_err() {
        return Err(conversion_error(&Value::Int64(v), datatype));
    }
    Ok(v)
}

fn parse_numeric(s: String, datatype: &DataType) -> Result<Value> {
    let trimmed = s.trim();
    let parsed = match datatype {
        DataType::Int32 => trimmed.parse::<i32>().ok().map(Value::Int32),
        DataType::Int64 => trimmed.parse::<i64>().ok().map(Value::Int64),
        DataType::Float64 => trimmed.parse::<f64>().ok().map(Value::Float64),
        _ => None,
    };
    parsed.ok_or_else(|| conversion_error(&Value::Utf8(s.clone()), datatype))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => (),
            Self::Boolean(v) => v.hash(state),
            Self::Int32(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Char(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Record(v) => v.hash(state),
            Self::List(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Record(record) => {
                write!(f, "{{")?;
                for (idx, (name, value)) in record.fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: {value}")?;
                }
                write!(f, " }}")
            }
            Self::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::Char(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Utf8(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Utf8(value)
    }
}

impl From<RecordValue> for Value {
    fn from(value: RecordValue) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}
