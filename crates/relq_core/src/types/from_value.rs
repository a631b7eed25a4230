use relq_error::{DbError, DbErrorKind, Result};

use super::datatype::DataType;
use super::value::{RecordValue, Value};

/// Conversion from a materialized value into a typed result.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn unexpected_null(datatype: &DataType) -> DbError {
    DbError::new(format!("Unexpected NULL for non-nullable {datatype}"))
        .with_kind(DbErrorKind::Conversion)
}

macro_rules! impl_from_value_scalar {
    ($ty:ty, $datatype:expr, $variant:ident) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                match value.cast_to(&$datatype)? {
                    Value::$variant(v) => Ok(v),
                    Value::Null => Err(unexpected_null(&$datatype)),
                    other => Err(DbError::new(format!(
                        "Expected {} after cast, got {other}",
                        $datatype
                    ))
                    .with_kind(DbErrorKind::Conversion)),
                }
            }
        }
    };
}

impl_from_value_scalar!(bool, DataType::Boolean, Boolean);
impl_from_value_scalar!(i32, DataType::Int32, Int32);
impl_from_value_scalar!(i64, DataType::Int64, Int64);
impl_from_value_scalar!(f64, DataType::Float64, Float64);
impl_from_value_scalar!(char, DataType::Char, Char);
impl_from_value_scalar!(String, DataType::Utf8, Utf8);

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for RecordValue {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Record(record) => Ok(record),
            other => Err(DbError::new(format!("Expected a record, got {other}"))
                .with_kind(DbErrorKind::Conversion)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(values) => values.into_iter().map(T::from_value).collect(),
            other => Err(DbError::new(format!("Expected a list, got {other}"))
                .with_kind(DbErrorKind::Conversion)),
        }
    }
}
