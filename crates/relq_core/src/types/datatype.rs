use std::fmt;

/// A named field inside a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub datatype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Field {
            name: name.into(),
            datatype,
        }
    }
}

/// Static type of an expression or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Untyped. Casting to this type is a no-op.
    Null,
    Boolean,
    Int32,
    Int64,
    Float64,
    /// A single character, produced by string indexing.
    Char,
    Utf8,
    /// An entity mapped through the entity registry, referenced by name.
    Entity(String),
    /// An anonymous record.
    Record(Vec<Field>),
    /// A materialized list of elements.
    List(Box<DataType>),
    /// A composable query producing elements of the inner type.
    Query(Box<DataType>),
}

impl DataType {
    pub fn entity(name: impl Into<String>) -> Self {
        DataType::Entity(name.into())
    }

    pub fn query_of(element: DataType) -> Self {
        DataType::Query(Box::new(element))
    }

    pub fn list_of(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Float64)
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Char)
    }

    /// Element type for list and query types.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::List(elem) | Self::Query(elem) => Some(elem.as_ref()),
            _ => None,
        }
    }

    /// Returns the type both numeric types should be promoted to for
    /// arithmetic.
    pub fn promote_numeric(left: &DataType, right: &DataType) -> Option<DataType> {
        use DataType::*;
        Some(match (left, right) {
            (Float64, l) | (l, Float64) if l.is_numeric() => Float64,
            (Int64, l) | (l, Int64) if l.is_numeric() => Int64,
            (Int32, Int32) => Int32,
            _ => return None,
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Char => write!(f, "Char"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Entity(name) => write!(f, "{name}"),
            Self::Record(fields) => {
                write!(f, "Record {{")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", field.name, field.datatype)?;
                }
                write!(f, " }}")
            }
            Self::List(elem) => write!(f, "List<{elem}>"),
            Self::Query(elem) => write!(f, "Query<{elem}>"),
        }
    }
}
