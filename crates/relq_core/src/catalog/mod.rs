//! Mapping of entity types to tables.

use hashbrown::HashMap;
use relq_error::{DbError, DbErrorKind, Result};

use crate::types::{DataType, Field, FromValue};
use crate::util::similar::SimilarName;

/// A user type backed by a table.
pub trait Entity: FromValue + 'static {
    /// Name of the entity, used as the key into the registry.
    const NAME: &'static str;

    /// Table mapping for this entity.
    fn table_info() -> TableInfo;

    fn datatype() -> DataType {
        DataType::entity(Self::NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub entity: String,
    pub table_name: String,
    /// Mapped members in column order.
    pub members: Vec<MemberInfo>,
}

impl TableInfo {
    pub fn new(entity: impl Into<String>, table_name: impl Into<String>) -> Self {
        TableInfo {
            entity: entity.into(),
            table_name: table_name.into(),
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, name: impl Into<String>, datatype: DataType) -> Self {
        self.members.push(MemberInfo {
            name: name.into(),
            datatype,
        });
        self
    }

    pub fn member(&self, name: &str) -> Result<&MemberInfo> {
        match self.members.iter().find(|m| m.name == name) {
            Some(member) => Ok(member),
            None => {
                let mut err = DbError::new(format!(
                    "Missing member '{name}' on entity '{}'",
                    self.entity
                ))
                .with_kind(DbErrorKind::MissingMapping);
                if let Some(similar) =
                    SimilarName::find(self.members.iter().map(|m| m.name.as_str()), name)
                {
                    err = err.with_field("did you mean", similar);
                }
                Err(err)
            }
        }
    }

    /// Record type with a field per mapped member.
    pub fn record_type(&self) -> DataType {
        DataType::Record(
            self.members
                .iter()
                .map(|m| Field::new(m.name.clone(), m.datatype.clone()))
                .collect(),
        )
    }
}

/// Registry of every entity a provider can query.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    tables: HashMap<String, TableInfo>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: TableInfo) -> Result<()> {
        if self.tables.contains_key(&info.entity) {
            return Err(DbError::new(format!(
                "Entity '{}' already registered",
                info.entity
            )));
        }
        self.tables.insert(info.entity.clone(), info);
        Ok(())
    }

    pub fn register_entity<E: Entity>(&mut self) -> Result<()> {
        let info = E::table_info();
        if info.entity != E::NAME {
            return Err(DbError::internal(format!(
                "Table info for '{}' describes entity '{}'",
                E::NAME,
                info.entity
            )));
        }
        self.register(info)
    }

    pub fn get(&self, entity: &str) -> Result<&TableInfo> {
        match self.tables.get(entity) {
            Some(info) => Ok(info),
            None => {
                let mut err = DbError::new(format!("Missing table mapping for entity '{entity}'"))
                    .with_kind(DbErrorKind::MissingMapping);
                if let Some(similar) =
                    SimilarName::find(self.tables.keys().map(|k| k.as_str()), entity)
                {
                    err = err.with_field("did you mean", similar);
                }
                Err(err)
            }
        }
    }

    /// Table info for a data type, which must be an entity.
    pub fn get_for_type(&self, datatype: &DataType) -> Result<&TableInfo> {
        match datatype {
            DataType::Entity(name) => self.get(name),
            other => Err(DbError::new(format!("Type {other} is not a mapped entity"))
                .with_kind(DbErrorKind::MissingMapping)),
        }
    }
}
