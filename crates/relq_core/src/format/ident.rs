use std::fmt;

use relq_error::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Case normalization applied to identifiers before they're written to query
/// text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierCase {
    /// Emit identifiers as declared.
    Preserve,
    /// `GroupId` => `group_id`
    #[default]
    SnakeLower,
    /// `GroupId` => `GROUP_ID`
    SnakeUpper,
}

impl IdentifierCase {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "preserve" => Self::Preserve,
            "snake_lower" => Self::SnakeLower,
            "snake_upper" => Self::SnakeUpper,
            other => {
                return Err(DbError::new(format!(
                    "Invalid identifier case '{other}', expected one of 'preserve', 'snake_lower', 'snake_upper'"
                )));
            }
        })
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preserve => "preserve",
            Self::SnakeLower => "snake_lower",
            Self::SnakeUpper => "snake_upper",
        }
    }

    pub fn normalize(&self, ident: &str) -> String {
        match self {
            Self::Preserve => ident.to_string(),
            Self::SnakeLower => to_snake_case(ident).to_lowercase(),
            Self::SnakeUpper => to_snake_case(ident).to_uppercase(),
        }
    }
}

impl fmt::Display for IdentifierCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Insert an underscore before every interior upper case character that
/// doesn't follow another upper case character.
///
/// The first and last characters never get an underscore, so `ID` and `IdA`
/// stay as a single word each.
fn to_snake_case(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len() + 4);

    for (idx, &c) in chars.iter().enumerate() {
        if idx > 0
            && idx < chars.len() - 1
            && c.is_uppercase()
            && !chars[idx - 1].is_uppercase()
            && chars[idx - 1] != '_'
        {
            out.push('_');
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_lower() {
        let case = IdentifierCase::SnakeLower;
        assert_eq!("group_id", case.normalize("GroupId"));
        assert_eq!("students", case.normalize("Students"));
        assert_eq!("id", case.normalize("ID"));
        assert_eq!("t0", case.normalize("t0"));
        assert_eq!("first_name", case.normalize("first_Name"));
    }

    #[test]
    fn snake_upper() {
        assert_eq!("GROUP_ID", IdentifierCase::SnakeUpper.normalize("GroupId"));
    }

    #[test]
    fn preserve() {
        assert_eq!("GroupId", IdentifierCase::Preserve.normalize("GroupId"));
    }

    #[test]
    fn from_name() {
        assert_eq!(
            IdentifierCase::SnakeUpper,
            IdentifierCase::from_name("snake_upper").unwrap()
        );
        IdentifierCase::from_name("camel").unwrap_err();
    }
}
