use std::collections::HashMap;
use std::sync::LazyLock;

use relq_error::{DbError, DbErrorKind, Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::format::ident::IdentifierCase;
use crate::types::Value;
use crate::util::similar::SimilarName;

pub const DEFAULT_INDENT_WIDTH: usize = 2;
const MAX_INDENT_WIDTH: usize = 16;

/// Configuration for a query provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub identifier_case: IdentifierCase,
    pub indent_width: usize,
    pub enable_materializer_cache: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            identifier_case: IdentifierCase::SnakeLower,
            indent_width: DEFAULT_INDENT_WIDTH,
            enable_materializer_cache: true,
        }
    }
}

impl ProviderConfig {
    /// Parse a config from a json object. Missing settings use their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let conf: ProviderConfig =
            serde_json::from_str(json).context("Failed to parse provider config")?;
        IndentWidth::validate_value(conf.indent_width)?;
        Ok(conf)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize provider config")
    }

    pub fn set_from_value(&mut self, name: &str, value: Value) -> Result<()> {
        let func = get_setting_functions(name)?;
        (func.set)(value, self)
    }

    pub fn get_as_value(&self, name: &str) -> Result<Value> {
        let func = get_setting_functions(name)?;
        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();
        let func = get_setting_functions(name)?;
        let value = (func.get)(&def_conf);
        (func.set)(value, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names of all settings, sorted.
    pub fn setting_names() -> Vec<&'static str> {
        let mut names: Vec<_> = GET_SET_FUNCTIONS.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Every setting paired with its description, sorted by name.
    pub fn describe_settings() -> Vec<(&'static str, &'static str)> {
        Self::setting_names()
            .into_iter()
            .filter_map(|name| {
                GET_SET_FUNCTIONS
                    .get(name)
                    .map(|func| (name, func.description))
            })
            .collect()
    }

    pub fn describe_setting(name: &str) -> Result<&'static str> {
        Ok(get_setting_functions(name)?.description)
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(value: Value, conf: &mut ProviderConfig) -> Result<()>,
    get: fn(conf: &ProviderConfig) -> Value,
}

impl SettingFunctions {
    const fn new<S: ProviderSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_value as _,
            get: S::get_as_value as _,
        }
    }
}

fn get_setting_functions(name: &str) -> Result<&'static SettingFunctions> {
    match GET_SET_FUNCTIONS.get(name) {
        Some(func) => Ok(func),
        None => {
            let mut err = DbError::new(format!("Missing setting for '{name}'"))
                .with_kind(DbErrorKind::MissingMapping);
            if let Some(similar) = SimilarName::find(GET_SET_FUNCTIONS.keys().copied(), name) {
                err = err.with_field("did you mean", similar);
            }
            Err(err)
        }
    }
}

fn insert_setting<S: ProviderSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<IdentifierCaseSetting>(&mut map);
    insert_setting::<IndentWidth>(&mut map);
    insert_setting::<EnableMaterializerCache>(&mut map);

    map
});

pub trait ProviderSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_value(value: Value, conf: &mut ProviderConfig) -> Result<()>;
    fn get_as_value(conf: &ProviderConfig) -> Value;
}

pub struct IdentifierCaseSetting;

impl ProviderSetting for IdentifierCaseSetting {
    const NAME: &'static str = "identifier_case";
    const DESCRIPTION: &'static str = "Case normalization applied to emitted identifiers";

    fn set_from_value(value: Value, conf: &mut ProviderConfig) -> Result<()> {
        conf.identifier_case = IdentifierCase::from_name(value.try_as_str()?)?;
        Ok(())
    }

    fn get_as_value(conf: &ProviderConfig) -> Value {
        conf.identifier_case.as_str().into()
    }
}

pub struct IndentWidth;

impl IndentWidth {
    pub fn validate_value(val: usize) -> Result<()> {
        if val > MAX_INDENT_WIDTH {
            return Err(DbError::new(format!(
                "Indent width cannot be greater than {MAX_INDENT_WIDTH}"
            )));
        }
        Ok(())
    }
}

impl ProviderSetting for IndentWidth {
    const NAME: &'static str = "indent_width";
    const DESCRIPTION: &'static str = "Spaces per nesting level in formatted queries";

    fn set_from_value(value: Value, conf: &mut ProviderConfig) -> Result<()> {
        let val = usize::try_from(value.try_as_i64()?)?;
        Self::validate_value(val)?;
        conf.indent_width = val;
        Ok(())
    }

    fn get_as_value(conf: &ProviderConfig) -> Value {
        Value::Int64(conf.indent_width as i64)
    }
}

pub struct EnableMaterializerCache;

impl ProviderSetting for EnableMaterializerCache {
    const NAME: &'static str = "enable_materializer_cache";
    const DESCRIPTION: &'static str = "Reuse compiled materializers within a provider";

    fn set_from_value(value: Value, conf: &mut ProviderConfig) -> Result<()> {
        conf.enable_materializer_cache = value.try_as_bool()?;
        Ok(())
    }

    fn get_as_value(conf: &ProviderConfig) -> Value {
        conf.enable_materializer_cache.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_reset() {
        let mut conf = ProviderConfig::default();
        conf.set_from_value("indent_width", Value::Int32(4)).unwrap();
        assert_eq!(4, conf.indent_width);
        assert_eq!(Value::Int64(4), conf.get_as_value("indent_width").unwrap());

        conf.reset("indent_width").unwrap();
        assert_eq!(DEFAULT_INDENT_WIDTH, conf.indent_width);
    }

    #[test]
    fn set_identifier_case() {
        let mut conf = ProviderConfig::default();
        conf.set_from_value("identifier_case", "preserve".into())
            .unwrap();
        assert_eq!(IdentifierCase::Preserve, conf.identifier_case);
    }

    #[test]
    fn unknown_setting_suggests() {
        let mut conf = ProviderConfig::default();
        let err = conf
            .set_from_value("indent_widht", Value::Int32(4))
            .unwrap_err();
        assert_eq!(Some("indent_width"), err.get_field("did you mean"));
    }

    #[test]
    fn indent_width_bounds() {
        let mut conf = ProviderConfig::default();
        conf.set_from_value("indent_width", Value::Int32(100))
            .unwrap_err();
        conf.set_from_value("indent_width", Value::Int32(-1))
            .unwrap_err();
        assert_eq!(DEFAULT_INDENT_WIDTH, conf.indent_width);
    }

    #[test]
    fn json_uses_defaults() {
        let conf = ProviderConfig::from_json(r#"{"identifier_case": "snake_upper"}"#).unwrap();
        assert_eq!(IdentifierCase::SnakeUpper, conf.identifier_case);
        assert_eq!(DEFAULT_INDENT_WIDTH, conf.indent_width);
        assert!(conf.enable_materializer_cache);

        let roundtrip = ProviderConfig::from_json(&conf.to_json().unwrap()).unwrap();
        assert_eq!(conf, roundtrip);
    }

    #[test]
    fn json_rejects_unknown() {
        ProviderConfig::from_json(r#"{"indent": 2}"#).unwrap_err();
    }

    #[test]
    fn setting_names_sorted() {
        assert_eq!(
            vec!["enable_materializer_cache", "identifier_case", "indent_width"],
            ProviderConfig::setting_names()
        );
    }

    #[test]
    fn settings_described() {
        let described = ProviderConfig::describe_settings();
        assert_eq!(
            ProviderConfig::setting_names(),
            described.iter().map(|(name, _)| *name).collect::<Vec<_>>()
        );
        assert!(described.iter().all(|(_, description)| !description.is_empty()));

        assert_eq!(
            IndentWidth::DESCRIPTION,
            ProviderConfig::describe_setting("indent_width").unwrap()
        );
        let err = ProviderConfig::describe_setting("identifer_case").unwrap_err();
        assert_eq!(Some("identifier_case"), err.get_field("did you mean"));
    }
}
