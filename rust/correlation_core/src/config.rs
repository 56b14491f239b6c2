//! Configuration consumed by the correlation cache.
//!
//! Role type definitions live in the `Bundle` object config under
//! `roleTypeDefinitions`, either as a map keyed by type name or as a list.
//! Both forms normalise to [`RoleTypeDefinitions`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// System configuration / task argument key for async cache refresh.
pub const ASYNC_CACHE_REFRESH: &str = "asyncCacheRefresh";

/// Name of the object config record holding role settings.
pub const ROLE_OBJECT_CONFIG: &str = "Bundle";

/// Object config attribute holding the role type definitions.
pub const ATT_ROLE_TYPE_DEFINITIONS: &str = "roleTypeDefinitions";

/// Per-type behaviour flags for roles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleTypeDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub no_auto_assignment: bool,
    #[serde(default)]
    pub no_manual_assignment: bool,
    #[serde(default)]
    pub no_assignment_selector: bool,
    #[serde(default)]
    pub no_detection: bool,
    #[serde(default)]
    pub no_detection_unless_assigned: bool,
}

impl RoleTypeDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Roles of this type may be auto-assigned by an assignment rule.
    pub fn is_assignable(&self) -> bool {
        !self.no_auto_assignment
    }

    pub fn is_detectable(&self) -> bool {
        !self.no_detection
    }

    pub fn is_detectable_only_if_assigned(&self) -> bool {
        self.no_detection_unless_assigned
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoleTypeDefinitionsRepr {
    Map(BTreeMap<String, RoleTypeDefinition>),
    List(Vec<RoleTypeDefinition>),
}

/// Role type definitions keyed by type name.
///
/// Backed by an ordered map so that equality is structural and independent
/// of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTypeDefinitions(BTreeMap<String, RoleTypeDefinition>);

impl RoleTypeDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise the map or list form of the configuration blob.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let repr: RoleTypeDefinitionsRepr = serde_json::from_value(value.clone())?;
        let types = match repr {
            RoleTypeDefinitionsRepr::Map(map) => map
                .into_iter()
                .map(|(key, mut def)| {
                    if def.name.is_empty() {
                        def.name = key.clone();
                    }
                    (key, def)
                })
                .collect(),
            RoleTypeDefinitionsRepr::List(list) => {
                list.into_iter().map(|def| (def.name.clone(), def)).collect()
            }
        };
        Ok(Self(types))
    }

    pub fn insert(&mut self, def: RoleTypeDefinition) {
        self.0.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: Option<&str>) -> Option<&RoleTypeDefinition> {
        name.and_then(|n| self.0.get(n))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<RoleTypeDefinition> for RoleTypeDefinitions {
    fn from_iter<I: IntoIterator<Item = RoleTypeDefinition>>(iter: I) -> Self {
        Self(iter.into_iter().map(|d| (d.name.clone(), d)).collect())
    }
}

/// Named object config record with free-form attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub name: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl ObjectConfig {
    /// Role type definitions carried by this config; empty when absent.
    pub fn role_type_definitions(&self) -> Result<RoleTypeDefinitions, serde_json::Error> {
        match self.attributes.get(ATT_ROLE_TYPE_DEFINITIONS) {
            Some(Value::Null) | None => Ok(RoleTypeDefinitions::new()),
            Some(value) => RoleTypeDefinitions::from_value(value),
        }
    }
}

/// Global system configuration relevant to the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfiguration {
    #[serde(default)]
    pub async_cache_refresh: bool,
    /// RapidSetup role type names treated as birthright types.
    #[serde(default)]
    pub birthright_role_types: Vec<String>,
}

/// RapidSetup birthright role type names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BirthrightRoleTypes(BTreeSet<String>);

impl BirthrightRoleTypes {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// A type is a birthright type when RapidSetup lists it and it is
    /// neither auto-assigned nor stripped of its assignment selector.
    pub fn is_birthright(&self, role_type: &RoleTypeDefinition) -> bool {
        !role_type.name.is_empty()
            && self.0.contains(&role_type.name)
            && role_type.no_auto_assignment
            && !role_type.no_assignment_selector
    }
}

/// Per-call overrides of the global configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub async_cache_refresh: Option<bool>,
}

impl CacheOptions {
    pub fn with_async_refresh(enabled: bool) -> Self {
        Self {
            async_cache_refresh: Some(enabled),
        }
    }

    /// Pick overrides out of task or workflow arguments.
    pub fn from_args(args: &Map<String, Value>) -> Self {
        let async_cache_refresh = args.get(ASYNC_CACHE_REFRESH).map(|v| match v {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        });
        Self {
            async_cache_refresh,
        }
    }

    pub fn resolve_async_refresh(&self, global: bool) -> bool {
        self.async_cache_refresh.unwrap_or(global)
    }
}

/// Parse role type definitions from a JSON string (map or list form).
pub fn parse_role_type_definitions(json: &str) -> Result<RoleTypeDefinitions, serde_json::Error> {
    let value: Value = serde_json::from_str(json)?;
    RoleTypeDefinitions::from_value(&value)
}

/// Parse the system configuration from a JSON string.
pub fn parse_system_configuration(json: &str) -> Result<SystemConfiguration, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_map_form_fills_names() {
        let types = parse_role_type_definitions(
            r#"{"business":{"noDetection":true},"it":{"noAutoAssignment":true}}"#,
        )
        .unwrap();
        assert_eq!(types.len(), 2);
        let business = types.get(Some("business")).unwrap();
        assert_eq!(business.name, "business");
        assert!(business.is_assignable());
        assert!(!business.is_detectable());
        assert!(!types.get(Some("it")).unwrap().is_assignable());
    }

    #[test]
    fn parse_list_form() {
        let types = parse_role_type_definitions(
            r#"[{"name":"it","noDetectionUnlessAssigned":true},{"name":"org"}]"#,
        )
        .unwrap();
        assert!(types.get(Some("it")).unwrap().is_detectable_only_if_assigned());
        assert!(types.get(Some("org")).is_some());
        assert!(types.get(None).is_none());
    }

    #[test]
    fn map_and_list_forms_are_structurally_equal() {
        let from_map =
            parse_role_type_definitions(r#"{"a":{"noDetection":true},"b":{}}"#).unwrap();
        let from_list =
            parse_role_type_definitions(r#"[{"name":"b"},{"name":"a","noDetection":true}]"#)
                .unwrap();
        assert_eq!(from_map, from_list);

        let changed =
            parse_role_type_definitions(r#"[{"name":"b"},{"name":"a","noDetection":false}]"#)
                .unwrap();
        assert_ne!(from_map, changed);
    }

    #[test]
    fn object_config_without_types_is_empty() {
        let config = ObjectConfig {
            name: ROLE_OBJECT_CONFIG.to_string(),
            attributes: Map::new(),
        };
        assert!(config.role_type_definitions().unwrap().is_empty());
    }

    #[test]
    fn malformed_types_are_rejected() {
        assert!(parse_role_type_definitions(r#""not a map""#).is_err());
    }

    #[test]
    fn birthright_requires_listing_and_selector_only_assignment() {
        let birthrights = BirthrightRoleTypes::new(["birthright"]);
        let mut def = RoleTypeDefinition::new("birthright");
        assert!(!birthrights.is_birthright(&def), "auto-assignable types are not birthright");

        def.no_auto_assignment = true;
        assert!(birthrights.is_birthright(&def));

        def.no_assignment_selector = true;
        assert!(!birthrights.is_birthright(&def));

        let mut other = RoleTypeDefinition::new("business");
        other.no_auto_assignment = true;
        assert!(!birthrights.is_birthright(&other));
    }

    #[test]
    fn cache_options_from_args() {
        let mut args = Map::new();
        assert_eq!(CacheOptions::from_args(&args).async_cache_refresh, None);
        assert!(CacheOptions::from_args(&args).resolve_async_refresh(true));

        args.insert(ASYNC_CACHE_REFRESH.to_string(), json!("TRUE"));
        assert!(CacheOptions::from_args(&args).resolve_async_refresh(false));

        args.insert(ASYNC_CACHE_REFRESH.to_string(), json!(false));
        assert!(!CacheOptions::from_args(&args).resolve_async_refresh(true));
    }

    #[test]
    fn parse_system_configuration_defaults() {
        let config = parse_system_configuration(r#"{"birthrightRoleTypes":["hr"]}"#).unwrap();
        assert!(!config.async_cache_refresh);
        assert_eq!(config.birthright_role_types, vec!["hr"]);
    }
}
