//! Domain records read from the object store.

use serde::{Deserialize, Serialize};

use crate::query::Filter;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Reference from one role to another persisted role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: String,
    pub name: String,
}

impl RoleRef {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

/// Reference from a profile to the application it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub id: String,
}

/// Right(s) on a target granted by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub target: String,
    #[serde(default)]
    pub rights: Vec<String>,
}

/// Entitlement profile of a role on one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub application: Option<ApplicationRef>,
    #[serde(default)]
    pub constraints: Vec<Filter>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Assignment selector attached to a role. Carried as an opaque snapshot;
/// selector evaluation happens outside the correlation cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySelector {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub population: Option<String>,
}

/// Persisted role ("Bundle").
///
/// `id` is `None` for roles that have never been saved, which only happens
/// for what-if candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, rename = "type")]
    pub role_type: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub selector: Option<IdentitySelector>,
    #[serde(default)]
    pub profiles: Vec<ProfileRecord>,
    #[serde(default)]
    pub or_profiles: bool,
    /// Roles this role inherits from.
    #[serde(default)]
    pub inheritance: Vec<RoleRef>,
    #[serde(default)]
    pub requirements: Vec<RoleRef>,
    #[serde(default)]
    pub permits: Vec<RoleRef>,
    #[serde(default)]
    pub created: Option<Timestamp>,
    #[serde(default)]
    pub modified: Option<Timestamp>,
}

impl RoleRecord {
    /// Minimal persisted role with the given id, name and type.
    pub fn new(id: &str, name: &str, role_type: Option<&str>) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            role_type: role_type.map(str::to_string),
            ..Default::default()
        }
    }

    /// Reference to this role, if it has been persisted.
    pub fn to_ref(&self) -> Option<RoleRef> {
        self.id.as_ref().map(|id| RoleRef {
            id: id.clone(),
            name: self.name.clone(),
        })
    }
}

/// Persisted application, queried only through projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile_class: Option<String>,
}

/// Role assignment on an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    #[serde(default)]
    pub role_id: Option<String>,
    pub role_name: String,
}

impl RoleAssignment {
    pub fn new(role_id: Option<&str>, role_name: &str) -> Self {
        Self {
            role_id: role_id.map(str::to_string),
            role_name: role_name.to_string(),
        }
    }
}

/// Lightweight projection of an application used by correlation profiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub name: Option<String>,
    pub profile_class: Option<String>,
}
