//! Object store contract consumed by the correlation cache.
//!
//! The cache only reads: full role scans, fetch by id/name, projected
//! searches, counts and configuration lookups. [`memory::InMemoryStore`] is
//! the in-process implementation used for embedding and tests.

pub mod memory;

use serde_json::Value;

use crate::config::{ObjectConfig, RoleTypeDefinitions, SystemConfiguration, ROLE_OBJECT_CONFIG};
use crate::error::{Result, StoreError};
use crate::query::{Filter, ObjectClass, QueryOptions, Row};
use crate::types::{ApplicationInfo, RoleAssignment, RoleRecord, Timestamp};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Read side of the persistence layer.
///
/// Implementations must be safe to call from many evaluation threads.
pub trait ObjectStore: Send + Sync {
    /// Every persisted role.
    fn roles(&self) -> StoreResult<Vec<RoleRecord>>;

    fn role_by_id(&self, id: &str) -> StoreResult<Option<RoleRecord>>;

    fn role_by_name(&self, name: &str) -> StoreResult<Option<RoleRecord>>;

    /// Filtered, ordered, limited search returning projected rows.
    fn search(
        &self,
        class: ObjectClass,
        options: &QueryOptions,
        projection: &[&str],
    ) -> StoreResult<Vec<Row>>;

    fn count(&self, class: ObjectClass, filter: Option<&Filter>) -> StoreResult<usize>;

    fn object_config(&self, name: &str) -> StoreResult<Option<ObjectConfig>>;

    fn system_configuration(&self) -> StoreResult<SystemConfiguration>;
}

/// Most recent value of a role date property (`created` or `modified`).
pub fn latest_role_date(store: &dyn ObjectStore, property: &str) -> StoreResult<Option<Timestamp>> {
    let options = QueryOptions::new()
        .filter(Filter::not_null(property))
        .order_by(property, false)
        .limit(1);

    let rows = store.search(ObjectClass::Role, &options, &[property])?;
    Ok(rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_u64))
}

/// Most recent creation or modification time across all roles.
///
/// `modified` is unset for roles never changed after creation, so both
/// dates have to be consulted.
pub fn last_role_change(store: &dyn ObjectStore) -> StoreResult<Option<Timestamp>> {
    let modified = latest_role_date(store, "modified")?;
    let created = latest_role_date(store, "created")?;
    Ok(match (modified, created) {
        (Some(m), Some(c)) => Some(m.max(c)),
        (m, c) => m.or(c),
    })
}

pub fn count_roles(store: &dyn ObjectStore) -> StoreResult<usize> {
    store.count(ObjectClass::Role, None)
}

/// Role type definitions from the role object config, empty when absent.
pub fn role_type_definitions(store: &dyn ObjectStore) -> Result<RoleTypeDefinitions> {
    match store.object_config(ROLE_OBJECT_CONFIG)? {
        Some(config) => Ok(config.role_type_definitions()?),
        None => Ok(RoleTypeDefinitions::new()),
    }
}

/// Name and profile class of an application without loading the whole record.
pub fn application_info(store: &dyn ObjectStore, app_id: &str) -> StoreResult<Option<ApplicationInfo>> {
    let options = QueryOptions::new().filter(Filter::eq("id", app_id));
    let rows = store.search(ObjectClass::Application, &options, &["name", "profileClass"])?;
    Ok(rows.first().map(|row| ApplicationInfo {
        name: row.first().and_then(Value::as_str).map(str::to_string),
        profile_class: row.get(1).and_then(Value::as_str).map(str::to_string),
    }))
}

/// Role targeted by an assignment, by id when known, else by name.
pub fn assigned_role(store: &dyn ObjectStore, assignment: &RoleAssignment) -> StoreResult<Option<RoleRecord>> {
    if let Some(id) = &assignment.role_id {
        if let Some(role) = store.role_by_id(id)? {
            return Ok(Some(role));
        }
    }
    store.role_by_name(&assignment.role_name)
}
