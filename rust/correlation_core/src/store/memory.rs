//! In-memory object store.
//!
//! Records are kept as typed values and projected to JSON for searches, so
//! every [`Filter`] works the same as it would against a real backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{ObjectStore, StoreResult};
use crate::config::{
    ObjectConfig, RoleTypeDefinition, RoleTypeDefinitions, SystemConfiguration,
    ATT_ROLE_TYPE_DEFINITIONS, ROLE_OBJECT_CONFIG,
};
use crate::error::StoreError;
use crate::query::{Filter, ObjectClass, QueryOptions, Row};
use crate::types::{ApplicationRecord, RoleRecord};

/// Counters describing how the store has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub role_scans: u64,
    pub role_fetches: u64,
    pub searches: u64,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    roles: RwLock<BTreeMap<String, RoleRecord>>,
    applications: RwLock<BTreeMap<String, ApplicationRecord>>,
    object_configs: RwLock<BTreeMap<String, ObjectConfig>>,
    system: RwLock<SystemConfiguration>,
    unavailable: AtomicBool,
    next_id: AtomicU64,
    role_scans: AtomicU64,
    role_fetches: AtomicU64,
    searches: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a role. Roles without an id get a generated one,
    /// which is returned.
    pub fn save_role(&self, mut role: RoleRecord) -> String {
        let id = match &role.id {
            Some(id) => id.clone(),
            None => {
                let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let id = format!("role-{n}");
                role.id = Some(id.clone());
                id
            }
        };
        self.roles.write().insert(id.clone(), role);
        id
    }

    pub fn remove_role(&self, id: &str) -> Option<RoleRecord> {
        self.roles.write().remove(id)
    }

    pub fn save_application(&self, app: ApplicationRecord) {
        self.applications.write().insert(app.id.clone(), app);
    }

    pub fn save_object_config(&self, config: ObjectConfig) {
        self.object_configs.write().insert(config.name.clone(), config);
    }

    /// Store role type definitions in list form in the role object config.
    pub fn set_role_types(&self, types: impl IntoIterator<Item = RoleTypeDefinition>) {
        let list: Vec<Value> = types
            .into_iter()
            .filter_map(|def| serde_json::to_value(def).ok())
            .collect();
        let mut attributes = Map::new();
        attributes.insert(ATT_ROLE_TYPE_DEFINITIONS.to_string(), Value::Array(list));
        self.save_object_config(ObjectConfig {
            name: ROLE_OBJECT_CONFIG.to_string(),
            attributes,
        });
    }

    pub fn role_types(&self) -> RoleTypeDefinitions {
        self.object_configs
            .read()
            .get(ROLE_OBJECT_CONFIG)
            .and_then(|c| c.role_type_definitions().ok())
            .unwrap_or_default()
    }

    pub fn set_system_configuration(&self, config: SystemConfiguration) {
        *self.system.write() = config;
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            role_scans: self.role_scans.load(Ordering::Relaxed),
            role_fetches: self.role_fetches.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn project<T: Serialize>(records: impl Iterator<Item = T>) -> StoreResult<Vec<Value>> {
        records
            .map(|r| serde_json::to_value(r).map_err(StoreError::from))
            .collect()
    }

    fn objects(&self, class: ObjectClass) -> StoreResult<Vec<Value>> {
        match class {
            ObjectClass::Role => Self::project(self.roles.read().values()),
            ObjectClass::Application => Self::project(self.applications.read().values()),
        }
    }
}

impl ObjectStore for InMemoryStore {
    fn roles(&self) -> StoreResult<Vec<RoleRecord>> {
        self.check_available()?;
        self.role_scans.fetch_add(1, Ordering::Relaxed);
        Ok(self.roles.read().values().cloned().collect())
    }

    fn role_by_id(&self, id: &str) -> StoreResult<Option<RoleRecord>> {
        self.check_available()?;
        self.role_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.roles.read().get(id).cloned())
    }

    fn role_by_name(&self, name: &str) -> StoreResult<Option<RoleRecord>> {
        self.check_available()?;
        self.role_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.roles.read().values().find(|r| r.name == name).cloned())
    }

    fn search(
        &self,
        class: ObjectClass,
        options: &QueryOptions,
        projection: &[&str],
    ) -> StoreResult<Vec<Row>> {
        self.check_available()?;
        self.searches.fetch_add(1, Ordering::Relaxed);
        Ok(options.execute(self.objects(class)?, projection))
    }

    fn count(&self, class: ObjectClass, filter: Option<&Filter>) -> StoreResult<usize> {
        self.check_available()?;
        let objects = self.objects(class)?;
        Ok(match filter {
            Some(f) => objects.iter().filter(|o| f.matches(o)).count(),
            None => objects.len(),
        })
    }

    fn object_config(&self, name: &str) -> StoreResult<Option<ObjectConfig>> {
        self.check_available()?;
        Ok(self.object_configs.read().get(name).cloned())
    }

    fn system_configuration(&self) -> StoreResult<SystemConfiguration> {
        self.check_available()?;
        Ok(self.system.read().clone())
    }
}
