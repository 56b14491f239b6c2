//! Correlation model: the in-memory role graph used during evaluation.
//!
//! A model is built once from a full scan of the object store and then read
//! by many evaluation threads. Roles the scan did not see (created since, or
//! reached through references) are added on demand; additions are the only
//! mutation a published model ever sees.
//!
//! # Build
//!
//! [`CorrelationModel::prepare`] runs three passes:
//!
//! 1. construct a [`CorrelationRole`] per persisted role
//! 2. link inheritance edges, adding any missing super roles
//! 3. classify roles into the least-specific assignable, detectable and
//!    birthright sets
//!
//! The build checks an [`ActiveSignal`] between roles and bails out with
//! [`CorrelationError::Aborted`] on shutdown.

mod candidates;
mod resolver;
mod role;

#[cfg(test)]
mod tests;

pub use candidates::Candidates;
pub use resolver::RoleResolver;
pub use role::{
    CorrelationProfile, CorrelationRole, HierarchyStatus, LeastSpecificCondition, RoleLink,
    UNKNOWN_APPLICATION,
};

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::cache::ActiveSignal;
use crate::config::{BirthrightRoleTypes, RoleTypeDefinition, RoleTypeDefinitions};
use crate::error::{CorrelationError, Result};
use crate::store::{self, ObjectStore};
use crate::types::{ApplicationInfo, RoleAssignment, RoleRecord, Timestamp};

pub struct CorrelationModel {
    /// Persisted roles by id.
    roles: RwLock<AHashMap<String, Arc<CorrelationRole>>>,
    /// Serialises on-demand additions; readers only take `roles`.
    add_lock: Mutex<()>,
    applications: DashMap<String, ApplicationInfo>,

    role_types: RoleTypeDefinitions,
    birthright_types: BirthrightRoleTypes,

    least_specific_assignables: Vec<Arc<CorrelationRole>>,
    least_specific_detectables: Vec<Arc<CorrelationRole>>,
    least_specific_birthrights: Vec<Arc<CorrelationRole>>,

    // Fingerprint taken before the scan, so changes racing the build make
    // the next staleness check fail.
    cache_last_mod: Option<Timestamp>,
    cache_num_roles: usize,
}

impl CorrelationModel {
    fn empty(
        role_types: RoleTypeDefinitions,
        birthright_types: BirthrightRoleTypes,
        cache_last_mod: Option<Timestamp>,
        cache_num_roles: usize,
    ) -> Self {
        Self {
            roles: RwLock::new(AHashMap::new()),
            add_lock: Mutex::new(()),
            applications: DashMap::new(),
            role_types,
            birthright_types,
            least_specific_assignables: Vec::new(),
            least_specific_detectables: Vec::new(),
            least_specific_birthrights: Vec::new(),
            cache_last_mod,
            cache_num_roles,
        }
    }

    /// Build a complete model from the store.
    pub fn prepare(store: &dyn ObjectStore, active: &ActiveSignal) -> Result<Self> {
        let role_types = store::role_type_definitions(store)?;
        let system = store.system_configuration()?;
        let birthright_types = BirthrightRoleTypes::new(system.birthright_role_types);

        let cache_last_mod = store::last_role_change(store)?;
        let cache_num_roles = store::count_roles(store)?;

        let mut model = Self::empty(role_types, birthright_types, cache_last_mod, cache_num_roles);

        let records = store.roles()?;
        let total = records.len();
        tracing::info!(roles = total, "Preparing correlation model");

        // Pass 1: construct
        let mut loaded = Vec::with_capacity(total);
        for record in &records {
            if !active.is_active() {
                tracing::warn!(loaded = loaded.len(), total, "Correlation model build aborted");
                return Err(CorrelationError::Aborted {
                    loaded: loaded.len(),
                    total,
                });
            }
            if record.id.is_none() {
                tracing::error!(role = %record.name, "Skipping persisted role without id");
                continue;
            }
            let (role, _) = model.add_role(store, record)?;
            loaded.push(role);
        }

        // Pass 2: link
        let discovered = model.link_hierarchy(store, loaded.clone(), Some(active))?;
        loaded.extend(discovered);

        // Pass 3: classify
        for role in &loaded {
            if role.is_least_specific_assignable() {
                model.least_specific_assignables.push(Arc::clone(role));
            }
            if role.is_least_specific_detectable() {
                model.least_specific_detectables.push(Arc::clone(role));
            }
            if role.is_least_specific_birthright() {
                model.least_specific_birthrights.push(Arc::clone(role));
            }
        }

        model.log_stats();
        Ok(model)
    }

    /// Build the hierarchy of each role, and of every role the builds add.
    /// Returns the added roles.
    fn link_hierarchy(
        &self,
        store: &dyn ObjectStore,
        roles: Vec<Arc<CorrelationRole>>,
        active: Option<&ActiveSignal>,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let total = self.size();
        let mut discovered = Vec::new();
        let mut pending = roles;
        pending.reverse();

        while let Some(role) = pending.pop() {
            if let Some(active) = active {
                if !active.is_active() {
                    return Err(CorrelationError::Aborted {
                        loaded: self.size(),
                        total,
                    });
                }
            }
            let added = role.build_hierarchy(store, self, true)?;
            pending.extend(added.iter().rev().cloned());
            discovered.extend(added);
        }

        Ok(discovered)
    }

    /// Get-or-insert a skeleton role for a persisted record. The flag is
    /// true when this call inserted it. Concurrent callers for the same id
    /// all receive the same instance.
    pub(crate) fn add_role(
        &self,
        store: &dyn ObjectStore,
        record: &RoleRecord,
    ) -> Result<(Arc<CorrelationRole>, bool)> {
        let id = record
            .id
            .as_deref()
            .ok_or_else(|| CorrelationError::UnsavedRole(record.name.clone()))?;

        let _guard = self.add_lock.lock();
        if let Some(existing) = self.role(id) {
            return Ok((existing, false));
        }

        let role = Arc::new(CorrelationRole::new(store, record, self)?);
        self.roles.write().insert(id.to_string(), Arc::clone(&role));
        Ok((role, true))
    }

    /// Model role for a persisted record, adding it and linking its
    /// hierarchy when the model has not seen it yet.
    pub fn resolve_role(
        &self,
        store: &dyn ObjectStore,
        record: &RoleRecord,
    ) -> Result<Arc<CorrelationRole>> {
        let (role, _) = self.add_role(store, record)?;
        // A no-op once built; a concurrent builder holds the role's lock
        // until its links are in place.
        self.link_hierarchy(store, vec![Arc::clone(&role)], None)?;
        Ok(role)
    }

    pub(crate) fn is_stale(&self, store: &dyn ObjectStore, birthright_types_changed: bool) -> Result<bool> {
        let last_mod = store::last_role_change(store)?;
        if last_mod != self.cache_last_mod {
            tracing::info!(
                cached = ?self.cache_last_mod,
                current = ?last_mod,
                "Correlation model stale: role modification date changed"
            );
            return Ok(true);
        }

        let num_roles = store::count_roles(store)?;
        if num_roles != self.cache_num_roles {
            tracing::info!(
                cached = self.cache_num_roles,
                current = num_roles,
                "Correlation model stale: role count changed"
            );
            return Ok(true);
        }

        if store::role_type_definitions(store)? != self.role_types {
            tracing::info!("Correlation model stale: role type definitions changed");
            return Ok(true);
        }

        if birthright_types_changed {
            tracing::info!("Correlation model stale: birthright role types changed");
            return Ok(true);
        }

        Ok(false)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn role(&self, id: &str) -> Option<Arc<CorrelationRole>> {
        self.roles.read().get(id).cloned()
    }

    /// Model role with this name, if any.
    pub(crate) fn role_named(&self, name: &str) -> Option<Arc<CorrelationRole>> {
        self.roles.read().values().find(|r| r.name() == name).cloned()
    }

    /// Number of roles currently in the model.
    pub fn size(&self) -> usize {
        self.roles.read().len()
    }

    /// Every role in the model, ordered by name.
    pub fn all_roles(&self) -> Vec<Arc<CorrelationRole>> {
        let mut roles: Vec<_> = self.roles.read().values().cloned().collect();
        roles.sort_by(|a, b| a.name().cmp(b.name()));
        roles
    }

    pub fn cache_num_roles(&self) -> usize {
        self.cache_num_roles
    }

    pub fn cache_last_mod(&self) -> Option<Timestamp> {
        self.cache_last_mod
    }

    pub fn role_types(&self) -> &RoleTypeDefinitions {
        &self.role_types
    }

    pub fn role_type(&self, name: Option<&str>) -> Option<&RoleTypeDefinition> {
        self.role_types.get(name)
    }

    pub fn birthright_role_types(&self) -> &BirthrightRoleTypes {
        &self.birthright_types
    }

    pub(crate) fn is_birthright_type(&self, role_type: &RoleTypeDefinition) -> bool {
        self.birthright_types.is_birthright(role_type)
    }

    /// Name and profile class of an application, fetched once per model.
    /// Unknown applications resolve to an empty entry.
    pub fn application_info(&self, store: &dyn ObjectStore, app_id: &str) -> Result<ApplicationInfo> {
        if let Some(info) = self.applications.get(app_id) {
            return Ok(info.clone());
        }

        let info = store::application_info(store, app_id)?.unwrap_or_else(|| {
            tracing::warn!(app_id, "Application not found");
            ApplicationInfo::default()
        });
        Ok(self
            .applications
            .entry(app_id.to_string())
            .or_insert(info)
            .clone())
    }

    pub fn resolver<'a>(&'a self, candidates: Option<&'a Candidates>) -> RoleResolver<'a> {
        RoleResolver::new(self, candidates)
    }

    /// Candidate or model role for a record; `None` when neither knows it.
    pub fn correlation_role(
        &self,
        record: &RoleRecord,
        candidates: Option<&Candidates>,
    ) -> Option<Arc<CorrelationRole>> {
        self.resolver(candidates).by_record(record)
    }

    // ------------------------------------------------------------------
    // Least-specific sets
    // ------------------------------------------------------------------

    pub fn assignable_roles(&self, candidates: Option<&Candidates>) -> Vec<Arc<CorrelationRole>> {
        match candidates {
            Some(c) => c.least_specific_assignables(),
            None => self.least_specific_assignables.clone(),
        }
    }

    pub fn detectable_roles(&self, candidates: Option<&Candidates>) -> Vec<Arc<CorrelationRole>> {
        match candidates {
            Some(c) => c.least_specific_detectables(),
            None => self.least_specific_detectables.clone(),
        }
    }

    pub fn birthright_roles(&self, candidates: Option<&Candidates>) -> Vec<Arc<CorrelationRole>> {
        match candidates {
            Some(c) => c.least_specific_birthrights(),
            None => self.least_specific_birthrights.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Assignment-driven queries
    // ------------------------------------------------------------------

    /// Roles that may be detected because of an assignment: detectable
    /// required/permitted roles, the assigned role itself and its
    /// detectable ancestors.
    pub fn detectable_roles_for_assignment(
        &self,
        store: &dyn ObjectStore,
        assignment: &RoleAssignment,
        candidates: Option<&Candidates>,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let Some(assigned) = store::assigned_role(store, assignment)? else {
            tracing::error!(role = %assignment.role_name, "Unable to resolve assigned role");
            return Ok(Vec::new());
        };

        let mut roles: Vec<_> = self
            .required_and_permitted_for_record(store, &assigned, candidates)?
            .into_iter()
            .filter(|role| role.is_detectable() || role.is_assigned_detectable())
            .collect();

        roles.extend(self.inherited_detectables(store, &assigned, candidates)?);
        Ok(distinct_roles(roles))
    }

    /// The role and its ancestors that are detectable, supers first.
    pub fn inherited_detectables(
        &self,
        store: &dyn ObjectStore,
        role: &RoleRecord,
        candidates: Option<&Candidates>,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let mut found = Vec::new();
        let mut visited = AHashSet::new();
        self.collect_inherited_detectables(store, role, candidates, &mut visited, &mut found)?;
        Ok(found)
    }

    fn collect_inherited_detectables(
        &self,
        store: &dyn ObjectStore,
        role: &RoleRecord,
        candidates: Option<&Candidates>,
        visited: &mut AHashSet<String>,
        found: &mut Vec<Arc<CorrelationRole>>,
    ) -> Result<()> {
        if !visited.insert(role.name.clone()) {
            return Ok(());
        }

        for sup in &role.inheritance {
            match store.role_by_id(&sup.id)? {
                Some(record) => {
                    self.collect_inherited_detectables(store, &record, candidates, visited, found)?
                }
                None => tracing::error!("Missing correlation role: {}", sup.name),
            }
        }

        match self.correlation_role(role, candidates) {
            Some(existing) if existing.is_detectable() => found.push(existing),
            Some(_) => {}
            None if self.record_is_detectable(role) && role.id.is_some() => {
                found.push(self.resolve_role(store, role)?);
            }
            None => {}
        }
        Ok(())
    }

    fn record_is_detectable(&self, record: &RoleRecord) -> bool {
        self.role_type(record.role_type.as_deref())
            .map_or(true, RoleTypeDefinition::is_detectable)
    }

    /// Model roles for persisted records, loading any the model lacks.
    pub fn correlation_roles(
        &self,
        store: &dyn ObjectStore,
        records: &[RoleRecord],
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let mut roles = Vec::with_capacity(records.len());
        for record in records {
            let known = record.id.as_deref().and_then(|id| self.role(id));
            match known {
                Some(role) => roles.push(role),
                None => {
                    tracing::error!(role = %record.name, "Role missing from correlation model, loading");
                    roles.push(self.resolve_role(store, record)?);
                }
            }
        }
        Ok(distinct_roles(roles))
    }

    /// Required and permitted roles of a persisted role; empty when the id
    /// is unknown to both the model and the store.
    pub fn required_and_permitted_for_role_id(
        &self,
        store: &dyn ObjectStore,
        role_id: &str,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let role = match self.role(role_id) {
            Some(role) => role,
            None => match store.role_by_id(role_id)? {
                Some(record) => self.resolve_role(store, &record)?,
                None => {
                    tracing::warn!(role_id, "Role not found");
                    return Ok(Vec::new());
                }
            },
        };
        Ok(distinct_roles(role.required_and_permitted(store, self, None)?))
    }

    fn required_and_permitted_for_record(
        &self,
        store: &dyn ObjectStore,
        record: &RoleRecord,
        candidates: Option<&Candidates>,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let role = match self.correlation_role(record, candidates) {
            Some(role) => role,
            None => self.resolve_role(store, record)?,
        };
        Ok(distinct_roles(role.required_and_permitted(store, self, candidates)?))
    }

    /// Current record for a role: the candidate's own record when it is
    /// one, otherwise a fresh fetch by id.
    pub fn fresh_role(
        &self,
        store: &dyn ObjectStore,
        role: &CorrelationRole,
        candidates: Option<&Candidates>,
    ) -> Result<Option<RoleRecord>> {
        if let Some(record) = candidates.and_then(|c| c.full_candidate(role.name())) {
            return Ok(Some(record.clone()));
        }
        match role.id() {
            Some(id) => Ok(store.role_by_id(id)?),
            None => Ok(None),
        }
    }

    pub fn log_stats(&self) {
        tracing::info!(
            roles = self.size(),
            cached_roles = self.cache_num_roles,
            applications = self.applications.len(),
            assignables = self.least_specific_assignables.len(),
            detectables = self.least_specific_detectables.len(),
            birthrights = self.least_specific_birthrights.len(),
            "Correlation model stats"
        );
    }
}

impl std::fmt::Debug for CorrelationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationModel")
            .field("roles", &self.size())
            .field("cache_num_roles", &self.cache_num_roles)
            .field("cache_last_mod", &self.cache_last_mod)
            .finish_non_exhaustive()
    }
}

/// Drop later duplicates by name, keeping first-seen order.
pub(crate) fn distinct_roles(roles: Vec<Arc<CorrelationRole>>) -> Vec<Arc<CorrelationRole>> {
    let mut seen = AHashSet::with_capacity(roles.len());
    roles
        .into_iter()
        .filter(|role| seen.insert(role.name().to_string()))
        .collect()
}
