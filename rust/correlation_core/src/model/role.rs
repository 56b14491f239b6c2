//! Correlation roles: lightweight snapshots of persisted roles linked into
//! the inheritance graph.
//!
//! Graph edges and memoised closures hold [`Weak`] links: the owning
//! [`CorrelationModel`] (or [`Candidates`] overlay) keeps the strong
//! references, so cyclic role graphs never leak.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};

use super::candidates::Candidates;
use super::CorrelationModel;
use crate::error::Result;
use crate::query::Filter;
use crate::store::ObjectStore;
use crate::types::{IdentitySelector, Permission, ProfileRecord, RoleRecord, RoleRef};

/// Non-owning link between roles.
pub type RoleLink = Weak<CorrelationRole>;

/// Placeholder used when a profile has lost its application reference.
pub const UNKNOWN_APPLICATION: &str = "???";

// ============================================================================
// CorrelationProfile
// ============================================================================

/// Flattened profile: application identity plus the constraints and
/// permissions to match.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationProfile {
    app_id: String,
    app_name: Option<String>,
    app_profile_class: Option<String>,
    constraints: Vec<Filter>,
    permissions: Vec<Permission>,
}

impl CorrelationProfile {
    pub(crate) fn new(
        store: &dyn ObjectStore,
        profile: &ProfileRecord,
        model: &CorrelationModel,
    ) -> Result<Self> {
        let (app_id, app_name, app_profile_class) = match &profile.application {
            Some(app) => {
                let info = model.application_info(store, &app.id)?;
                (app.id.clone(), info.name, info.profile_class)
            }
            None => {
                tracing::warn!("Profile without application reference");
                (
                    UNKNOWN_APPLICATION.to_string(),
                    Some(UNKNOWN_APPLICATION.to_string()),
                    None,
                )
            }
        };

        Ok(Self {
            app_id,
            app_name,
            app_profile_class,
            constraints: profile.constraints.clone(),
            permissions: profile.permissions.clone(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub fn app_profile_class(&self) -> Option<&str> {
        self.app_profile_class.as_deref()
    }

    pub fn constraints(&self) -> &[Filter] {
        &self.constraints
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }
}

// ============================================================================
// Least-specific predicates
// ============================================================================

/// Trait a role must carry to be considered for a least-specific set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeastSpecificCondition {
    Assignable,
    /// Detectable without requiring an assignment.
    Detectable,
    Birthright,
}

impl LeastSpecificCondition {
    pub fn eval(self, role: &CorrelationRole) -> bool {
        match self {
            LeastSpecificCondition::Assignable => role.assignable,
            LeastSpecificCondition::Detectable => role.detectable && !role.assigned_detectable,
            LeastSpecificCondition::Birthright => role.birthright,
        }
    }
}

// ============================================================================
// Hierarchy build status
// ============================================================================

/// Build status of a role's super/sub links.
#[derive(Debug)]
enum HierarchyState {
    /// Holds the inheritance references still to be linked.
    Unbuilt(Vec<RoleRef>),
    Building,
    Built,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyStatus {
    Unbuilt,
    Building,
    Built,
}

// ============================================================================
// CorrelationRole
// ============================================================================

/// In-memory snapshot of one role.
///
/// Equality and hashing use the name only: candidate roles may not have an
/// id yet.
pub struct CorrelationRole {
    id: Option<String>,
    name: String,
    disabled: bool,
    assignment_selector: Option<IdentitySelector>,
    profiles: Vec<CorrelationProfile>,
    or_profiles: bool,
    assignable: bool,
    detectable: bool,
    assigned_detectable: bool,
    birthright: bool,

    hierarchy: Mutex<HierarchyState>,
    /// Roles we inherit from.
    super_roles: RwLock<Vec<RoleLink>>,
    /// Roles that inherit from us.
    sub_roles: RwLock<Vec<RoleLink>>,

    required_permitted: Mutex<Option<Arc<Vec<RoleLink>>>>,
    required_or_permitted_ids: Mutex<Option<Arc<AHashSet<String>>>>,
}

impl CorrelationRole {
    /// Construct a skeleton role; links are filled in by the hierarchy build.
    pub(crate) fn new(
        store: &dyn ObjectStore,
        record: &RoleRecord,
        model: &CorrelationModel,
    ) -> Result<Self> {
        tracing::debug!(role = %record.name, "Loading role");

        let profiles = record
            .profiles
            .iter()
            .map(|p| CorrelationProfile::new(store, p, model))
            .collect::<Result<Vec<_>>>()?;

        // Type-less roles stay detectable for backward compatibility, but
        // assignment always needs a type.
        let (assignable, detectable, assigned_detectable, birthright) =
            match model.role_type(record.role_type.as_deref()) {
                Some(def) => (
                    def.is_assignable(),
                    def.is_detectable(),
                    def.is_detectable_only_if_assigned(),
                    model.is_birthright_type(def),
                ),
                None => (false, true, false, false),
            };

        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            disabled: record.disabled,
            assignment_selector: record.selector.clone(),
            profiles,
            or_profiles: record.or_profiles,
            assignable,
            detectable,
            assigned_detectable,
            birthright,
            hierarchy: Mutex::new(HierarchyState::Unbuilt(record.inheritance.clone())),
            super_roles: RwLock::new(Vec::new()),
            sub_roles: RwLock::new(Vec::new()),
            required_permitted: Mutex::new(None),
            required_or_permitted_ids: Mutex::new(None),
        })
    }

    /// Link this role to its super roles, returning any roles that had to be
    /// added to the model along the way.
    ///
    /// With `allow_model_modification` off (candidate roles) missing supers
    /// are not added and no back-edges are registered on the real supers.
    /// Idempotent: only the first successful call does any work.
    pub(crate) fn build_hierarchy(
        self: &Arc<Self>,
        store: &dyn ObjectStore,
        model: &CorrelationModel,
        allow_model_modification: bool,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        let mut state = self.hierarchy.lock();
        let pending = match std::mem::replace(&mut *state, HierarchyState::Building) {
            HierarchyState::Unbuilt(pending) => pending,
            other => {
                *state = other;
                return Ok(Vec::new());
            }
        };

        // Resolve every super before linking anything so a failed fetch
        // leaves the role unbuilt and retryable.
        let resolved = self.resolve_supers(store, model, &pending, allow_model_modification);
        let (supers, added) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                *state = HierarchyState::Unbuilt(pending);
                return Err(e);
            }
        };

        for sup in &supers {
            self.super_roles.write().push(Arc::downgrade(sup));
            if allow_model_modification {
                sup.sub_roles.write().push(Arc::downgrade(self));
            }
        }

        *state = HierarchyState::Built;
        Ok(added)
    }

    /// Look up each referenced super, loading it into the model when
    /// allowed. Returns the supers found and the roles newly added.
    fn resolve_supers(
        &self,
        store: &dyn ObjectStore,
        model: &CorrelationModel,
        refs: &[RoleRef],
        allow_model_modification: bool,
    ) -> Result<(Vec<Arc<CorrelationRole>>, Vec<Arc<CorrelationRole>>)> {
        let mut supers = Vec::with_capacity(refs.len());
        let mut added = Vec::new();

        for sup in refs {
            let mut resolved = model.role(&sup.id);
            if resolved.is_none() && allow_model_modification {
                if let Some(record) = store.role_by_id(&sup.id)? {
                    let (role, inserted) = model.add_role(store, &record)?;
                    if inserted {
                        added.push(Arc::clone(&role));
                    }
                    resolved = Some(role);
                }
            }

            match resolved {
                Some(role) => supers.push(role),
                None => tracing::error!(role = %self.name, "Missing correlation role: {}", sup.name),
            }
        }

        Ok((supers, added))
    }

    pub fn hierarchy_status(&self) -> HierarchyStatus {
        match *self.hierarchy.lock() {
            HierarchyState::Unbuilt(_) => HierarchyStatus::Unbuilt,
            HierarchyState::Building => HierarchyStatus::Building,
            HierarchyState::Built => HierarchyStatus::Built,
        }
    }

    pub fn is_least_specific_assignable(&self) -> bool {
        self.is_least_specific(LeastSpecificCondition::Assignable, None)
    }

    pub fn is_least_specific_detectable(&self) -> bool {
        self.is_least_specific(LeastSpecificCondition::Detectable, None)
    }

    pub fn is_least_specific_birthright(&self) -> bool {
        self.is_least_specific(LeastSpecificCondition::Birthright, None)
    }

    /// True when this role carries the trait and none of its direct supers
    /// is itself least specific for it.
    pub fn is_least_specific(
        &self,
        condition: LeastSpecificCondition,
        candidates: Option<&Candidates>,
    ) -> bool {
        let mut path = AHashSet::new();
        self.least_specific_on_path(condition, candidates, &mut path)
    }

    /// A role already on the walk (cyclic inheritance) is not least specific.
    fn least_specific_on_path(
        &self,
        condition: LeastSpecificCondition,
        candidates: Option<&Candidates>,
        path: &mut AHashSet<String>,
    ) -> bool {
        if !condition.eval(self) || !path.insert(self.name.clone()) {
            return false;
        }

        let shadowed = self.super_roles(candidates).iter().any(|parent| {
            let parent = match candidates {
                Some(c) => c.candidate_or_actual(parent),
                None => Arc::clone(parent),
            };
            parent.least_specific_on_path(condition, candidates, path)
        });

        path.remove(&self.name);
        !shadowed
    }

    /// Roles required or permitted anywhere along this role's inheritance
    /// chain, computed once and then served from memory. May add roles to
    /// the model. With candidates, members shadowed by a candidate are
    /// swapped for the candidate, and a candidate's own record is walked
    /// fresh on every call.
    pub fn required_and_permitted(
        &self,
        store: &dyn ObjectStore,
        model: &CorrelationModel,
        candidates: Option<&Candidates>,
    ) -> Result<Vec<Arc<CorrelationRole>>> {
        // A candidate is not persisted yet, so its record wins. A closure
        // built from it only holds for that overlay and is not memoised.
        let members = match candidates.and_then(|c| c.full_candidate(&self.name)) {
            Some(record) => Arc::new(collect_required_and_permitted(store, model, record)?),
            None => {
                let mut slot = self.required_permitted.lock();
                match slot.as_ref() {
                    Some(members) => Arc::clone(members),
                    None => {
                        let record = match &self.id {
                            Some(id) => store.role_by_id(id)?,
                            None => None,
                        };
                        let members = match record {
                            Some(record) => collect_required_and_permitted(store, model, &record)?,
                            None => {
                                tracing::warn!(role = %self.name, "Role not found, no required/permitted roles");
                                Vec::new()
                            }
                        };
                        let members = Arc::new(members);
                        *slot = Some(Arc::clone(&members));
                        members
                    }
                }
            }
        };

        Ok(members
            .iter()
            .filter_map(Weak::upgrade)
            .map(|role| match candidates {
                Some(c) => c.candidate_or_actual(&role),
                None => role,
            })
            .collect())
    }

    /// Ids of every role required or permitted by this one.
    ///
    /// Memoised only for lookups without candidates: an overlay can swap a
    /// member for a candidate that has no id yet.
    pub fn required_or_permitted_ids(
        &self,
        store: &dyn ObjectStore,
        model: &CorrelationModel,
        candidates: Option<&Candidates>,
    ) -> Result<Arc<AHashSet<String>>> {
        let mut slot = match candidates {
            Some(_) => None,
            None => Some(self.required_or_permitted_ids.lock()),
        };
        if let Some(Some(ids)) = slot.as_deref() {
            return Ok(Arc::clone(ids));
        }

        let ids: AHashSet<String> = self
            .required_and_permitted(store, model, candidates)?
            .iter()
            .filter_map(|role| role.id.clone())
            .collect();
        let ids = Arc::new(ids);
        if let Some(memo) = slot.as_deref_mut() {
            *memo = Some(Arc::clone(&ids));
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn assignment_selector(&self) -> Option<&IdentitySelector> {
        self.assignment_selector.as_ref()
    }

    pub fn correlation_profiles(&self) -> &[CorrelationProfile] {
        &self.profiles
    }

    pub fn is_or_profiles(&self) -> bool {
        self.or_profiles
    }

    pub fn is_assignable(&self) -> bool {
        self.assignable
    }

    pub fn is_detectable(&self) -> bool {
        self.detectable
    }

    pub fn is_assigned_detectable(&self) -> bool {
        self.assigned_detectable
    }

    pub fn is_birthright(&self) -> bool {
        self.birthright
    }

    /// Effective supers: the candidate overlay decides when supplied.
    ///
    /// Links are weak. Once the owning model is dropped (for instance by
    /// [`CorrelationCache::clear`](crate::CorrelationCache::clear)) they
    /// come back empty, so hold the `Arc<CorrelationModel>` alongside.
    pub fn super_roles(&self, candidates: Option<&Candidates>) -> Vec<Arc<CorrelationRole>> {
        match candidates {
            Some(c) => c.super_roles(self),
            None => self.own_super_roles(),
        }
    }

    /// Effective subs: derived through the candidate overlay when supplied.
    ///
    /// Weak like [`super_roles`](Self::super_roles): empty once the owning
    /// model is gone.
    pub fn sub_roles(&self, candidates: Option<&Candidates>) -> Vec<Arc<CorrelationRole>> {
        match candidates {
            Some(c) => c.sub_roles(self),
            None => self.own_sub_roles(),
        }
    }

    // Raw links, for the model and the overlay only.
    pub(crate) fn own_super_roles(&self) -> Vec<Arc<CorrelationRole>> {
        upgrade_all(&self.super_roles.read())
    }

    pub(crate) fn own_sub_roles(&self) -> Vec<Arc<CorrelationRole>> {
        upgrade_all(&self.sub_roles.read())
    }
}

fn upgrade_all(links: &[RoleLink]) -> Vec<Arc<CorrelationRole>> {
    links.iter().filter_map(Weak::upgrade).collect()
}

impl PartialEq for CorrelationRole {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CorrelationRole {}

impl Hash for CorrelationRole {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for CorrelationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationRole")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("assignable", &self.assignable)
            .field("detectable", &self.detectable)
            .field("assigned_detectable", &self.assigned_detectable)
            .field("birthright", &self.birthright)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Required / permitted closure
// ============================================================================

enum Step {
    /// Walk a role's inheritance, requirements and permits.
    Expand(RoleRef),
    /// Add the listed roles to the closure.
    Register(Vec<RoleRef>),
}

/// Queue the work for one role. The stack is LIFO, so steps are pushed in
/// reverse: supers, then each requirement followed by the requirement list,
/// then each permit followed by the permit list.
fn push_expansion(stack: &mut Vec<Step>, record: &RoleRecord) {
    stack.push(Step::Register(record.permits.clone()));
    stack.extend(record.permits.iter().rev().cloned().map(Step::Expand));
    stack.push(Step::Register(record.requirements.clone()));
    stack.extend(record.requirements.iter().rev().cloned().map(Step::Expand));
    stack.extend(record.inheritance.iter().rev().cloned().map(Step::Expand));
}

/// Depth-first closure over inheritance, requirements and permits.
///
/// `visited` breaks cycles. Only roles with a known role type are
/// registered, the root never appears in its own closure and members are
/// distinct by name.
fn collect_required_and_permitted(
    store: &dyn ObjectStore,
    model: &CorrelationModel,
    root: &RoleRecord,
) -> Result<Vec<RoleLink>> {
    let mut fetched: AHashMap<String, Option<RoleRecord>> = AHashMap::new();
    let mut fetch = |role: &RoleRef| -> Result<Option<RoleRecord>> {
        if let Some(found) = fetched.get(&role.id) {
            return Ok(found.clone());
        }
        let found = store.role_by_id(&role.id)?;
        if found.is_none() {
            tracing::error!("Unresolved role reference: {} ({})", role.name, role.id);
        }
        fetched.insert(role.id.clone(), found.clone());
        Ok(found)
    };

    let mut visited: AHashSet<String> = AHashSet::new();
    if let Some(id) = &root.id {
        visited.insert(id.clone());
    }
    let mut names: AHashSet<String> = AHashSet::new();
    let mut members = Vec::new();

    let mut stack = Vec::new();
    push_expansion(&mut stack, root);

    while let Some(step) = stack.pop() {
        match step {
            Step::Expand(role) => {
                if !visited.insert(role.id.clone()) {
                    continue;
                }
                if let Some(record) = fetch(&role)? {
                    push_expansion(&mut stack, &record);
                }
            }
            Step::Register(roles) => {
                for role in &roles {
                    let Some(record) = fetch(role)? else {
                        continue;
                    };
                    if model.role_type(record.role_type.as_deref()).is_none() {
                        continue;
                    }
                    if record.name == root.name || !names.insert(record.name.clone()) {
                        continue;
                    }
                    // Taken from the real model; candidates are swapped in
                    // by the caller.
                    let member = model.resolve_role(store, &record)?;
                    members.push(Arc::downgrade(&member));
                }
            }
        }
    }

    Ok(members)
}
