//! What-if overlay of unsaved roles on top of a published model.
//!
//! Candidates are matched to model roles by name. They see the real roles
//! as their supers, but the model never learns about them: no back-edges,
//! no insertion, and missing supers are skipped instead of loaded.

use std::sync::Arc;

use ahash::AHashMap;

use super::resolver::RoleResolver;
use super::role::{CorrelationRole, LeastSpecificCondition};
use super::CorrelationModel;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::types::RoleRecord;

pub struct Candidates {
    model: Arc<CorrelationModel>,
    full_candidates: Vec<RoleRecord>,
    candidates: Vec<Arc<CorrelationRole>>,
    /// Last candidate registered under each name.
    by_name: AHashMap<String, Arc<CorrelationRole>>,
}

impl Candidates {
    pub fn new(
        store: &dyn ObjectStore,
        model: Arc<CorrelationModel>,
        records: Vec<RoleRecord>,
    ) -> Result<Self> {
        let mut candidates = Vec::with_capacity(records.len());
        let mut by_name = AHashMap::with_capacity(records.len());

        for record in &records {
            let role = Arc::new(CorrelationRole::new(store, record, &model)?);
            role.build_hierarchy(store, &model, false)?;
            by_name.insert(record.name.clone(), Arc::clone(&role));
            candidates.push(role);
        }

        Ok(Self {
            model,
            full_candidates: records,
            candidates,
            by_name,
        })
    }

    pub fn model(&self) -> &Arc<CorrelationModel> {
        &self.model
    }

    pub fn candidates(&self) -> &[Arc<CorrelationRole>] {
        &self.candidates
    }

    pub fn candidate(&self, name: &str) -> Option<&Arc<CorrelationRole>> {
        self.by_name.get(name)
    }

    /// Full record a candidate was built from.
    pub fn full_candidate(&self, name: &str) -> Option<&RoleRecord> {
        self.full_candidates.iter().rev().find(|r| r.name == name)
    }

    pub fn candidate_or_actual(&self, role: &Arc<CorrelationRole>) -> Arc<CorrelationRole> {
        self.resolver().effective(role)
    }

    pub fn candidate_or_actual_record(&self, record: &RoleRecord) -> Option<Arc<CorrelationRole>> {
        self.resolver().by_record(record)
    }

    fn resolver(&self) -> RoleResolver<'_> {
        RoleResolver::new(&self.model, Some(self))
    }

    pub fn super_roles(&self, role: &CorrelationRole) -> Vec<Arc<CorrelationRole>> {
        match self.candidate(role.name()) {
            Some(candidate) => candidate.own_super_roles(),
            None => role.own_super_roles(),
        }
    }

    /// Real subs of the model role with this name, with any candidate
    /// replacing the real role of the same name, plus candidates that
    /// inherit from it.
    pub fn sub_roles(&self, role: &CorrelationRole) -> Vec<Arc<CorrelationRole>> {
        // Candidates carry no back-edges; start from the model role.
        let mut subs = if self.is_candidate(role) {
            self.model
                .role_named(role.name())
                .map(|real| real.own_sub_roles())
                .unwrap_or_default()
        } else {
            role.own_sub_roles()
        };

        for candidate in self.registered() {
            subs.retain(|sub| sub.name() != candidate.name());
            if candidate
                .own_super_roles()
                .iter()
                .any(|sup| sup.name() == role.name())
            {
                subs.push(Arc::clone(candidate));
            }
        }
        subs
    }

    pub fn least_specific_assignables(&self) -> Vec<Arc<CorrelationRole>> {
        self.least_specific(LeastSpecificCondition::Assignable)
    }

    pub fn least_specific_detectables(&self) -> Vec<Arc<CorrelationRole>> {
        self.least_specific(LeastSpecificCondition::Detectable)
    }

    pub fn least_specific_birthrights(&self) -> Vec<Arc<CorrelationRole>> {
        self.least_specific(LeastSpecificCondition::Birthright)
    }

    /// Least-specific roles over the model with candidates overlaid.
    fn least_specific(&self, condition: LeastSpecificCondition) -> Vec<Arc<CorrelationRole>> {
        let mut pool: Vec<_> = self
            .model
            .all_roles()
            .into_iter()
            .filter(|role| !self.by_name.contains_key(role.name()))
            .collect();
        pool.extend(self.registered().cloned());

        pool.into_iter()
            .filter(|role| role.is_least_specific(condition, Some(self)))
            .collect()
    }

    fn is_candidate(&self, role: &CorrelationRole) -> bool {
        self.candidates.iter().any(|c| std::ptr::eq(c.as_ref(), role))
    }

    /// Candidates in registration order, skipping ones shadowed by a later
    /// candidate of the same name.
    fn registered(&self) -> impl Iterator<Item = &Arc<CorrelationRole>> {
        self.candidates.iter().filter(|c| {
            self.by_name
                .get(c.name())
                .is_some_and(|winner| Arc::ptr_eq(winner, c))
        })
    }
}

impl std::fmt::Debug for Candidates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidates")
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}
