use std::sync::Arc;

use super::candidates::Candidates;
use super::role::CorrelationRole;
use super::CorrelationModel;
use crate::types::RoleRecord;

/// Looks roles up across both namespaces: persisted roles by id in the
/// model, candidates by name in the overlay. Candidates win.
#[derive(Clone, Copy)]
pub struct RoleResolver<'a> {
    model: &'a CorrelationModel,
    candidates: Option<&'a Candidates>,
}

impl<'a> RoleResolver<'a> {
    pub fn new(model: &'a CorrelationModel, candidates: Option<&'a Candidates>) -> Self {
        Self { model, candidates }
    }

    pub fn candidate(&self, name: &str) -> Option<Arc<CorrelationRole>> {
        self.candidates.and_then(|c| c.candidate(name)).cloned()
    }

    pub fn by_record(&self, record: &RoleRecord) -> Option<Arc<CorrelationRole>> {
        self.candidate(&record.name)
            .or_else(|| record.id.as_deref().and_then(|id| self.model.role(id)))
    }

    /// The candidate shadowing `role`, or `role` itself.
    pub fn effective(&self, role: &Arc<CorrelationRole>) -> Arc<CorrelationRole> {
        self.candidate(role.name()).unwrap_or_else(|| Arc::clone(role))
    }
}
