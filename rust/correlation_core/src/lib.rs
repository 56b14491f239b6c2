//! `correlation_core`: shared role correlation cache.
//!
//! Builds an in-memory snapshot of the role graph from an object store and
//! serves it to concurrent evaluation threads: inheritance links, the
//! least-specific assignable/detectable/birthright roles, required and
//! permitted closures, and what-if overlays of unsaved candidate roles.
//!
//! Modules:
//! - `cache`: process-wide cache service, staleness and rebuilds
//! - `model`: correlation model, roles, candidates
//! - `store`: object store contract + in-memory store
//! - `query`: filters and query options used by the store
//! - `config`: role type definitions, system configuration, per-call options
//! - `types`: persisted records
//! - `error`: error types

pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod store;
pub mod types;

pub use cache::{ActiveSignal, CacheStats, CorrelationCache};
pub use error::{CorrelationError, Result, StoreError};
pub use model::{Candidates, CorrelationModel, CorrelationRole};
