//! Correlation cache: owns the published [`CorrelationModel`] and decides
//! when to rebuild it.
//!
//! One instance is shared by every evaluation thread. The published model is
//! held in an [`ArcSwapOption`], so readers never block and a rebuild only
//! replaces the slot once the new model is complete. Rebuilds are serialised
//! by a single mutex; [`CorrelationCache::clear`] does not take it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::config::CacheOptions;
use crate::error::{CorrelationError, Result};
use crate::model::CorrelationModel;
use crate::store::ObjectStore;

// ============================================================================
// ActiveSignal
// ============================================================================

/// Shared "system is active" flag. Builds stop between roles once it drops,
/// and no new builds start.
#[derive(Debug, Clone)]
pub struct ActiveSignal(Arc<AtomicBool>);

impl ActiveSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for ActiveSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Counters for test and diagnostic use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Rebuilds started.
    pub cache_loads: u64,
    /// Lookups made in async-refresh mode.
    pub async_refresh_requests: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_loads: AtomicU64,
    async_refresh_requests: AtomicU64,
}

// ============================================================================
// CorrelationCache
// ============================================================================

#[derive(Debug)]
pub struct CorrelationCache {
    current: ArcSwapOption<CorrelationModel>,
    rebuild_lock: Mutex<()>,
    birthright_role_types_changed: AtomicBool,
    active: ActiveSignal,
    counters: Counters,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::with_signal(ActiveSignal::new())
    }

    pub fn with_signal(active: ActiveSignal) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            rebuild_lock: Mutex::new(()),
            birthright_role_types_changed: AtomicBool::new(false),
            active,
            counters: Counters::default(),
        }
    }

    pub fn active_signal(&self) -> &ActiveSignal {
        &self.active
    }

    /// Current model, rebuilding it first unless async refresh is enabled
    /// and a model is already published.
    ///
    /// In async mode the published model is returned even if stale; a
    /// background caller is expected to run [`refresh`](Self::refresh).
    pub fn correlation_model(
        &self,
        store: &dyn ObjectStore,
        options: Option<&CacheOptions>,
    ) -> Result<Arc<CorrelationModel>> {
        let global = store.system_configuration()?.async_cache_refresh;
        let async_refresh = options.map_or(global, |o| o.resolve_async_refresh(global));

        if async_refresh {
            self.counters
                .async_refresh_requests
                .fetch_add(1, Ordering::Relaxed);
            if let Some(model) = self.current.load_full() {
                return Ok(model);
            }
        }

        self.refresh(store)?.ok_or(CorrelationError::Inactive)
    }

    /// Rebuild the model when none is published or the published one is
    /// stale. Returns the model published afterwards.
    ///
    /// Nothing is rebuilt while the system is inactive. A failed build
    /// leaves the previous model in place and returns the error; a build
    /// aborted by shutdown falls back to the previous model when there is
    /// one.
    pub fn refresh(&self, store: &dyn ObjectStore) -> Result<Option<Arc<CorrelationModel>>> {
        let _guard = self.rebuild_lock.lock();

        let current = self.current.load_full();
        if !self.active.is_active() {
            return Ok(current);
        }

        let stale = match &current {
            Some(model) => {
                model.is_stale(store, self.birthright_role_types_changed.load(Ordering::SeqCst))?
            }
            None => true,
        };
        if !stale {
            return Ok(current);
        }

        self.counters.cache_loads.fetch_add(1, Ordering::Relaxed);
        let birthright_flag = self.birthright_role_types_changed.swap(false, Ordering::SeqCst);

        match CorrelationModel::prepare(store, &self.active) {
            Ok(model) => {
                let model = Arc::new(model);
                self.current.store(Some(Arc::clone(&model)));
                tracing::info!(roles = model.size(), "Correlation model published");
                Ok(Some(model))
            }
            Err(e) => {
                if birthright_flag {
                    self.birthright_role_types_changed.store(true, Ordering::SeqCst);
                }
                if matches!(e, CorrelationError::Aborted { .. }) && current.is_some() {
                    tracing::warn!(error = %e, "Keeping previous correlation model");
                    return Ok(current);
                }
                tracing::error!(error = %e, "Correlation model build failed");
                Err(e)
            }
        }
    }

    /// Rebuild regardless of staleness: drops the published model so the
    /// next [`correlation_model`](Self::correlation_model) call rebuilds.
    /// Never waits on a rebuild already in flight.
    pub fn force_refresh(&self) {
        self.clear();
        tracing::info!("Correlation model refresh forced");
    }

    /// Whether the published model (if any) needs a rebuild.
    pub fn is_stale(&self, store: &dyn ObjectStore) -> Result<bool> {
        match self.current.load_full() {
            Some(model) => model.is_stale(
                store,
                self.birthright_role_types_changed.load(Ordering::SeqCst),
            ),
            None => Ok(true),
        }
    }

    /// Drop the published model. Holders of the old model keep using it.
    pub fn clear(&self) {
        self.current.store(None);
        tracing::debug!("Correlation model cleared");
    }

    pub fn current(&self) -> Option<Arc<CorrelationModel>> {
        self.current.load_full()
    }

    /// Mark birthright role types as changed; the next refresh rebuilds.
    pub fn set_birthright_role_types_changed(&self, changed: bool) {
        self.birthright_role_types_changed
            .store(changed, Ordering::SeqCst);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cache_loads: self.counters.cache_loads.load(Ordering::Relaxed),
            async_refresh_requests: self.counters.async_refresh_requests.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.cache_loads.store(0, Ordering::Relaxed);
        self.counters.async_refresh_requests.store(0, Ordering::Relaxed);
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new()
    }
}
