//! Shared application state passed to every HTTP handler: the Store
//! (serializable by transaction) and the in-memory job-status cache
//! (owned by the monitor — other readers snapshot it via a read API
//! that returns a copy or derives freshly from the Store).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crab_core::model::{CurrentState, JobRef};
use crab_notify::NotificationEngine;
use crab_store::JobStore;

use crate::config::Config;

/// The monitor's soft in-memory status cache — losing it costs at
/// most one tick of redundant work. `RwLock` because query-API
/// snapshot reads vastly outnumber the single monitor writer.
#[derive(Default)]
pub struct StatusCache {
    inner: RwLock<HashMap<JobRef, CurrentState>>,
}

impl StatusCache {
    pub fn get(&self, job_ref: JobRef) -> Option<CurrentState> {
        self.inner.read().get(&job_ref).copied()
    }

    pub fn set(&self, job_ref: JobRef, state: CurrentState) {
        self.inner.write().insert(job_ref, state);
    }

    pub fn snapshot(&self) -> HashMap<JobRef, CurrentState> {
        self.inner.read().clone()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn JobStore>,
    pub notify: Arc<NotificationEngine>,
    pub status_cache: Arc<StatusCache>,
}
