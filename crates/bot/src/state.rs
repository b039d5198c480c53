use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::registry::ActiveTasks;
use crate::session::SessionStore;

/// State shared between the intake handlers, the admin commands, and the
/// orchestrator.
pub struct SharedState {
    pub sessions: SessionStore,
    pub active: Arc<ActiveTasks>,
    /// Checked once per task, before slot acquisition. Tasks already admitted
    /// run to completion after a toggle.
    maintenance: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionStore::new(),
            active: ActiveTasks::new(),
            maintenance: AtomicBool::new(false),
        })
    }

    pub fn maintenance_enabled(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    /// Flip the flag and return the new value.
    pub fn toggle_maintenance(&self) -> bool {
        !self.maintenance.fetch_xor(true, Ordering::Relaxed)
    }
}
