use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of users currently inside the merge pipeline.
///
/// Membership is taken with a single atomic check-and-set, so two
/// simultaneous triggers for the same user cannot both enter.
#[derive(Debug, Default)]
pub struct ActiveTasks {
    inner: Mutex<HashSet<i64>>,
}

impl ActiveTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically check membership and insert. Returns a slot guard on
    /// success, `None` when the user already holds one.
    pub fn try_acquire(self: &Arc<Self>, user_id: i64) -> Option<TaskSlot> {
        let mut active = self.lock();
        if !active.insert(user_id) {
            return None;
        }
        Some(TaskSlot {
            user_id,
            registry: Arc::clone(self),
        })
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        self.lock().contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, user_id: i64) {
        self.lock().remove(&user_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.inner.lock().expect("active task registry lock poisoned")
    }
}

/// Exclusive per-user pipeline slot.
///
/// Dropping the guard releases the slot, which makes release unconditional
/// on every exit path out of the pipeline.
#[derive(Debug)]
pub struct TaskSlot {
    user_id: i64,
    registry: Arc<ActiveTasks>,
}

impl TaskSlot {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.registry.release(self.user_id);
    }
}
