use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::errors::StoreResult;
use crate::domain::models::Plan;
use crate::domain::ports::{PlanStorage, StorageGuard};

/// Process-local plan storage.
///
/// The lock is an in-memory flag, so several task stores sharing one
/// instance exclude each other the same way they would over a file.
#[derive(Debug, Default)]
pub struct InMemoryPlanStorage {
    plan: Mutex<Option<Plan>>,
    locked: Arc<AtomicBool>,
}

/// Clears the lock flag on drop.
struct HeldFlag(Arc<AtomicBool>);

impl Drop for HeldFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InMemoryPlanStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(plan: Plan) -> Self {
        Self {
            plan: Mutex::new(Some(plan)),
            locked: Arc::default(),
        }
    }
}

impl PlanStorage for InMemoryPlanStorage {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn try_lock(&self) -> StoreResult<Option<StorageGuard>> {
        let acquired = self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        Ok(acquired.then(|| StorageGuard::holding(HeldFlag(Arc::clone(&self.locked)))))
    }

    fn load(&self) -> StoreResult<Option<Plan>> {
        Ok(self
            .plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, plan: &Plan) -> StoreResult<()> {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = Some(plan.clone());
        Ok(())
    }

    fn remove(&self) -> StoreResult<()> {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
