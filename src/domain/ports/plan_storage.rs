use crate::domain::errors::StoreResult;
use crate::domain::models::Plan;

/// Exclusive hold on a plan store. The lock is released when dropped.
pub struct StorageGuard {
    _release: Option<Box<dyn Send + Sync>>,
}

impl StorageGuard {
    /// Guard that drops `handle` when released.
    pub fn holding<H: Send + Sync + 'static>(handle: H) -> Self {
        Self {
            _release: Some(Box::new(handle)),
        }
    }
}

impl std::fmt::Debug for StorageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGuard")
            .field("held", &self._release.is_some())
            .finish()
    }
}

/// Lockable document store holding a single plan.
///
/// Callers take the lock with [`PlanStorage::try_lock`], then load, modify and
/// save while holding the returned guard. Implementations never block in
/// `try_lock`; waiting and timeouts are the caller's concern.
pub trait PlanStorage: Send + Sync {
    /// Human-readable location, used in errors and logs
    fn location(&self) -> String;

    /// Try to take the exclusive lock. `Ok(None)` means another holder has it.
    fn try_lock(&self) -> StoreResult<Option<StorageGuard>>;

    /// Read the current plan, if one exists
    fn load(&self) -> StoreResult<Option<Plan>>;

    /// Replace the stored plan
    fn save(&self, plan: &Plan) -> StoreResult<()>;

    /// Delete the stored plan. Missing is not an error.
    fn remove(&self) -> StoreResult<()>;
}
