use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::trace;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::Plan;
use crate::domain::ports::{PlanStorage, StorageGuard};

/// Plan stored as a JSON document, guarded by an exclusive lock on a sibling
/// `.lock` file so separate processes can share it.
#[derive(Debug, Clone)]
pub struct JsonFilePlanStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held OS lock; unlocked on drop.
struct LockHandle(File);

impl Drop for LockHandle {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl JsonFilePlanStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> StoreResult<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| io_error(parent, e))
            }
            _ => Ok(()),
        }
    }
}

impl PlanStorage for JsonFilePlanStorage {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn try_lock(&self) -> StoreResult<Option<StorageGuard>> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| io_error(&self.lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                trace!(lock = %self.lock_path.display(), "plan lock acquired");
                Ok(Some(StorageGuard::holding(LockHandle(file))))
            }
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(io_error(&self.lock_path, err)),
        }
    }

    fn load(&self) -> StoreResult<Option<Plan>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&self.path, err)),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write to a temporary sibling and sync it, then rename over the plan.
    fn save(&self, plan: &Plan) -> StoreResult<()> {
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(plan)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, e))
    }

    fn remove(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(io_error(&self.path, err)),
            _ => Ok(()),
        }
    }
}
