//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and collaborators used across
//! multiple integration test files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use foreman::domain::models::{Config, Plan, RetryConfig, StoreConfig, Task};
use foreman::domain::ports::{ExecutionContext, TaskExecutor, TaskVerifier};
use foreman::infrastructure::JsonFilePlanStorage;
use foreman::services::TaskStore;
use serde_json::Value;
use tempfile::TempDir;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Path of a plan file inside `dir`.
pub fn plan_path(dir: &Path) -> PathBuf {
    dir.join(".foreman").join("plan.json")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Store config with short lock timings so contention tests finish quickly.
pub fn fast_store_config(path: &Path) -> StoreConfig {
    StoreConfig {
        plan_path: path.display().to_string(),
        lock_timeout_ms: 5_000,
        lock_poll_interval_ms: 2,
    }
}

/// Task store over a JSON plan file.
pub fn file_store(path: &Path, max_attempts: u32) -> Arc<TaskStore> {
    Arc::new(TaskStore::new(
        Arc::new(JsonFilePlanStorage::new(path)),
        &fast_store_config(path),
        &RetryConfig { max_attempts },
    ))
}

/// Config pointing at `path` with the given pool size.
pub fn config_for(path: &Path, max_workers: usize) -> Config {
    let mut config = Config::default();
    config.store = fast_store_config(path);
    config.max_workers = max_workers;
    config
}

pub fn plan_of(tasks: Vec<Task>) -> Plan {
    Plan::new("integration", "integration test plan").with_tasks(tasks)
}

type Script = dyn Fn(&Task, &ExecutionContext) -> anyhow::Result<Value> + Send + Sync;

/// Executor driven by a closure, recording the ids it ran.
pub struct ScriptedExecutor {
    script: Box<Script>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&Task, &ExecutionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(|task, _| Ok(Value::String(task.id.clone())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(task.id.clone());
        (self.script)(task, ctx)
    }
}

/// Verifier that accepts every result.
pub struct AcceptAll;

#[async_trait]
impl TaskVerifier for AcceptAll {
    async fn verify(&self, _: &Task, _: &Value, _: &ExecutionContext) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Verifier that rejects every result.
pub struct RejectAll;

#[async_trait]
impl TaskVerifier for RejectAll {
    async fn verify(&self, _: &Task, _: &Value, _: &ExecutionContext) -> anyhow::Result<bool> {
        Ok(false)
    }
}
