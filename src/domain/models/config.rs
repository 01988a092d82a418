use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for foreman
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of concurrent workers (1-64)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Upper bound on control-loop iterations per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Plan store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Typed dependency readiness heuristics
    #[serde(default)]
    pub dependencies: DependencyConfig,

    /// Per-task execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Idea queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_max_workers() -> usize {
    3
}

const fn default_max_iterations() -> u32 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_iterations: default_max_iterations(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            dependencies: DependencyConfig::default(),
            execution: ExecutionConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Plan store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Path to the plan JSON document
    #[serde(default = "default_plan_path")]
    pub plan_path: String,

    /// How long an operation waits for the store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Delay between lock attempts while contended
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
}

fn default_plan_path() -> String {
    ".foreman/plan.json".to_string()
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

const fn default_lock_poll_interval_ms() -> u64 {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            plan_path: default_plan_path(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub const fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Failed releases before a task is blocked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

const fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Completion estimate used for soft dependencies.
///
/// An in-progress target is credited `attempts * in_progress_step`, capped at
/// `in_progress_cap`. The constants are a heuristic, hence configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DependencyConfig {
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: f64,

    #[serde(default = "default_in_progress_step")]
    pub in_progress_step: f64,

    #[serde(default = "default_in_progress_cap")]
    pub in_progress_cap: f64,
}

const fn default_soft_threshold() -> f64 {
    0.8
}

const fn default_in_progress_step() -> f64 {
    0.2
}

const fn default_in_progress_cap() -> f64 {
    0.8
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            soft_threshold: default_soft_threshold(),
            in_progress_step: default_in_progress_step(),
            in_progress_cap: default_in_progress_cap(),
        }
    }
}

/// Per-task execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// Deadline for each execute/verify call (None = unbounded)
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,

    /// Consult the escalation ladder after failures
    #[serde(default = "default_true")]
    pub enable_escalation: bool,

    /// Evaluate policies before execution
    #[serde(default = "default_true")]
    pub enable_policies: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: None,
            enable_escalation: true,
            enable_policies: true,
        }
    }
}

impl ExecutionConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

/// Idea queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Path to the queue JSON document
    #[serde(default = "default_queue_path")]
    pub path: String,
}

fn default_queue_path() -> String {
    ".foreman/idea_queue.json".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
