use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_workers: {0}. Must be between 1 and 64")]
    InvalidMaxWorkers(usize),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Plan path cannot be empty")]
    EmptyPlanPath,

    #[error("Queue path cannot be empty")]
    EmptyQueuePath,

    #[error(
        "Invalid lock timing: poll interval ({poll_ms}ms) must be positive and below the timeout ({timeout_ms}ms)"
    )]
    InvalidLockTiming { timeout_ms: u64, poll_ms: u64 },

    #[error("Invalid soft_threshold: {0}. Must be in (0, 1]")]
    InvalidSoftThreshold(f64),

    #[error("Invalid in-progress estimate: step {step} and cap {cap} must be within [0, 1]")]
    InvalidInProgressEstimate { step: f64, cap: f64 },

    #[error("Invalid task_timeout_secs: 0. Omit it for no timeout")]
    ZeroTaskTimeout,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .foreman/config.yaml (project config)
    /// 3. .foreman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FOREMAN_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".foreman/config.yaml"))
            .merge(Yaml::file(".foreman/local.yaml"))
            .merge(Env::prefixed("FOREMAN_").split("__"))
    }

    /// Load configuration from a specific file, still honoring environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("FOREMAN_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_workers == 0 || config.max_workers > 64 {
            return Err(ConfigError::InvalidMaxWorkers(config.max_workers));
        }

        if config.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(config.max_iterations));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }

        // Store
        if config.store.plan_path.trim().is_empty() {
            return Err(ConfigError::EmptyPlanPath);
        }

        let (timeout_ms, poll_ms) = (
            config.store.lock_timeout_ms,
            config.store.lock_poll_interval_ms,
        );
        if timeout_ms == 0 || poll_ms == 0 || poll_ms >= timeout_ms {
            return Err(ConfigError::InvalidLockTiming {
                timeout_ms,
                poll_ms,
            });
        }

        // Dependency heuristics
        let deps = &config.dependencies;
        if !(deps.soft_threshold > 0.0 && deps.soft_threshold <= 1.0) {
            return Err(ConfigError::InvalidSoftThreshold(deps.soft_threshold));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&deps.in_progress_step) || !unit.contains(&deps.in_progress_cap) {
            return Err(ConfigError::InvalidInProgressEstimate {
                step: deps.in_progress_step,
                cap: deps.in_progress_cap,
            });
        }

        if config.execution.task_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTaskTimeout);
        }

        if config.queue.path.trim().is_empty() {
            return Err(ConfigError::EmptyQueuePath);
        }

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
