use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::models::LoggingConfig;

/// Resolved logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Console output format
    pub format: LogFormat,

    /// Directory for rolling log files (None = console only)
    pub log_dir: Option<PathBuf>,

    /// Log rotation policy for the file output
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = anyhow::Error;

    fn try_from(settings: &LoggingConfig) -> Result<Self> {
        let format = match settings.format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => bail!("Invalid log format: {other}"),
        };
        let rotation = match settings.rotation.to_lowercase().as_str() {
            "daily" => RotationPolicy::Daily,
            "hourly" => RotationPolicy::Hourly,
            "never" => RotationPolicy::Never,
            other => bail!("Invalid log rotation: {other}"),
        };
        Ok(Self {
            level: settings.level.clone(),
            format,
            log_dir: settings.log_dir.as_ref().map(PathBuf::from),
            rotation,
        })
    }
}
