//! Infrastructure layer: configuration, logging and plan storage adapters.

pub mod config;
pub mod logging;
pub mod storage;

pub use config::{ConfigError, ConfigLoader};
pub use logging::{LogConfig, LoggerImpl};
pub use storage::{InMemoryPlanStorage, JsonFilePlanStorage};
