pub mod config;
pub mod escalation;
pub mod idea;
pub mod plan;
pub mod policy;
pub mod task;

pub use config::{
    Config, DependencyConfig, ExecutionConfig, LoggingConfig, QueueConfig, RetryConfig,
    StoreConfig,
};
pub use escalation::{
    EscalationSummary, HumanQuestion, RecoveryAction, RecoveryDirective, RecoveryOutcome,
    RecoveryStrategy, MAX_ESCALATION_LEVEL,
};
pub use idea::{IdeaStatus, QueueCounts, QueuedIdea};
pub use plan::{Plan, PlanMetadata, PlanStatus, StatusSummary};
pub use policy::{EffectFragment, PolicyContext, PolicyEffect, PolicyInfo, PolicyKind};
pub use task::{DependencyKind, DependencySpec, Task, TaskStatus};
