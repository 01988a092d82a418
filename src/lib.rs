//! Foreman - dependency-aware task orchestrator
//!
//! Foreman takes a plan of interdependent tasks, dispatches them to a bounded
//! pool of concurrent workers with exclusive claims, tracks retries, and
//! escalates repeatedly failing tasks through a ladder of recovery strategies.
//! A policy engine layers cross-cutting behavior onto each attempt.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the storage/collaborator ports
//! - **Service Layer** (`services`): task store, dependency graph, escalation, policies, idea queue
//! - **Application Layer** (`application`): worker pool and orchestrator
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging and plan storage
//! - **CLI Layer** (`cli`): administrative command-line host
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use foreman::application::Orchestrator;
//! use foreman::domain::ports::{TaskExecutor, TaskVerifier};
//! use foreman::infrastructure::JsonFilePlanStorage;
//! use foreman::services::TaskStore;
//! use foreman::Config;
//!
//! async fn run(
//!     executor: Arc<dyn TaskExecutor>,
//!     verifier: Arc<dyn TaskVerifier>,
//! ) -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let storage = Arc::new(JsonFilePlanStorage::new(&config.store.plan_path));
//!     let store = Arc::new(TaskStore::new(storage, &config.store, &config.retry));
//!
//!     let summary = Orchestrator::new(store, executor, verifier, config)
//!         .start()
//!         .await?;
//!     println!("stopped: {}", summary.outcome);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Orchestrator, OrchestratorEvent, RunOutcome, RunSummary, TaskResult, WorkerPool};
pub use domain::errors::{DomainError, DomainResult, QueueError, StoreError, StoreResult};
pub use domain::models::{Config, Plan, PlanStatus, Task, TaskStatus};
pub use domain::ports::{ExecutionContext, HumanResponder, PlanStorage, TaskExecutor, TaskVerifier};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{DependencyResolver, EscalationLadder, IdeaQueue, PolicyEngine, TaskStore};
