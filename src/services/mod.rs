//! Service layer: the stateful and stateless building blocks of a run.

pub mod dependency_graph;
pub mod escalation_ladder;
pub mod idea_queue;
pub mod policy_engine;
pub mod task_store;

pub use dependency_graph::{DependencyResolver, DependencyStatus, MissingDependency, ValidationReport};
pub use escalation_ladder::EscalationLadder;
pub use idea_queue::IdeaQueue;
pub use policy_engine::{default_policies, Action, Condition, Policy, PolicyEngine};
pub use task_store::TaskStore;
