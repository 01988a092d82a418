//! Condition/action rules evaluated against a [`PolicyContext`].
//!
//! Built-in rules are plain data ([`Condition`] and [`Action`] variants) so
//! they can be listed and tested without an engine. Arbitrary logic plugs in
//! through the `Custom` variants.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::domain::models::{EffectFragment, PolicyContext, PolicyEffect, PolicyInfo, PolicyKind};

type ConditionFn = dyn Fn(&PolicyContext) -> anyhow::Result<bool> + Send + Sync;
type ActionFn = dyn Fn(&PolicyContext) -> anyhow::Result<EffectFragment> + Send + Sync;

/// Caller-supplied predicate.
#[derive(Clone)]
pub struct CustomCondition(Arc<ConditionFn>);

impl fmt::Debug for CustomCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomCondition")
    }
}

/// Caller-supplied action.
#[derive(Clone)]
pub struct CustomAction(Arc<ActionFn>);

impl fmt::Debug for CustomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomAction")
    }
}

/// When a policy applies.
#[derive(Debug, Clone)]
pub enum Condition {
    Always,
    /// Case-insensitive substring match on the description
    DescriptionContainsAny(Vec<String>),
    RetryCountAtLeast(u32),
    HasCategory(String),
    ConfigCompleted,
    /// Substring match on a user preference value
    PreferenceContains { key: String, needle: String },
    /// Exact match against one of the project files
    HasProjectFile(String),
    ComplexityIn(Vec<String>),
    SuccessRateAtLeast(f64),
    FilesChangedAbove(u32),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Custom(CustomCondition),
}

impl Condition {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&PolicyContext) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Custom(CustomCondition(Arc::new(f)))
    }

    pub fn description_contains_any(keywords: &[&str]) -> Self {
        Self::DescriptionContainsAny(keywords.iter().map(|k| (*k).to_string()).collect())
    }

    pub fn evaluate(&self, ctx: &PolicyContext) -> anyhow::Result<bool> {
        Ok(match self {
            Self::Always => true,
            Self::DescriptionContainsAny(keywords) => {
                let description = ctx.description.to_lowercase();
                keywords
                    .iter()
                    .any(|k| description.contains(&k.to_lowercase()))
            }
            Self::RetryCountAtLeast(n) => ctx.retry_count >= *n,
            Self::HasCategory(category) => ctx.categories.iter().any(|c| c == category),
            Self::ConfigCompleted => ctx.config_completed,
            Self::PreferenceContains { key, needle } => ctx
                .user_preferences
                .get(key)
                .is_some_and(|value| value.contains(needle.as_str())),
            Self::HasProjectFile(file) => ctx.project_files.iter().any(|f| f == file),
            Self::ComplexityIn(levels) => ctx
                .complexity
                .as_ref()
                .is_some_and(|c| levels.iter().any(|l| l == c)),
            Self::SuccessRateAtLeast(rate) => ctx.coder_success_rate >= *rate,
            Self::FilesChangedAbove(n) => ctx.estimated_files_changed > *n,
            Self::All(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                true
            }
            Self::Any(conditions) => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                false
            }
            Self::Not(condition) => !condition.evaluate(ctx)?,
            Self::Custom(CustomCondition(f)) => f(ctx)?,
        })
    }
}

/// What a policy contributes once it applies.
#[derive(Debug, Clone)]
pub enum Action {
    Fragment(EffectFragment),
    Custom(CustomAction),
}

impl Action {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&PolicyContext) -> anyhow::Result<EffectFragment> + Send + Sync + 'static,
    {
        Self::Custom(CustomAction(Arc::new(f)))
    }

    pub fn apply(&self, ctx: &PolicyContext) -> anyhow::Result<EffectFragment> {
        match self {
            Self::Fragment(fragment) => Ok(fragment.clone()),
            Self::Custom(CustomAction(f)) => f(ctx),
        }
    }
}

/// A registered rule.
#[derive(Debug, Clone)]
pub struct Policy {
    pub name: String,
    pub kind: PolicyKind,
    pub condition: Condition,
    pub action: Action,
    pub confidence: f64,
    pub source: String,
}

impl Policy {
    pub fn new(name: impl Into<String>, kind: PolicyKind, condition: Condition, action: Action) -> Self {
        Self {
            name: name.into(),
            kind,
            condition,
            action,
            confidence: 0.5,
            source: "user".to_string(),
        }
    }

    pub const fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn info(&self) -> PolicyInfo {
        PolicyInfo {
            name: self.name.clone(),
            kind: self.kind,
            confidence: self.confidence,
            source: self.source.clone(),
        }
    }

    /// Evaluate this policy alone. `Ok(None)` when the condition is false.
    pub fn evaluate(&self, ctx: &PolicyContext) -> anyhow::Result<Option<EffectFragment>> {
        if self.condition.evaluate(ctx)? {
            self.action.apply(ctx).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "policy panicked".to_string()
    }
}

/// The built-in rule set.
pub fn default_policies() -> Vec<Policy> {
    vec![
        Policy::new(
            "jwt_env_validation",
            PolicyKind::Retry,
            Condition::All(vec![
                Condition::description_contains_any(&["jwt"]),
                Condition::RetryCountAtLeast(2),
            ]),
            Action::Fragment(
                EffectFragment::default()
                    .inject("Validate JWT_SECRET environment variable exists")
                    .warn("JWT tasks have failed twice - adding env validation step"),
            ),
        )
        .with_confidence(0.9),
        Policy::new(
            "auth_requires_config",
            PolicyKind::Routing,
            Condition::All(vec![
                Condition::description_contains_any(&["auth", "login", "oauth", "jwt"]),
                Condition::HasCategory("config".to_string()),
                Condition::Not(Box::new(Condition::ConfigCompleted)),
            ]),
            Action::Fragment(
                EffectFragment::default()
                    .warn("Auth task detected - ensure config story is complete first")
                    .add_context("priority_dependency", json!("config")),
            ),
        )
        .with_confidence(0.8),
        Policy::new(
            "prefer_pytest",
            PolicyKind::Tool,
            Condition::Any(vec![
                Condition::PreferenceContains {
                    key: "test_framework".to_string(),
                    needle: "pytest".to_string(),
                },
                Condition::HasProjectFile("pytest".to_string()),
            ]),
            Action::Fragment(
                EffectFragment::default()
                    .bias("pytest", 1.0)
                    .bias("unittest", -0.5)
                    .add_context("preferred_test_framework", json!("pytest")),
            ),
        )
        .with_confidence(0.95),
        Policy::new(
            "skip_reviewer_simple",
            PolicyKind::Verification,
            Condition::All(vec![
                Condition::ComplexityIn(vec!["trivial".to_string(), "simple".to_string()]),
                Condition::SuccessRateAtLeast(0.85),
            ]),
            Action::Fragment(
                EffectFragment::default()
                    .skip("reviewer")
                    .warn("Skipping reviewer for high-confidence simple task"),
            ),
        )
        .with_confidence(0.7),
        Policy::new(
            "architect_for_multi_file",
            PolicyKind::Planning,
            Condition::FilesChangedAbove(5),
            Action::Fragment(
                EffectFragment::default()
                    .inject("Get architect review before implementation")
                    .add_context("requires_architect", json!(true)),
            ),
        )
        .with_confidence(0.75),
        Policy::new(
            "db_migration_safety",
            PolicyKind::Retry,
            Condition::All(vec![
                Condition::description_contains_any(&["database", "migration", "schema", "table"]),
                Condition::RetryCountAtLeast(1),
            ]),
            Action::Fragment(
                EffectFragment::default()
                    .inject("Create database backup before migration")
                    .warn("Database task with retries - adding backup step"),
            ),
        )
        .with_confidence(0.85),
    ]
    .into_iter()
    .map(|p| p.with_source("default"))
    .collect()
}

/// Registry of policies, evaluated in registration order.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: Vec<Policy>,
}

impl PolicyEngine {
    /// An engine with no policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine preloaded with [`default_policies`].
    pub fn with_defaults() -> Self {
        Self {
            policies: default_policies(),
        }
    }

    /// Register a policy. A policy with the same name is replaced in place.
    pub fn add_policy(&mut self, policy: Policy) {
        if let Some(existing) = self.policies.iter_mut().find(|p| p.name == policy.name) {
            *existing = policy;
        } else {
            self.policies.push(policy);
        }
    }

    pub fn remove_policy(&mut self, name: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|p| p.name != name);
        self.policies.len() != before
    }

    pub fn list_policies(&self) -> Vec<PolicyInfo> {
        self.policies.iter().map(Policy::info).collect()
    }

    /// Apply every matching policy and merge the results.
    ///
    /// A policy that errors or panics contributes nothing; the rest still run.
    pub fn evaluate(&self, ctx: &PolicyContext) -> PolicyEffect {
        let mut effect = PolicyEffect::default();

        for policy in &self.policies {
            let outcome = catch_unwind(AssertUnwindSafe(|| policy.evaluate(ctx)));
            match outcome {
                Ok(Ok(Some(fragment))) => {
                    debug!(policy = %policy.name, kind = %policy.kind, "policy applied");
                    effect.merge(&policy.name, fragment);
                }
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    warn!(policy = %policy.name, error = %err, "policy evaluation failed");
                }
                Err(payload) => {
                    warn!(
                        policy = %policy.name,
                        error = %panic_message(payload.as_ref()),
                        "policy panicked during evaluation"
                    );
                }
            }
        }

        effect
    }
}
