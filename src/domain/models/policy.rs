//! Policy engine data types: the typed evaluation context and the merged effect.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Area of execution a policy influences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Retry,
    Planning,
    Tool,
    Verification,
    Routing,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Planning => "planning",
            Self::Tool => "tool",
            Self::Verification => "verification",
            Self::Routing => "routing",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts a policy can inspect.
///
/// The well-known fields cover what the built-in rules need; anything else
/// travels in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyContext {
    pub task_id: Option<String>,
    pub description: String,
    pub retry_count: u32,
    /// e.g. "trivial", "simple", "complex"
    pub complexity: Option<String>,
    pub categories: Vec<String>,
    pub user_preferences: HashMap<String, String>,
    pub project_files: Vec<String>,
    pub coder_success_rate: f64,
    pub estimated_files_changed: u32,
    pub config_completed: bool,
    pub extra: HashMap<String, serde_json::Value>,
}

impl PolicyContext {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_complexity(mut self, complexity: impl Into<String>) -> Self {
        self.complexity = Some(complexity.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_preferences.insert(key.into(), value.into());
        self
    }

    pub fn with_project_file(mut self, file: impl Into<String>) -> Self {
        self.project_files.push(file.into());
        self
    }

    pub const fn with_success_rate(mut self, rate: f64) -> Self {
        self.coder_success_rate = rate;
        self
    }

    pub const fn with_files_changed(mut self, files: u32) -> Self {
        self.estimated_files_changed = files;
        self
    }

    pub const fn with_config_completed(mut self, done: bool) -> Self {
        self.config_completed = done;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Contribution of a single policy's action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectFragment {
    pub skip_steps: Vec<String>,
    pub inject_steps: Vec<String>,
    pub tool_bias: HashMap<String, f64>,
    pub warnings: Vec<String>,
    pub context_additions: HashMap<String, serde_json::Value>,
}

impl EffectFragment {
    pub fn skip(mut self, step: impl Into<String>) -> Self {
        self.skip_steps.push(step.into());
        self
    }

    pub fn inject(mut self, step: impl Into<String>) -> Self {
        self.inject_steps.push(step.into());
        self
    }

    pub fn bias(mut self, tool: impl Into<String>, weight: f64) -> Self {
        self.tool_bias.insert(tool.into(), weight);
        self
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn add_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_additions.insert(key.into(), value);
        self
    }
}

/// Merged effect of every matching policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyEffect {
    pub skip_steps: Vec<String>,
    pub inject_steps: Vec<String>,
    pub tool_bias: HashMap<String, f64>,
    pub warnings: Vec<String>,
    pub context_additions: HashMap<String, serde_json::Value>,
    pub applied_policies: Vec<String>,
}

fn union_into(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

impl PolicyEffect {
    pub fn is_empty(&self) -> bool {
        self.applied_policies.is_empty()
    }

    /// Fold one policy's fragment in. Lists union in first-seen order, biases
    /// add up, later context additions overwrite earlier ones.
    pub fn merge(&mut self, policy_name: &str, fragment: EffectFragment) {
        union_into(&mut self.skip_steps, fragment.skip_steps);
        union_into(&mut self.inject_steps, fragment.inject_steps);
        for (tool, weight) in fragment.tool_bias {
            *self.tool_bias.entry(tool).or_insert(0.0) += weight;
        }
        self.warnings.extend(fragment.warnings);
        self.context_additions.extend(fragment.context_additions);
        union_into(&mut self.applied_policies, vec![policy_name.to_string()]);
    }
}

/// Registry listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub kind: PolicyKind,
    pub confidence: f64,
    pub source: String,
}
