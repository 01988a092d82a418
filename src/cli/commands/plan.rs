//! Plan CLI commands.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::output::{
    base_table, output, supports_color, task_status_cell, truncate, ActionOutput, CommandOutput,
};
use crate::domain::errors::StoreError;
use crate::domain::models::{Config, Plan, StatusSummary, Task};
use crate::infrastructure::storage::JsonFilePlanStorage;
use crate::services::{DependencyResolver, TaskStore, ValidationReport};

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(subcommand)]
    pub command: PlanCommands,
}

#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// Check the dependency graph for cycles, missing targets and bad specs
    Validate,
    /// Show completion counts
    Status,
    /// List every task in the plan
    Show,
    /// Move failed tasks back to pending
    ResetFailed,
    /// Restart a blocked or failed task with a clean attempt count
    ResetTask {
        /// Task ID
        id: String,
    },
    /// Create a new plan
    Init {
        /// Project name
        name: String,
        /// Project description
        #[arg(short, long, default_value = "")]
        description: String,
        /// Import tasks from an existing plan JSON file
        #[arg(long)]
        from: Option<PathBuf>,
        /// Overwrite an existing plan
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    #[serde(flatten)]
    pub report: ValidationReport,
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        if self.report.is_valid {
            return format!(
                "Plan is valid.\nExecution order: {}",
                self.report.execution_order.join(" -> ")
            );
        }
        let mut lines = vec![format!(
            "Plan is invalid ({} error(s)):",
            self.report.errors.len()
        )];
        lines.extend(self.report.errors.iter().map(|e| format!("  - {e}")));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    #[serde(flatten)]
    pub summary: StatusSummary,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut table = base_table(&["Metric", "Value"]);
        table.add_row(vec!["Status".to_string(), s.status.to_string()]);
        table.add_row(vec!["Total".to_string(), s.total.to_string()]);
        table.add_row(vec!["Completed".to_string(), s.completed.to_string()]);
        table.add_row(vec!["In progress".to_string(), s.in_progress.to_string()]);
        table.add_row(vec!["Pending".to_string(), s.pending.to_string()]);
        table.add_row(vec!["Failed".to_string(), s.failed.to_string()]);
        table.add_row(vec!["Blocked".to_string(), s.blocked.to_string()]);
        table.add_row(vec!["Skipped".to_string(), s.skipped.to_string()]);
        format!(
            "Project: {} ({:.1}% complete)\n{table}",
            s.project_name, s.completion_percentage
        )
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub project_name: String,
    pub tasks: Vec<Task>,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return format!("Plan '{}' has no tasks.", self.project_name);
        }
        let use_colors = supports_color();
        let mut table = base_table(&[
            "ID",
            "Title",
            "Status",
            "Priority",
            "Attempts",
            "Depends on",
        ]);
        for task in &self.tasks {
            table.add_row(vec![
                comfy_table::Cell::new(&task.id),
                comfy_table::Cell::new(truncate(&task.title, 40)),
                task_status_cell(task.status, use_colors),
                comfy_table::Cell::new(task.priority),
                comfy_table::Cell::new(task.attempts),
                comfy_table::Cell::new(task.dependencies.join(", ")),
            ]);
        }
        format!("Plan: {}\n{table}", self.project_name)
    }
}

fn open_store(config: &Config) -> TaskStore {
    let storage = JsonFilePlanStorage::new(&config.store.plan_path);
    TaskStore::new(Arc::new(storage), &config.store, &config.retry)
}

fn missing_plan_hint(config: &Config) -> String {
    format!(
        "No plan at {}. Run 'foreman plan init' first.",
        config.store.plan_path
    )
}

pub async fn execute(args: PlanArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = open_store(config);

    match args.command {
        PlanCommands::Validate => {
            let plan = store
                .snapshot()
                .await
                .with_context(|| missing_plan_hint(config))?;
            let report = DependencyResolver::new(config.dependencies.clone()).validate(&plan.tasks);
            let valid = report.is_valid;
            output(&ValidationOutput { report }, json_mode);
            if !valid {
                bail!("Plan failed validation");
            }
        }

        PlanCommands::Status => {
            let summary = store
                .status_summary()
                .await
                .with_context(|| missing_plan_hint(config))?;
            output(&StatusOutput { summary }, json_mode);
        }

        PlanCommands::Show => {
            let plan = store
                .snapshot()
                .await
                .with_context(|| missing_plan_hint(config))?;
            let out = TaskListOutput {
                project_name: plan.project_name,
                tasks: plan.tasks,
            };
            output(&out, json_mode);
        }

        PlanCommands::ResetFailed => {
            let count = store
                .reset_failed_tasks()
                .await
                .with_context(|| missing_plan_hint(config))?;
            output(
                &ActionOutput::new(true, format!("Reset {count} failed task(s) to pending")),
                json_mode,
            );
        }

        PlanCommands::ResetTask { id } => {
            let reset = store
                .reset_task(&id)
                .await
                .with_context(|| missing_plan_hint(config))?;
            let message = if reset {
                format!("Task {id} reset to pending")
            } else {
                format!("Task {id} not found or not blocked/failed")
            };
            output(&ActionOutput::new(reset, message), json_mode);
        }

        PlanCommands::Init {
            name,
            description,
            from,
            force,
        } => {
            match store.snapshot().await {
                Ok(_) | Err(StoreError::Serialization(_)) if !force => {
                    bail!(
                        "A plan already exists at {}. Use --force to overwrite.",
                        config.store.plan_path
                    );
                }
                Err(err @ (StoreError::Io { .. } | StoreError::LockTimeout { .. })) => {
                    return Err(err.into());
                }
                _ => {}
            }

            let mut plan = Plan::new(name, description);
            if let Some(path) = from {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let source: Plan = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse plan {}", path.display()))?;
                plan = plan.with_tasks(source.tasks);
            }

            let report = DependencyResolver::new(config.dependencies.clone()).validate(&plan.tasks);
            let task_count = plan.tasks.len();
            store.initialize(plan).await?;

            let mut message = format!(
                "Plan initialized at {} with {task_count} task(s)",
                config.store.plan_path
            );
            if !report.is_valid {
                message.push_str(&format!(
                    "\nWarning: plan has {} validation error(s); run 'foreman plan validate'",
                    report.errors.len()
                ));
            }
            output(&ActionOutput::new(true, message), json_mode);
        }
    }

    Ok(())
}
