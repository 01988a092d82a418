//! Idea queue CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{
    base_table, idea_status_cell, output, supports_color, truncate, ActionOutput, CommandOutput,
};
use crate::domain::models::{Config, QueueCounts, QueuedIdea};
use crate::services::IdeaQueue;

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommands,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Add one or more ideas
    Add {
        /// Idea descriptions; several are queued in the order given
        #[arg(required = true)]
        descriptions: Vec<String>,
        /// Priority (lower runs sooner)
        #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
        priority: i32,
    },
    /// List queued ideas
    List {
        /// Include started, finished and skipped ideas
        #[arg(short, long)]
        all: bool,
    },
    /// Show the idea that would run next
    Next,
    /// Remove an idea
    Remove {
        /// Idea ID
        id: String,
    },
    /// Drop completed, failed and skipped ideas
    Clear,
    /// Count ideas by status
    Count,
    /// Skip an idea without running it
    Skip {
        /// Idea ID
        id: String,
        /// Why it was skipped
        #[arg(short, long, default_value = "")]
        reason: String,
    },
    /// Change an idea's priority
    Reorder {
        /// Idea ID
        id: String,
        /// New priority
        #[arg(allow_negative_numbers = true)]
        priority: i32,
    },
}

#[derive(Debug, Serialize)]
pub struct IdeaListOutput {
    pub ideas: Vec<QueuedIdea>,
    pub total: usize,
}

impl CommandOutput for IdeaListOutput {
    fn to_human(&self) -> String {
        if self.ideas.is_empty() {
            return "Idea queue is empty.".to_string();
        }
        let use_colors = supports_color();
        let mut table = base_table(&["ID", "Priority", "Status", "Description"]);
        for idea in &self.ideas {
            table.add_row(vec![
                comfy_table::Cell::new(&idea.id),
                comfy_table::Cell::new(idea.priority),
                idea_status_cell(idea.status, use_colors),
                comfy_table::Cell::new(truncate(&idea.description, 60)),
            ]);
        }
        format!("Found {} idea(s):\n{table}", self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct NextIdeaOutput {
    pub idea: Option<QueuedIdea>,
}

impl CommandOutput for NextIdeaOutput {
    fn to_human(&self) -> String {
        self.idea.as_ref().map_or_else(
            || "No pending ideas.".to_string(),
            |idea| {
                format!(
                    "Next: {} (priority {})\n{}",
                    idea.id, idea.priority, idea.description
                )
            },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct CountOutput {
    #[serde(flatten)]
    pub counts: QueueCounts,
}

impl CommandOutput for CountOutput {
    fn to_human(&self) -> String {
        let c = &self.counts;
        format!(
            "Total: {}\n  pending: {}\n  in progress: {}\n  completed: {}\n  failed: {}\n  skipped: {}",
            c.total, c.pending, c.in_progress, c.completed, c.failed, c.skipped
        )
    }
}

pub async fn execute(args: QueueArgs, config: &Config, json_mode: bool) -> Result<()> {
    let path = config.queue.path.clone();
    tokio::task::spawn_blocking(move || run(args, &path, json_mode)).await?
}

/// The queue does plain file I/O, so commands run on the blocking pool.
fn run(args: QueueArgs, path: &str, json_mode: bool) -> Result<()> {
    let mut queue =
        IdeaQueue::open(path).with_context(|| format!("Failed to open idea queue at {path}"))?;

    match args.command {
        QueueCommands::Add {
            descriptions,
            priority,
        } => {
            let added = queue.add_many(descriptions, priority)?;
            let ids: Vec<&str> = added.iter().map(|i| i.id.as_str()).collect();
            output(
                &ActionOutput::new(
                    true,
                    format!("Queued {} idea(s): {}", added.len(), ids.join(", ")),
                ),
                json_mode,
            );
        }

        QueueCommands::List { all } => {
            let ideas: Vec<QueuedIdea> = if all {
                queue.list_all().into_iter().cloned().collect()
            } else {
                queue.list_pending().into_iter().cloned().collect()
            };
            let out = IdeaListOutput {
                total: ideas.len(),
                ideas,
            };
            output(&out, json_mode);
        }

        QueueCommands::Next => {
            let out = NextIdeaOutput {
                idea: queue.get_next().cloned(),
            };
            output(&out, json_mode);
        }

        QueueCommands::Remove { id } => {
            let removed = queue.remove(&id)?;
            let message = if removed {
                format!("Removed idea {id}")
            } else {
                format!("Idea {id} not found")
            };
            output(&ActionOutput::new(removed, message), json_mode);
        }

        QueueCommands::Clear => {
            let removed = queue.clear_completed()?;
            output(
                &ActionOutput::new(true, format!("Cleared {removed} finished idea(s)")),
                json_mode,
            );
        }

        QueueCommands::Count => {
            output(
                &CountOutput {
                    counts: queue.count(),
                },
                json_mode,
            );
        }

        QueueCommands::Skip { id, reason } => {
            queue.skip(&id, reason)?;
            output(&ActionOutput::new(true, format!("Skipped idea {id}")), json_mode);
        }

        QueueCommands::Reorder { id, priority } => {
            queue.reorder(&id, priority)?;
            output(
                &ActionOutput::new(true, format!("Idea {id} now has priority {priority}")),
                json_mode,
            );
        }
    }

    Ok(())
}
