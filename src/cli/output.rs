//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::env;

use crate::domain::models::{IdeaStatus, TaskStatus};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Plain success/failure message.
#[derive(Debug, Serialize)]
pub struct ActionOutput {
    pub success: bool,
    pub message: String,
}

impl ActionOutput {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }
}

impl CommandOutput for ActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Table with the CLI's standard borders and layout.
pub fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

/// Check if color output is supported
pub fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

pub fn task_status_cell(status: TaskStatus, use_colors: bool) -> Cell {
    let cell = Cell::new(status);
    if !use_colors {
        return cell;
    }
    cell.fg(match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::InProgress => Color::Cyan,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Blocked => Color::Magenta,
        TaskStatus::Skipped => Color::DarkGrey,
        TaskStatus::Pending => Color::White,
    })
}

pub fn idea_status_cell(status: IdeaStatus, use_colors: bool) -> Cell {
    let cell = Cell::new(status.as_str());
    if !use_colors {
        return cell;
    }
    cell.fg(match status {
        IdeaStatus::Completed => Color::Green,
        IdeaStatus::InProgress => Color::Cyan,
        IdeaStatus::Failed => Color::Red,
        IdeaStatus::Skipped => Color::DarkGrey,
        IdeaStatus::Pending => Color::White,
    })
}
