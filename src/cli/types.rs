//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::plan::PlanArgs;
use super::commands::queue::QueueArgs;

#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(about = "Foreman - dependency-aware task orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .foreman/
    #[arg(short, long, global = true, env = "FOREMAN_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan inspection and maintenance
    Plan(PlanArgs),

    /// Idea queue management
    Queue(QueueArgs),
}
