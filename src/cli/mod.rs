//! Administrative command-line host for plans and the idea queue.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use serde_json::json;

/// Report a command failure and exit with a non-zero status.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = json!({
            "success": false,
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
