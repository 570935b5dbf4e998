//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Workloop - declarative agentic workflow engine
#[derive(Parser)]
#[command(name = "wl", about = "Run declarative agentic workflows with loops and quality gates", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a workflow, then execute it
    Run {
        /// Workflow file to run
        workflow: PathBuf,

        /// Working directory for steps, tools, and gates
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Template variables as name=value (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Emit per-iteration traces
        #[arg(long)]
        debug: bool,
    },

    /// Validate a workflow and report diagnostics
    Validate {
        /// Workflow file to check
        workflow: PathBuf,
    },

    /// Inspect saved loop state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

/// Loop state subcommands
#[derive(Debug, Subcommand)]
pub enum StateCommand {
    /// List loops with saved state
    List,

    /// Show a loop's saved state
    Show {
        /// Loop name
        loop_name: String,
    },

    /// Delete a loop's saved state
    Clear {
        /// Loop name
        loop_name: String,
    },
}

/// Parse repeated `name=value` arguments into a map.
pub fn parse_cli_vars(pairs: &[String]) -> eyre::Result<std::collections::BTreeMap<String, String>> {
    let mut vars = std::collections::BTreeMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(eyre::eyre!("invalid --var '{}': expected NAME=VALUE", pair));
        };
        vars.insert(name.trim().to_string(), value.to_string());
    }
    Ok(vars)
}
