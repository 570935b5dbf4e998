//! Workloop CLI entry point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use workloop::cli::{Cli, Command, StateCommand, parse_cli_vars};
use workloop::config::Config;
use workloop::error::EngineError;
use workloop::llm::create_client;
use workloop::orchestrator::Orchestrator;
use workloop::state::LoopStateStore;
use workloop::vars::VariableMap;
use workloop::workflow::{Workflow, load_value, validate_workflow};

/// Exit code for recoverable timeouts (state saved as paused)
const EXIT_TIMEOUT: u8 = 2;

fn setup_logging(cli_log_level: Option<&str>, debug_mode: bool) -> Result<()> {
    // Debug mode raises the default level so per-iteration traces show up;
    // an explicit --log-level still wins.
    let fallback = if debug_mode {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        None => fallback,
        Some(other) => {
            eprintln!("Warning: unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let debug_mode = matches!(&cli.command, Command::Run { debug: true, .. });
    setup_logging(cli.log_level.as_deref(), debug_mode).context("failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    debug!("main: dispatching command");
    match cli.command {
        Command::Run {
            workflow,
            work_dir,
            vars,
            debug,
        } => {
            if debug {
                config.debug = true;
            }
            cmd_run(&config, &workflow, work_dir, &vars).await
        }
        Command::Validate { workflow } => cmd_validate(&workflow),
        Command::State { command } => cmd_state(&config, command),
    }
}

/// Validate, then execute a workflow.
async fn cmd_run(
    config: &Config,
    workflow_path: &PathBuf,
    work_dir: Option<PathBuf>,
    var_pairs: &[String],
) -> Result<ExitCode> {
    let cli_vars = parse_cli_vars(var_pairs)?;

    // Validation runs once, before any work begins
    let raw = load_value(workflow_path)?;
    let validation = validate_workflow(&raw);
    for issue in &validation.errors {
        print_issue(issue);
    }
    if !validation.valid {
        eprintln!("workflow validation failed with {} error(s)", non_warning_count(&validation));
        return Ok(ExitCode::FAILURE);
    }

    let workflow = Workflow::from_value(workflow_path, raw)?;

    let work_dir = match work_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let llm = create_client(&config.provider.name)
        .with_context(|| format!("failed to create LLM client '{}'", config.provider.name))?;
    info!(provider = %config.provider.name, work_dir = %work_dir.display(), "running workflow");

    let orchestrator = Orchestrator::new(llm, config.clone(), work_dir).with_cli_vars(cli_vars);

    let mut vars = VariableMap::new();
    match orchestrator.execute_workflow(&workflow, &mut vars).await {
        Ok(outcome) => {
            for run in &outcome.runs {
                println!(
                    "loop '{}': {} ({} -> {})",
                    run.loop_name,
                    run.status,
                    run.start_time.format("%H:%M:%S"),
                    run.end_time.format("%H:%M:%S")
                );
            }
            if !outcome.final_output.is_empty() {
                println!("{}", outcome.final_output);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ EngineError::Timeout { .. }) => {
            eprintln!("{}", e);
            eprintln!("re-run the workflow to resume from the saved checkpoint");
            Ok(ExitCode::from(EXIT_TIMEOUT))
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Validate a workflow and print its diagnostics.
fn cmd_validate(workflow_path: &PathBuf) -> Result<ExitCode> {
    let raw = load_value(workflow_path)?;
    let validation = validate_workflow(&raw);

    if validation.errors.is_empty() {
        println!("{}: OK", workflow_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    for issue in &validation.errors {
        print_issue(issue);
    }

    if validation.valid {
        println!("{}: OK ({} warning(s))", workflow_path.display(), validation.errors.len());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{}: {} error(s)",
            workflow_path.display(),
            non_warning_count(&validation)
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Inspect or clear saved loop state.
fn cmd_state(config: &Config, command: StateCommand) -> Result<ExitCode> {
    let dir = config
        .state
        .dir
        .clone()
        .unwrap_or_else(LoopStateStore::default_dir);
    let store = LoopStateStore::open(&dir)?;

    match command {
        StateCommand::List => {
            let names = store.list()?;
            if names.is_empty() {
                println!("no saved loop state under {}", dir.display());
            } else {
                for name in names {
                    match store.load(&name) {
                        Ok(state) => println!(
                            "{:<30} {:<10} iteration {}",
                            name, state.status, state.context.iteration
                        ),
                        Err(e) => println!("{:<30} (unreadable: {})", name, e),
                    }
                }
            }
        }
        StateCommand::Show { loop_name } => {
            let state = store.load(&loop_name)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        StateCommand::Clear { loop_name } => {
            store.delete(&loop_name)?;
            println!("cleared state for loop '{}'", loop_name);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_issue(issue: &workloop::workflow::ValidationIssue) {
    let kind = if issue.warning { "warning" } else { "error" };
    match &issue.field {
        Some(field) => eprintln!("{}: [{}] {}\n  fix: {}", kind, field, issue.message, issue.fix),
        None => eprintln!("{}: {}\n  fix: {}", kind, issue.message, issue.fix),
    }
}

fn non_warning_count(validation: &workloop::workflow::ValidationResult) -> usize {
    validation.errors.iter().filter(|e| !e.warning).count()
}
