use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use hdebug_contracts::HDEBUG_DIAG_SCHEMA_VERSION;
use hdebug_core::diagnostics::{all_codes, render_diagnostics_md};
use hdebug_core::{BindPolicy, DebugConfig, Severity};

mod replay;

#[derive(Parser, Debug)]
#[command(name = "hdebug")]
#[command(about = "Debug-mode handle validation: trace replay and diagnostics.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON trace of handle operations and print a JSON report.
    Replay {
        #[arg(long)]
        trace: PathBuf,
        /// Closed-handle queue capacity (overrides HDEBUG_CLOSED_QUEUE_MAX).
        #[arg(long)]
        closed_queue_max: Option<usize>,
        /// Bind one debug context per universal context (overrides HDEBUG_SINGLETON).
        #[arg(long, default_value_t = false)]
        per_context: bool,
    },
    /// Print the diagnostics catalog.
    Diagnostics {
        /// Emit JSON instead of Markdown.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct CatalogEntry {
    code: &'static str,
    severity: Severity,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Catalog {
    schema_version: &'static str,
    codes: Vec<CatalogEntry>,
}

fn main() -> ExitCode {
    init_tracing();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("warn,hdebug=info,hdebug_core=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            trace,
            closed_queue_max,
            per_context,
        } => cmd_replay(&trace, closed_queue_max, per_context),
        Command::Diagnostics { json } => cmd_diagnostics(json),
    }
}

fn cmd_replay(
    path: &std::path::Path,
    closed_queue_max: Option<usize>,
    per_context: bool,
) -> Result<ExitCode> {
    let bytes = std::fs::read(path).with_context(|| format!("read trace: {}", path.display()))?;
    let trace =
        replay::parse_trace(&bytes).with_context(|| format!("load trace: {}", path.display()))?;

    let mut config = DebugConfig::from_env();
    if let Some(max) = closed_queue_max {
        config.closed_queue_max = max;
    }
    if per_context {
        config.bind_policy = BindPolicy::PerContext;
    }

    let report = replay::replay(&trace, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_diagnostics(json: bool) -> Result<ExitCode> {
    if !json {
        print!("{}", render_diagnostics_md());
        return Ok(ExitCode::SUCCESS);
    }
    let catalog = Catalog {
        schema_version: HDEBUG_DIAG_SCHEMA_VERSION,
        codes: all_codes()
            .iter()
            .map(|&c| CatalogEntry {
                code: c.code_str(),
                severity: c.severity(),
                message: c.default_message(),
                help: c.default_help(),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(ExitCode::SUCCESS)
}
