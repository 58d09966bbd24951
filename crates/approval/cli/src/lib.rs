//! approvalctl - command-line front end for the approval engine
//!
//! - `validate` checks a workflow blueprint and lists every problem
//! - `show` prints a blueprint's steps, routing and parallel groups
//! - `simulate` replays a scripted scenario against an in-memory engine

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod output;

pub use commands::simulate::{run_script, Script, ScriptStep, SimulationReport, StepReport};
pub use error::{CliError, CliResult};
pub use output::OutputFormat;

/// approvalctl application
#[derive(Parser)]
#[command(name = "approvalctl")]
#[command(about = "Validate approval workflow blueprints and replay scenarios", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Check a blueprint and list its problems
    Validate {
        /// Blueprint file (.yaml or .json)
        blueprint: PathBuf,
    },

    /// Print a blueprint's steps, routing and parallel groups
    Show {
        /// Blueprint file (.yaml or .json)
        blueprint: PathBuf,
    },

    /// Replay a scripted scenario against a blueprint
    Simulate {
        /// Blueprint file (.yaml or .json)
        blueprint: PathBuf,

        /// Scenario script (.yaml or .json)
        script: PathBuf,

        /// Engine configuration file
        #[arg(short, long, env = "APPROVAL_CONFIG")]
        config: Option<PathBuf>,

        /// Stop at the first action the engine refuses
        #[arg(long)]
        fail_fast: bool,
    },
}

/// Run using the current process arguments.
pub fn run() -> CliResult<()> {
    run_with_args(std::env::args_os())
}

/// Run using the provided argument iterator.
pub fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    let filter = if cli.verbose { "debug" } else { "warn" };
    // a subscriber may already be installed when embedded
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init();

    match cli.command {
        Commands::Validate { blueprint } => commands::blueprint::validate(&blueprint, cli.output),
        Commands::Show { blueprint } => commands::blueprint::show(&blueprint, cli.output),
        Commands::Simulate {
            blueprint,
            script,
            config,
            fail_fast,
        } => commands::simulate::execute(
            &blueprint,
            &script,
            config.as_deref(),
            fail_fast,
            cli.output,
        ),
    }
}
