use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fxcache::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Show cached rates for a base currency, fetching them if none are cached
    Get {
        base: String,
        /// Only show these target currencies
        #[arg(short, long = "target")]
        targets: Vec<String>,
    },
    /// Fetch the latest rates for a base currency now
    Refresh { base: String },
    /// Convert an amount between two currencies
    Convert {
        amount: f64,
        from: String,
        to: String,
    },
    /// Keep rates refreshed in the background and print every update
    Watch { bases: Vec<String> },
}

impl From<Commands> for fxcache::AppCommand {
    fn from(cmd: Commands) -> fxcache::AppCommand {
        match cmd {
            Commands::Get { base, targets } => fxcache::AppCommand::Get { base, targets },
            Commands::Refresh { base } => fxcache::AppCommand::Refresh { base },
            Commands::Convert { amount, from, to } => {
                fxcache::AppCommand::Convert { amount, from, to }
            }
            Commands::Watch { bases } => fxcache::AppCommand::Watch { bases },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match &cli.config_path {
            Some(path) => fxcache::cli::setup::setup_at_path(path),
            None => fxcache::cli::setup::setup(),
        },
        Some(cmd) => fxcache::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
