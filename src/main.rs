use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fundwatch::cli::screen::ScreenArgs;
use fundwatch::core::log::init_logging;
use fundwatch::search::DEFAULT_SEARCH_LIMIT;

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

impl From<Commands> for fundwatch::AppCommand {
    fn from(cmd: Commands) -> fundwatch::AppCommand {
        match cmd {
            Commands::Serve => fundwatch::AppCommand::Serve,
            Commands::Watchlist => fundwatch::AppCommand::Watchlist,
            Commands::Search { keyword, limit } => {
                fundwatch::AppCommand::Search { keyword, limit }
            }
            Commands::Screen(args) => fundwatch::AppCommand::Screen(args),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the HTTP API server
    Serve,
    /// Display the watchlist with realtime estimates
    Watchlist,
    /// Search funds by code, name or pinyin
    Search {
        keyword: String,
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Refresh screening data and list the best ranked funds
    Screen(ScreenArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let server = matches!(cli.command, Some(Commands::Serve));
    init_logging(cli.verbose, server);

    let result = match cli.command {
        Some(Commands::Setup) => fundwatch::cli::setup::setup(),
        Some(cmd) => fundwatch::run_command(cmd.into(), cli.config_path.as_deref()).await,
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
