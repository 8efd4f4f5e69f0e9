use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use callbridge::realtime::tool_schemas;
use callbridge::Config;

/// Telephony to realtime speech bridge.
#[derive(Parser, Debug)]
#[command(name = "callbridge", version, about)]
struct Cli {
    /// Config file (defaults to `$CALLBRIDGE_CONFIG` or the user config dir)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept calls until interrupted (default)
    Run,
    /// Load and validate the configuration, then print it without secrets
    CheckConfig,
    /// Print the tool schemas offered to the realtime model
    Tools,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&tool_schemas())?);
            Ok(())
        }
        Command::CheckConfig => {
            let config = Config::load(cli.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run => {
            let config = Config::load(cli.config.as_deref())?;
            init_tracing(&config.log_level);
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting callbridge");
            callbridge::bridge::run(config).await
        }
    }
}
