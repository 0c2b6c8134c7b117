//! chatdeck CLI, the main entry point.
//!
//! Commands:
//! - `onboard`  Write a default config
//! - `chat`     Sign in and chat interactively
//! - `history`  Print a stored conversation
//! - `status`   Show the effective configuration

use chatdeck_config::{AppConfig, LoggingConfig};
use clap::{Parser, Subcommand};

mod backend;
mod commands;

#[derive(Parser)]
#[command(
    name = "chatdeck",
    about = "chatdeck: a terminal chat workspace with a simulated assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory and a default config file
    Onboard,

    /// Sign in and start an interactive conversation
    Chat {
        #[command(flatten)]
        credentials: Credentials,

        /// Create the account before signing in
        #[arg(long)]
        sign_up: bool,
    },

    /// Print the stored conversation for an account
    History {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Show the effective configuration
    Status,
}

#[derive(clap::Args)]
pub struct Credentials {
    /// Account email
    #[arg(short, long, env = "CHATDECK_EMAIL")]
    pub email: String,

    /// Account password
    #[arg(short, long, env = "CHATDECK_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // A broken config is reported by the command itself
    let logging = AppConfig::load().map(|c| c.logging).unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            credentials,
            sign_up,
        } => commands::chat::run(credentials, sign_up).await?,
        Commands::History { credentials } => commands::history::run(credentials).await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}

/// Logs go to stderr so the transcript on stdout stays clean.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
