//! Jarvis CLI — the main entry point.
//!
//! Commands:
//! - `serve`     — Start the WebSocket/REST gateway
//! - `chat`      — Talk to the assistant in the terminal
//! - `tools`     — List the enabled tools and their schemas
//! - `sessions`  — List or delete stored sessions
//! - `config`    — Show, locate or initialise the config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "jarvis", about = "Jarvis — voice assistant backend", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.jarvis/config.toml
    #[arg(short, long, global = true, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// List enabled tools
    Tools,

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Show the active configuration
    Config {
        /// Write a starter config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,

        /// Print the config file location only
        #[arg(long, conflicts_with = "init")]
        path: bool,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, most recent first
    List,
    /// Delete a session and its messages
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(config_path, host, port).await?,
        Commands::Chat { message, session } => {
            commands::chat::run(config_path, message, session).await?
        }
        Commands::Tools => commands::tools::run(config_path).await?,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list(config_path).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(config_path, &id).await?,
        },
        Commands::Config { init, force, path } => {
            if path {
                commands::config_cmd::path(config_path)
            } else if init {
                commands::config_cmd::init(config_path, force)?
            } else {
                commands::config_cmd::show(config_path)?
            }
        }
    }

    Ok(())
}
