//! winksock CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use winksock_cli::commands::{self, channel, config};
use winksock_cli::output::print_error;
use winksock_client::{ChannelMode, ConnectionRegistry};

#[derive(Parser)]
#[command(name = "winksock")]
#[command(author, version, about = "Multiplexed channel client for winksock/1 servers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log level (error, warn, info, debug, trace); overrides -v/-q
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Do not follow handshake redirects
    #[arg(long, global = true)]
    no_redirects: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a channel and print incoming data and signals
    Listen {
        /// Channel address, e.g. auth@host:port/1234?token
        address: String,
        /// Mode to open with (r, rw, r+e, rwe or bits)
        #[arg(short, long, default_value = "r", value_parser = commands::parse_mode)]
        mode: ChannelMode,
        /// Token sent with the OPEN request (overrides the address token)
        #[arg(short, long)]
        token: Option<String>,
        /// Exit after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Send one message on a channel
    Send {
        /// Channel address
        address: String,
        /// Message to send
        message: String,
        /// Priority (0-3)
        #[arg(short, long, default_value_t = 0)]
        priority: u8,
        /// Mark the payload as binary instead of UTF-8
        #[arg(short, long)]
        binary: bool,
        /// Token sent with the OPEN request
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Emit one signal on a channel
    Emit {
        /// Channel address
        address: String,
        /// Signal payload
        message: String,
        /// Token sent with the OPEN request
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

/// Load config and apply command-line overrides
fn build_registry(config_path: Option<&Path>, no_redirects: bool) -> Result<ConnectionRegistry> {
    let mut client_config = config::load(config_path)?;
    if no_redirects {
        client_config.follow_redirects = false;
    }
    tracing::debug!("Client config: {:?}", client_config);
    Ok(ConnectionRegistry::new(client_config))
}

async fn run(command: Commands, config_path: Option<&Path>, no_redirects: bool) -> Result<()> {
    match command {
        Commands::Config { action } => match action {
            ConfigAction::Show => config::config_show(config_path),
            ConfigAction::Init { force } => config::config_init(config_path, force),
            ConfigAction::Path => {
                println!("{}", config::resolve_path(config_path).display());
                Ok(())
            }
        },
        Commands::Listen {
            address,
            mode,
            token,
            count,
        } => {
            let registry = build_registry(config_path, no_redirects)?;
            channel::listen(&registry, &address, mode, token, count).await
        }
        Commands::Send {
            address,
            message,
            priority,
            binary,
            token,
        } => {
            let registry = build_registry(config_path, no_redirects)?;
            channel::send(&registry, &address, &message, priority, binary, token).await
        }
        Commands::Emit {
            address,
            message,
            token,
        } => {
            let registry = build_registry(config_path, no_redirects)?;
            channel::emit(&registry, &address, &message, token).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.log_level.as_deref(), cli.quiet, cli.verbose) {
        (Some(level), _, _) => level,
        (None, true, _) => "error",
        (None, false, 0) => "warn",
        (None, false, 1) => "info",
        (None, false, 2) => "debug",
        (None, false, _) => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    let result = run(cli.command, config_path, cli.no_redirects).await;

    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
