//! Knockgate CLI - Port-knocking daemon
//!
//! Watches a sequence of decoy ports and opens the protected port for
//! clients that knock on them in the right order.

mod commands;

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "knockgate")]
#[command(author, version, about = "Open a protected port after a valid knock sequence")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for knocks (default)
    Run {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Log firewall changes instead of running iptables
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Save the effective configuration to this file
        #[arg(long, value_name = "FILE")]
        write: Option<PathBuf>,
    },
}

/// Settings shared by every command. Flags override the config file.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Comma-separated knock ports
    #[arg(short, long, value_delimiter = ',', value_name = "PORTS")]
    sequence: Option<Vec<u16>>,

    /// Protected service port
    #[arg(short, long, value_name = "PORT")]
    protected_port: Option<u16>,

    /// Seconds allowed to complete the sequence
    #[arg(short, long, value_name = "SECS")]
    window: Option<f64>,

    /// Address to bind the knock ports on
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<IpAddr>,

    /// Maximum wait between housekeeping passes, in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Close the protected port again this many seconds after opening it
    #[arg(long, value_name = "SECS")]
    relock_after: Option<f64>,

    /// Give up on a firewall change after this many milliseconds
    #[arg(long, value_name = "MS")]
    firewall_timeout_ms: Option<u64>,

    /// Path to the iptables binary
    #[arg(long, value_name = "PATH")]
    iptables: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Run { settings, dry_run }) => {
            let config = commands::settings::resolve(&settings).await?;
            commands::run::run(config, dry_run).await?;
        }
        Some(Commands::Config { settings, write }) => {
            let config = commands::settings::resolve(&settings).await?;
            commands::config::show(&config, cli.json, write).await?;
        }
        None => {
            // Default: listen with the built-in settings
            let config = commands::settings::resolve(&SettingsArgs::default()).await?;
            commands::run::run(config, false).await?;
        }
    }

    Ok(())
}
