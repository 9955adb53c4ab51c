//! Clipmesh CLI - shared clipboard for the local network.

mod commands;
mod prompt;
mod ui;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipmesh_core::Config;
use tracing_subscriber::EnvFilter;

use crate::commands::RunOptions;

#[derive(Parser)]
#[command(name = "clipmesh")]
#[command(about = "Shared clipboard for devices on the local network", long_about = None)]
struct Cli {
    /// Device name to advertise
    #[arg(short, long, default_value_t = default_device_name())]
    name: String,

    /// Port to listen on (0 picks a free one)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for configuration and trusted devices
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: config.json in the data directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "clipmesh-device".to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Join the clipboard group (default)
    Run {
        /// Connect to a device directly, repeatable
        #[arg(long = "peer", value_name = "HOST:PORT")]
        peers: Vec<SocketAddr>,

        /// Admit unknown devices without asking
        #[arg(long)]
        accept_unknown: bool,

        /// Do not advertise or browse via mDNS
        #[arg(long)]
        no_discovery: bool,
    },
    /// Show device info
    Info,
    /// List devices advertising on the network
    Discover {
        /// How long to browse
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = Config::load(path)?;
                if let Some(dir) = &self.data_dir {
                    config.data_dir = dir.clone();
                }
                config
            }
            None => {
                let dir = self
                    .data_dir
                    .clone()
                    .unwrap_or_else(|| Config::default().data_dir);
                Config::load_or_default(&dir)?
            }
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("clipmesh=info".parse()?)
                .add_directive("clipmesh_core=info".parse()?)
                .add_directive("mdns_sd=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        None => commands::run_service(cli.name, config, RunOptions::default()).await?,
        Some(Commands::Run {
            peers,
            accept_unknown,
            no_discovery,
        }) => {
            let options = RunOptions {
                peers,
                accept_unknown,
                no_discovery,
            };
            commands::run_service(cli.name, config, options).await?
        }
        Some(Commands::Info) => commands::show_info(cli.name, &config)?,
        Some(Commands::Discover { seconds }) => commands::discover(&config, seconds).await?,
    }

    Ok(())
}
