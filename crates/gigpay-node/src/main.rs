use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

mod api;
mod config;
mod logging;
mod node;

#[derive(Parser)]
#[command(name = "gigpay")]
#[command(about = "GigPay Core - Ledger Reconciliation Node", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Host for the HTTP API
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP API
        #[arg(long)]
        api_port: Option<u16>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for the configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

const DEFAULT_CONFIG_PATH: &str = "./gigpay-config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Start { host, api_port } => {
            // Priority order: CLI args > env vars > config file > defaults
            let mut config = if let Some(ref config_path) = cli.config {
                config::NodeConfig::from_file(config_path)?
            } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
                config::NodeConfig::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            } else {
                config::NodeConfig::default()
            };
            config.apply_env_overrides();
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = api_port {
                config.api.port = port;
            }

            info!(
                name = %config.node.name,
                api_host = %config.api.host,
                api_port = config.api.port,
                "🚀 Starting GigPay node"
            );

            let node = node::GigpayNode::new(config.clone()).await?;

            let api_handle = if config.api.enabled {
                Some(api::start_api_server(
                    node.engine.clone(),
                    config.api.host.clone(),
                    config.api.port,
                ))
            } else {
                None
            };

            let node = std::sync::Arc::new(node);
            let runner = node.clone();
            let node_handle = tokio::spawn(async move { runner.run().await });

            info!("✅ Node ready");

            tokio::signal::ctrl_c().await?;
            info!("🛑 Shutting down gracefully");

            node.stop().await;
            if let Some(handle) = api_handle {
                handle.abort();
            }
            node_handle.abort();

            Ok(())
        }

        Commands::Init { output } => {
            std::fs::create_dir_all(&output)?;
            let config = config::NodeConfig::default();
            let config_path = output.join("gigpay-config.toml");
            config.save_to_file(&config_path)?;
            info!(path = ?config_path, "✅ Configuration saved");
            Ok(())
        }
    }
}
