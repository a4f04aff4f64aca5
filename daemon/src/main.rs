//! Witness daemon: entry point for running a witness node.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use witness_node::{init_logging, load_or_create_keypair, NodeConfig, WitnessNode};

#[derive(Parser)]
#[command(name = "witness-daemon", about = "Witness protocol node daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "WITNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Actor name this node signs as.
    #[arg(long, env = "WITNESS_NAME")]
    name: Option<String>,

    /// Address to listen on for P2P connections.
    #[arg(long, env = "WITNESS_LISTEN")]
    listen: Option<SocketAddr>,

    /// Directory holding the node key.
    #[arg(long, env = "WITNESS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Bootstrap peer addresses (comma-separated: "10.0.0.1:7400,10.0.0.2:7400").
    #[arg(long, env = "WITNESS_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "WITNESS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "WITNESS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start the node.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Create the node key if missing and print the node identity.
    Keygen,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
}

impl Cli {
    /// File (or default) configuration with CLI flags applied on top.
    fn resolve_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_logging(config.log_format()?, &config.log_level)?;

    match cli.command {
        Command::Keygen => {
            let keypair = load_or_create_keypair(&config.key_path())?;
            println!("{}", keypair.identity.to_hex());
        }
        Command::Node { action } => match action {
            NodeAction::Run => {
                if !config.bootstrap_peers.is_empty() {
                    tracing::info!("Bootstrap peers: {}", config.bootstrap_peers.join(", "));
                }
                let mut node = WitnessNode::new(config)?;
                let addr = node.start().await?;
                tracing::info!(%addr, identity = %node.identity().to_hex(), "witness node running");

                node.wait_for_signal().await;
                node.shutdown().await?;

                tracing::info!("witness daemon exited cleanly");
            }
        },
    }

    Ok(())
}
