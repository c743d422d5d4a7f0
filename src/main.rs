//! Muxnet - Multiplexing TCP server core
//!
//! Demo binary: runs the bundled echo service on a configured port.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use muxnet::config::{self, Config};
use muxnet::network::{ConnectionHandle, Protocol, ProtocolService, ServerRegistry};
use muxnet::protocol::Message;

/// Muxnet - multiplexing TCP server core
#[derive(Parser)]
#[command(name = "muxnet")]
#[command(author = "Muxnet Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Frame, checksum and dispatch binary messages over TCP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo service
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            run_serve(config, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the echo service until interrupted
async fn run_serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.network.port);

    let registry = ServerRegistry::new(config.network.connection_settings());
    registry.add(Arc::new(EchoService), port).await?;

    println!("Echo service running on port {} - press Ctrl+C to stop", port);

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    registry.stop().await;
    tracing::info!("Server stopped");

    Ok(())
}

/// Demo protocol: echoes every message body back to the peer
struct EchoService;

impl ProtocolService for EchoService {
    fn protocol_name(&self) -> &str {
        "echo"
    }

    fn protocol_identifier(&self) -> u8 {
        0x01
    }

    fn make_protocol(&self, handle: ConnectionHandle) -> Box<dyn Protocol> {
        Box::new(EchoProtocol { handle })
    }
}

struct EchoProtocol {
    handle: ConnectionHandle,
}

impl EchoProtocol {
    async fn echo(&self, message: &mut Message) {
        let Ok(payload) = message.get_bytes(message.remaining()) else {
            return;
        };
        if payload.is_empty() {
            return;
        }

        let mut reply = Message::new();
        if reply.add_bytes(&payload).is_err() {
            return;
        }
        if let Err(e) = self.handle.send_message(&reply).await {
            tracing::debug!("Echo reply failed: {}", e);
        }
    }
}

#[async_trait]
impl Protocol for EchoProtocol {
    async fn on_first_message(&mut self, mut message: Message) {
        self.echo(&mut message).await;
    }

    async fn on_message(&mut self, mut message: Message) {
        self.echo(&mut message).await;
    }
}
