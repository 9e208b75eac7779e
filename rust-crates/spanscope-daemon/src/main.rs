//! spanscope daemon - devtools span server
//!
//! Listens for instrumented programs streaming spans over TCP and keeps the most
//! recent spans of every connected client. Controlled through a Unix socket
//! (`start`, `stop`, `select <id>`, `status`, `clients`, `spans`).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use spanscope_clients::{Clients, CommandRegistry, SocketGateway};
use spanscope_daemon::config::DaemonConfig;
use spanscope_daemon::ipc::IpcServer;

/// Command line overrides for the configuration file
#[derive(Debug, Parser)]
#[command(name = "spanscope-daemon", version, about = "Devtools span server")]
struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the span server listens on
    #[arg(long)]
    listen: Option<String>,

    /// Control socket path
    #[arg(long)]
    ipc_socket: Option<String>,

    /// Start the span server immediately
    #[arg(long)]
    autostart: bool,
}

impl Args {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(ipc_socket) = self.ipc_socket {
            config.ipc_socket_path = ipc_socket;
        }
        if self.autostart {
            config.autostart = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    info!("Starting spanscope daemon v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;
    args.apply(&mut config);

    info!("Configuration loaded from {}", config.config_path.display());

    let gateway = Arc::new(SocketGateway::new(config.listen_addr.clone()));
    let bridge = Arc::new(CommandRegistry::new());
    let clients = Arc::new(
        Clients::new(Arc::clone(&gateway), bridge.clone(), config.clients_config())
            .context("Failed to register commands")?,
    );

    if config.autostart {
        clients.start().await;
    }

    let ipc_server = IpcServer::new(
        &config.ipc_socket_path,
        Arc::clone(&clients),
        Arc::clone(&gateway),
        Arc::clone(&bridge),
    )
    .context("Failed to start IPC server")?;

    info!("spanscope daemon ready (span server on {})", config.listen_addr);

    tokio::select! {
        result = ipc_server.run() => {
            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down...");
    clients.stop().await;
    drop(ipc_server);
    info!("spanscope daemon stopped");

    Ok(())
}
