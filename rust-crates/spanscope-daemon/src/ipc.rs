//! Unix socket IPC server for control commands
//!
//! One command per line; one response per command. `start`, `stop` and
//! `select <id>` go through the command bridge so they behave exactly like the
//! UI actions.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use spanscope_clients::bridge::{SELECT_CLIENT, START_SERVER, STOP_SERVER};
use spanscope_clients::{Clients, CommandRegistry, SocketGateway};

use crate::socket_utils::restrict_to_owner;

/// IPC command
#[derive(Debug, PartialEq)]
enum IpcCommand {
    Start,
    Stop,
    Select(u64),
    Status,
    Clients,
    Spans,
}

impl IpcCommand {
    fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let command = parts.next().unwrap_or_default().to_lowercase();

        match command.as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "select" => {
                let id = parts
                    .next()
                    .context("select requires a client id")?
                    .parse()
                    .context("client id must be a non-negative integer")?;
                Ok(Self::Select(id))
            }
            "status" => Ok(Self::Status),
            "clients" => Ok(Self::Clients),
            "spans" => Ok(Self::Spans),
            _ => anyhow::bail!("Unknown command: {}", s.trim()),
        }
    }
}

/// Snapshot returned by the `status` command
#[derive(Debug, Serialize)]
struct StatusReport {
    running: bool,
    listen_addr: Option<String>,
    clients: usize,
    active_client: Option<u64>,
}

/// Entry returned by the `clients` command
#[derive(Debug, Serialize)]
struct ClientReport {
    id: u64,
    buffered: usize,
    active: bool,
}

/// State shared by every IPC connection
struct IpcContext {
    clients: Arc<Clients<SocketGateway>>,
    gateway: Arc<SocketGateway>,
    bridge: Arc<CommandRegistry>,
}

/// Unix socket IPC server
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    context: Arc<IpcContext>,
}

impl IpcServer {
    /// Create new IPC server
    pub fn new(
        socket_path: impl AsRef<Path>,
        clients: Arc<Clients<SocketGateway>>,
        gateway: Arc<SocketGateway>,
        bridge: Arc<CommandRegistry>,
    ) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        // Remove a stale socket left by a previous run
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .context("Failed to bind Unix socket")?;
        restrict_to_owner(&socket_path)?;

        info!("IPC server listening on {} (permissions: 0600)", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
            context: Arc::new(IpcContext {
                clients,
                gateway,
                bridge,
            }),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per connection
    pub async fn run(&self) -> Result<()> {
        loop {
            let (stream, _) = self.listener.accept().await
                .context("Failed to accept connection")?;

            let context = Arc::clone(&self.context);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, context).await {
                    error!("IPC connection error: {}", e);
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Handle a single IPC connection
async fn handle_connection(stream: UnixStream, context: Arc<IpcContext>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received IPC command: {}", line.trim());

        let response = match IpcCommand::parse(&line) {
            Ok(command) => match execute(command, &context).await {
                Ok(response) => response,
                Err(e) => format!("Error: {}\n", e),
            },
            Err(e) => format!("Error: {}\n", e),
        };

        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn execute(command: IpcCommand, context: &IpcContext) -> Result<String> {
    let response = match command {
        IpcCommand::Start => {
            context.bridge.invoke(START_SERVER, vec![]).await?;
            "Server started\n".to_string()
        }
        IpcCommand::Stop => {
            context.bridge.invoke(STOP_SERVER, vec![]).await?;
            "Server stopped\n".to_string()
        }
        IpcCommand::Select(id) => {
            let selected = context.bridge.invoke(SELECT_CLIENT, vec![json!(id)]).await?;
            if selected.as_bool().unwrap_or(false) {
                format!("Client {} selected\n", id)
            } else {
                format!("Client {} not connected\n", id)
            }
        }
        IpcCommand::Status => {
            let report = StatusReport {
                running: context.clients.is_running(),
                listen_addr: context.gateway.local_addr().map(|addr| addr.to_string()),
                clients: context.clients.registry().client_count(),
                active_client: context.clients.selector().active_id(),
            };
            format!("{}\n", serde_json::to_string(&report)?)
        }
        IpcCommand::Clients => {
            let active = context.clients.selector().active_id();
            let reports: Vec<ClientReport> = context.clients.clients().with(|set| {
                set.values()
                    .map(|client| ClientReport {
                        id: client.id(),
                        buffered: client.spans().len(),
                        active: Some(client.id()) == active,
                    })
                    .collect()
            });
            format!("{}\n", serde_json::to_string(&reports)?)
        }
        IpcCommand::Spans => {
            let mut out = String::new();
            if let Some(client) = context.clients.active_client() {
                for span in client.spans().drain() {
                    out.push_str(&span.to_json_line()?);
                }
            }
            // Blank line terminates the batch
            out.push('\n');
            out
        }
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(IpcCommand::parse("start").unwrap(), IpcCommand::Start);
        assert_eq!(IpcCommand::parse("  STOP \n").unwrap(), IpcCommand::Stop);
        assert_eq!(IpcCommand::parse("select 4").unwrap(), IpcCommand::Select(4));
        assert_eq!(IpcCommand::parse("status").unwrap(), IpcCommand::Status);
        assert_eq!(IpcCommand::parse("clients").unwrap(), IpcCommand::Clients);
        assert_eq!(IpcCommand::parse("spans").unwrap(), IpcCommand::Spans);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(IpcCommand::parse("select").is_err());
        assert!(IpcCommand::parse("select x").is_err());
        assert!(IpcCommand::parse("toggle").is_err());
        assert!(IpcCommand::parse("").is_err());
    }
}
