//! Client session registry and run controller for the spanscope devtools bridge
//!
//! Instrumented programs connect to a span server and stream trace spans. This
//! crate admits those connections, buffers each client's recent spans, tracks
//! which client the UI is currently looking at, and starts/stops the server on
//! request while recovering from transport failures.
//!
//! # Components
//!
//! - [`ServerGateway`] / [`SpanSource`] - transport seam (a TCP implementation is
//!   provided by [`SocketGateway`])
//! - [`ClientRegistry`] - admission, ids, per-client [`SpanBuffer`], cleanup
//! - [`ActiveClientSelector`] - the single active client
//! - [`RunController`] - supervised start/stop with retry
//! - [`CommandBridge`] - named UI commands (`select-client`, `start-server`,
//!   `stop-server`) and the outward `set-context("running", ..)`
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use spanscope_clients::{Clients, ClientsConfig, CommandRegistry, SocketGateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Arc::new(SocketGateway::new("127.0.0.1:34437"));
//!     let bridge = Arc::new(CommandRegistry::new());
//!     let clients = Clients::new(gateway, bridge.clone(), ClientsConfig::default())?;
//!
//!     bridge.invoke("start-server", vec![]).await?;
//!
//!     if let Some(client) = clients.active_client() {
//!         for span in client.spans().drain() {
//!             println!("{}", span.name);
//!         }
//!     }
//!
//!     clients.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod buffer;
pub mod cell;
pub mod client;
pub mod clients;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod selector;
pub mod socket;
pub mod span;

// Re-exports
pub use bridge::{CommandBridge, CommandHandler, CommandRegistry, OutboundCommand};
pub use buffer::SpanBuffer;
pub use cell::SubscriptionCell;
pub use client::{Client, ClientId, ClientRegistry, ClientSet, Membership};
pub use clients::{Clients, ClientsConfig};
pub use controller::RunController;
pub use error::{BridgeError, GatewayError, Result};
pub use gateway::{ConnectionQueue, ServerGateway, SpanSource};
pub use selector::ActiveClientSelector;
pub use socket::{JsonLinesSource, SocketGateway};
pub use span::{Span, SpanStatus};
