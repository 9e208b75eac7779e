use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::bridge::{
    handler, CommandBridge, RUNNING_CONTEXT_KEY, SELECT_CLIENT, SET_CONTEXT, START_SERVER,
    STOP_SERVER,
};
use crate::buffer::DEFAULT_CAPACITY;
use crate::cell::SubscriptionCell;
use crate::client::{Client, ClientId, ClientRegistry, ClientSet};
use crate::controller::{RunController, DEFAULT_RETRY_DELAY};
use crate::error::BridgeError;
use crate::gateway::ServerGateway;
use crate::selector::ActiveClientSelector;

/// Tunables for [`Clients`]
#[derive(Debug, Clone)]
pub struct ClientsConfig {
    /// Spans retained per client before the oldest are dropped
    pub buffer_capacity: usize,
    /// Delay before restarting a failed accept loop
    pub retry_delay: Duration,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Registry, selector and controller wired to a gateway and a command bridge
///
/// Construction registers `select-client`, `start-server` and `stop-server` on the
/// bridge and publishes `set-context("running", ..)` every time the running flag
/// changes. Must be created inside a tokio runtime.
pub struct Clients<G: ServerGateway> {
    registry: Arc<ClientRegistry<G::Span>>,
    controller: Arc<RunController<G>>,
    context_task: JoinHandle<()>,
}

impl<G: ServerGateway> Clients<G> {
    pub fn new(
        gateway: Arc<G>,
        bridge: Arc<dyn CommandBridge>,
        config: ClientsConfig,
    ) -> Result<Self, BridgeError> {
        let registry = Arc::new(ClientRegistry::new(config.buffer_capacity));
        let controller = Arc::new(RunController::new(
            gateway,
            Arc::clone(&registry),
            config.retry_delay,
        ));

        let selector = Arc::clone(registry.selector());
        bridge.register_command(
            SELECT_CLIENT,
            handler(move |args| {
                let selector = Arc::clone(&selector);
                async move {
                    let id = parse_client_id(&args)?;
                    Ok::<_, BridgeError>(Value::Bool(selector.select(id)))
                }
            }),
        )?;

        // The bridge outlives us; only `Clients` keeps the controller alive
        let start = Arc::downgrade(&controller);
        bridge.register_command(
            START_SERVER,
            handler(move |_| {
                let controller = start.clone();
                async move {
                    upgrade(&controller)?.start().await;
                    Ok::<_, BridgeError>(Value::Null)
                }
            }),
        )?;

        let stop = Arc::downgrade(&controller);
        bridge.register_command(
            STOP_SERVER,
            handler(move |_| {
                let controller = stop.clone();
                async move {
                    upgrade(&controller)?.stop().await;
                    Ok::<_, BridgeError>(Value::Null)
                }
            }),
        )?;

        let mut running = controller.running().subscribe();
        let context_task = tokio::spawn(async move {
            loop {
                let value = *running.borrow_and_update();
                if let Err(e) =
                    bridge.execute_command(SET_CONTEXT, vec![json!(RUNNING_CONTEXT_KEY), json!(value)])
                {
                    tracing::warn!("Failed to publish running context: {}", e);
                }
                if running.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            registry,
            controller,
            context_task,
        })
    }

    /// Reactive handle on the registered clients
    pub fn clients(&self) -> &SubscriptionCell<ClientSet<G::Span>> {
        self.registry.clients()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry<G::Span>> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ActiveClientSelector<G::Span>> {
        self.registry.selector()
    }

    pub fn active_client(&self) -> Option<Client<G::Span>> {
        self.registry.selector().active()
    }

    pub fn select(&self, id: ClientId) -> bool {
        self.registry.selector().select(id)
    }

    pub fn controller(&self) -> &Arc<RunController<G>> {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub async fn start(&self) {
        self.controller.start().await;
    }

    pub async fn stop(&self) {
        self.controller.stop().await;
    }

    /// Stop the server and wait for every client to be released
    pub async fn shutdown(self) {
        self.controller.stop().await;
    }
}

impl<G: ServerGateway> Drop for Clients<G> {
    fn drop(&mut self) {
        // Dropping the controller aborts a running server; the publisher ends with it.
        self.context_task.abort();
    }
}

fn upgrade<G: ServerGateway>(
    controller: &Weak<RunController<G>>,
) -> Result<Arc<RunController<G>>, BridgeError> {
    controller
        .upgrade()
        .ok_or_else(|| BridgeError::Handler("span server controller is gone".to_string()))
}

fn parse_client_id(args: &[Value]) -> Result<ClientId, BridgeError> {
    match args.first() {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| BridgeError::invalid_argument(SELECT_CLIENT, "id must be a non-negative integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| BridgeError::invalid_argument(SELECT_CLIENT, format!("invalid id: {}", s))),
        _ => Err(BridgeError::invalid_argument(SELECT_CLIENT, "missing client id")),
    }
}
