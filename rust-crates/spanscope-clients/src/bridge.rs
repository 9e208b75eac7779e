//! Named command surface between the UI and the span server
//!
//! The UI binds actions through a [`CommandBridge`]: incoming actions are
//! registered handlers, and outgoing state (such as the running flag) is pushed
//! back through [`CommandBridge::execute_command`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::BridgeError;

/// Select the client whose spans are surfaced: `select-client(id)`
pub const SELECT_CLIENT: &str = "select-client";
/// Start the span server: `start-server()`
pub const START_SERVER: &str = "start-server";
/// Stop the span server: `stop-server()`
pub const STOP_SERVER: &str = "stop-server";
/// Publish a context value outward: `set-context(key, value)`
pub const SET_CONTEXT: &str = "set-context";
/// Context key carrying the running flag
pub const RUNNING_CONTEXT_KEY: &str = "running";

pub type CommandFuture = Pin<Box<dyn Future<Output = Result<Value, BridgeError>> + Send>>;
pub type CommandHandler = Arc<dyn Fn(Vec<Value>) -> CommandFuture + Send + Sync>;

/// Wrap an async closure as a [`CommandHandler`]
pub fn handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BridgeError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Host-side command binding
pub trait CommandBridge: Send + Sync {
    /// Bind `name` to `handler`
    fn register_command(&self, name: &str, handler: CommandHandler) -> Result<(), BridgeError>;

    /// Push a command outward for the UI to reflect
    fn execute_command(&self, name: &str, args: Vec<Value>) -> Result<(), BridgeError>;
}

/// Command pushed outward through [`CommandBridge::execute_command`]
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub name: String,
    pub args: Vec<Value>,
}

/// In-process [`CommandBridge`]
///
/// Keeps the handler table, remembers every value published with
/// [`SET_CONTEXT`] and rebroadcasts outbound commands to subscribers.
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, CommandHandler>>,
    context: RwLock<HashMap<String, Value>>,
    outbound: broadcast::Sender<OutboundCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(64);
        Self {
            handlers: RwLock::new(HashMap::new()),
            context: RwLock::new(HashMap::new()),
            outbound,
        }
    }

    /// Dispatch an incoming action to its handler
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))?;

        tracing::debug!("Invoking command {}", name);
        handler(args).await
    }

    /// Last value published for `key`
    pub fn context(&self, key: &str) -> Option<Value> {
        self.context.read().get(key).cloned()
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Outbound commands published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundCommand> {
        self.outbound.subscribe()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBridge for CommandRegistry {
    fn register_command(&self, name: &str, handler: CommandHandler) -> Result<(), BridgeError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(name) {
            return Err(BridgeError::DuplicateCommand(name.to_string()));
        }
        handlers.insert(name.to_string(), handler);
        tracing::debug!("Registered command {}", name);
        Ok(())
    }

    fn execute_command(&self, name: &str, args: Vec<Value>) -> Result<(), BridgeError> {
        if name == SET_CONTEXT {
            let (key, value) = match args.as_slice() {
                [Value::String(key), value] => (key.clone(), value.clone()),
                _ => {
                    return Err(BridgeError::invalid_argument(
                        name,
                        "expected a string key and a value",
                    ))
                }
            };
            tracing::debug!("Context {} = {}", key, value);
            self.context.write().insert(key, value);
        }

        // No subscribers is fine; the context map still holds the latest value.
        let _ = self.outbound.send(OutboundCommand {
            name: name.to_string(),
            args,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_registered_handler() {
        let registry = CommandRegistry::new();
        registry
            .register_command(
                "echo",
                handler(|args| async move {
                    Ok::<_, BridgeError>(args.into_iter().next().unwrap_or(Value::Null))
                }),
            )
            .unwrap();

        let result = registry.invoke("echo", vec![json!(7)]).await.unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(registry.commands(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let registry = CommandRegistry::new();
        let result = registry.invoke("missing", vec![]).await;
        assert!(matches!(result, Err(BridgeError::UnknownCommand(name)) if name == "missing"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = CommandRegistry::new();
        registry
            .register_command("noop", handler(|_| async { Ok::<_, BridgeError>(Value::Null) }))
            .unwrap();
        let second = registry.register_command("noop", handler(|_| async { Ok::<_, BridgeError>(Value::Null) }));
        assert!(matches!(second, Err(BridgeError::DuplicateCommand(_))));
    }

    #[tokio::test]
    async fn test_set_context_is_recorded_and_broadcast() {
        let registry = CommandRegistry::new();
        let mut rx = registry.subscribe();

        registry
            .execute_command(SET_CONTEXT, vec![json!(RUNNING_CONTEXT_KEY), json!(true)])
            .unwrap();

        assert_eq!(registry.context(RUNNING_CONTEXT_KEY), Some(json!(true)));
        let outbound = rx.recv().await.unwrap();
        assert_eq!(outbound.name, SET_CONTEXT);
        assert_eq!(outbound.args, vec![json!("running"), json!(true)]);
    }

    #[test]
    fn test_set_context_requires_key() {
        let registry = CommandRegistry::new();
        let result = registry.execute_command(SET_CONTEXT, vec![json!(true)]);
        assert!(matches!(result, Err(BridgeError::InvalidArgument { .. })));
    }
}
