use thiserror::Error;

/// Failures raised by a [`ServerGateway`](crate::gateway::ServerGateway) or one of its sources.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Line exceeds maximum length")]
    LineTooLong,

    #[error("Connection queue closed")]
    Closed,
}

/// Failures raised while registering or dispatching bridge commands.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command already registered: {0}")]
    DuplicateCommand(String),

    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error("Command failed: {0}")]
    Handler(String),
}

impl BridgeError {
    pub fn invalid_argument<C: Into<String>, R: Into<String>>(command: C, reason: R) -> Self {
        Self::InvalidArgument {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
