use std::time::Duration;
use thiserror::Error;

/// Failures observed at the page/host boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native function '{name}' is not registered by the host")]
    UnresolvedFunction { name: String },

    #[error("native function '{name}' failed: {message}")]
    NativeCallFailure { name: String, message: String },

    #[error("native function '{name}' did not answer within {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("host dropped the response to '{name}' without answering")]
    ResponseDropped { name: String },

    #[error("native function '{name}' needs a Tokio runtime to time out")]
    RuntimeUnavailable { name: String },

    #[error("payload does not have the expected shape: {0}")]
    PayloadDecode(#[from] serde_json::Error),

    #[error("handler for event '{event}' failed: {message}")]
    EventHandlerFailure { event: String, message: String },
}

impl BridgeError {
    /// Name of the native function involved, if any.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Self::UnresolvedFunction { name }
            | Self::NativeCallFailure { name, .. }
            | Self::Timeout { name, .. }
            | Self::ResponseDropped { name }
            | Self::RuntimeUnavailable { name } => Some(name),
            _ => None,
        }
    }
}
