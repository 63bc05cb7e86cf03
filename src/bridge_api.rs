use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::BridgeError;

/// Opaque value crossing the bridge: call arguments, responses and event payloads.
pub type Value = serde_json::Value;

/// Result the host hands back for a single native call.
pub type NativeResult = Result<Value, String>;

/// Receiving half of a native call; resolves once the host completes it.
pub type PendingResponse = oneshot::Receiver<NativeResult>;

/// Host-side callable. Answers through the `Completion`, now or later.
pub type NativeFunction = Arc<dyn Fn(Vec<Value>, Completion) + Send + Sync>;

/// Host-side listener for a named event.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Startup data the host publishes to the page (vendor, plugin name, ...).
pub type InitialisationData = BTreeMap<String, Value>;

/// Named, host-originated notification with an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub name: String,
    pub payload: Value,
}

impl HostEvent {
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// One-shot answer slot handed to a native function.
///
/// Dropping it without calling `resolve` or `reject` is reported to the
/// caller as `BridgeError::ResponseDropped`.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<NativeResult>,
}

impl Completion {
    pub fn channel() -> (Self, PendingResponse) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn resolve(self, value: impl Into<Value>) {
        // Receiver gone means the caller stopped waiting (timeout); nothing to do.
        let _ = self.sender.send(Ok(value.into()));
    }

    pub fn reject(self, message: impl Into<String>) {
        let _ = self.sender.send(Err(message.into()));
    }

    pub fn complete(self, result: NativeResult) {
        let _ = self.sender.send(result);
    }
}

/// Decode an opaque payload into the shape the UI layer expects.
/// The payload itself is only borrowed.
pub fn decode_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, BridgeError> {
    Ok(T::deserialize(payload)?)
}

/// Render a value as text: strings verbatim, whole numbers without a
/// fractional part (`42.0` shows as `42`), everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
