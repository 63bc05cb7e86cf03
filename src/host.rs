use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bridge_api::{Completion, EventListener, HostEvent, InitialisationData, NativeFunction, Value};

/// Identifies a listener registered with a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Contract of the bridge object the native host injects into the page.
///
/// The page only ever looks up callables by name and listens for named
/// events; everything else about the host stays behind this trait.
pub trait Host: Send + Sync {
    /// Single lookup in the host's function registry.
    fn native_function(&self, name: &str) -> Option<NativeFunction>;

    /// Register a listener for `event`. Listeners for the same event are
    /// called in registration order.
    fn add_event_listener(&self, event: &str, listener: EventListener) -> ListenerId;

    /// Returns false if the id was unknown.
    fn remove_event_listener(&self, id: ListenerId) -> bool;

    fn initialisation_data(&self) -> InitialisationData {
        InitialisationData::new()
    }
}

type ListenerTable = HashMap<String, Vec<(ListenerId, EventListener)>>;

/// In-process host: a function registry plus an event emitter.
pub struct NativeBackend {
    functions: RwLock<HashMap<String, NativeFunction>>,
    listeners: RwLock<ListenerTable>,
    next_listener_id: AtomicU64,
    initialisation_data: RwLock<InitialisationData>,
    visible: AtomicBool,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            initialisation_data: RwLock::new(InitialisationData::new()),
            visible: AtomicBool::new(true),
        }
    }

    pub fn with_native_function<F>(self, name: &str, function: F) -> Self
    where
        F: Fn(Vec<Value>, Completion) + Send + Sync + 'static,
    {
        self.register_native_function(name, function);
        self
    }

    pub fn with_initialisation_data(self, key: &str, value: impl Into<Value>) -> Self {
        self.initialisation_data
            .write()
            .insert(key.to_string(), value.into());
        self
    }

    /// Registers (or replaces) a native function.
    pub fn register_native_function<F>(&self, name: &str, function: F)
    where
        F: Fn(Vec<Value>, Completion) + Send + Sync + 'static,
    {
        let replaced = self
            .functions
            .write()
            .insert(name.to_string(), Arc::new(function))
            .is_some();

        if replaced {
            log::warn!("Replaced native function: {}", name);
        } else {
            log::info!("Registered native function: {}", name);
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        log::info!(
            "Webview visibility changed to {}",
            if visible { "visible" } else { "hidden" }
        );
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Push an event to every listener of `name`. Returns how many were called.
    pub fn emit_event(&self, name: &str, payload: impl Into<Value>) -> usize {
        let payload = payload.into();

        // Snapshot so listeners may add or remove listeners while being called.
        let callbacks: Vec<EventListener> = match self.listeners.read().get(name) {
            Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
            None => Vec::new(),
        };

        if callbacks.is_empty() {
            log::debug!("Event '{}' emitted with no listeners", name);
            return 0;
        }

        for callback in &callbacks {
            callback(&payload);
        }

        log::debug!("Event '{}' delivered to {} listener(s)", name, callbacks.len());
        callbacks.len()
    }

    pub fn emit(&self, event: &HostEvent) -> usize {
        self.emit_event(&event.name, event.payload.clone())
    }

    /// Like `emit_event`, but drops the event while the webview is hidden.
    pub fn emit_event_if_visible(&self, name: &str, payload: impl Into<Value>) -> usize {
        if !self.is_visible() {
            log::debug!("Webview hidden, dropping event '{}'", name);
            return 0;
        }
        self.emit_event(name, payload)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for NativeBackend {
    fn native_function(&self, name: &str) -> Option<NativeFunction> {
        self.functions.read().get(name).cloned()
    }

    fn add_event_listener(&self, event: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .entry(event.to_string())
            .or_insert_with(Vec::new)
            .push((id, listener));

        log::info!("Registered event listener for: {}", event);
        id
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;

        listeners.retain(|event, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.len() != before {
                removed = true;
                log::info!("Unregistered event listener for: {}", event);
            }
            !entries.is_empty()
        });

        removed
    }

    fn initialisation_data(&self) -> InitialisationData {
        self.initialisation_data.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, EventListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: EventListener = Arc::new(move |payload: &Value| sink.lock().push(payload.clone()));
        (seen, listener)
    }

    #[test]
    fn lookup_registered_and_missing_functions() {
        let backend = NativeBackend::new().with_native_function("echo", |args, completion| {
            completion.resolve(args.into_iter().next().unwrap_or(Value::Null));
        });

        assert!(backend.native_function("echo").is_some());
        assert!(backend.native_function("missing").is_none());
    }

    #[test]
    fn emit_reaches_only_matching_listeners() {
        let backend = NativeBackend::new();
        let (seen, listener) = recorder();
        let (other, other_listener) = recorder();
        backend.add_event_listener("meter", listener);
        backend.add_event_listener("preset", other_listener);

        assert_eq!(backend.emit(&HostEvent::new("meter", 0.25)), 1);
        assert_eq!(*seen.lock(), vec![json!(0.25)]);
        assert!(other.lock().is_empty());
    }

    #[test]
    fn removed_listener_no_longer_called() {
        let backend = NativeBackend::new();
        let (seen, listener) = recorder();
        let id = backend.add_event_listener("meter", listener);

        assert!(backend.remove_event_listener(id));
        assert!(!backend.remove_event_listener(id));
        assert_eq!(backend.listener_count("meter"), 0);
        assert_eq!(backend.emit_event("meter", 1), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn hidden_webview_drops_gated_events() {
        let backend = NativeBackend::new();
        let (seen, listener) = recorder();
        backend.add_event_listener("meter", listener);

        backend.set_visible(false);
        assert_eq!(backend.emit_event_if_visible("meter", 1), 0);
        assert_eq!(backend.emit_event("meter", 2), 1);

        backend.set_visible(true);
        assert_eq!(backend.emit_event_if_visible("meter", 3), 1);
        assert_eq!(*seen.lock(), vec![json!(2), json!(3)]);
    }

    #[test]
    fn initialisation_data_is_published() {
        let backend = NativeBackend::new()
            .with_initialisation_data("vendor", "ACME")
            .with_initialisation_data("pluginVersion", "1.0.0");

        let data = backend.initialisation_data();
        assert_eq!(data.get("vendor"), Some(&json!("ACME")));
        assert_eq!(data.get("pluginVersion"), Some(&json!("1.0.0")));
    }
}
