//! Page-side adapter over the host bridge object.
//!
//! The [`Bridge`] owns the page's subscription table. The host sees one
//! forwarding listener per event name; the bridge fans each event out to
//! its own subscribers, one at a time, so a failing subscriber cannot keep
//! the event from the others.

use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::bridge_api::{Completion, InitialisationData, NativeFunction, Value};
use crate::error::BridgeError;
use crate::host::{Host, ListenerId};

/// Page-side event callback. An `Err` is logged and does not affect other subscribers.
pub type EventHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of delivering one event to the page's subscribers.
#[derive(Debug, Default)]
pub struct Delivery {
    pub delivered: usize,
    pub failures: Vec<BridgeError>,
}

struct EventSlot {
    host_listener: ListenerId,
    subscribers: Vec<(SubscriptionId, EventHandler)>,
}

struct SubscriptionTable {
    host: Arc<dyn Host>,
    slots: RwLock<HashMap<String, EventSlot>>,
    next_id: AtomicU64,
    handler_failures: AtomicU64,
    // Serializes deliveries like a single page thread, while still letting a
    // handler call back into the bridge.
    dispatch_lock: ReentrantMutex<()>,
}

impl SubscriptionTable {
    fn dispatch(&self, event: &str, payload: &Value) -> Delivery {
        let _page_thread = self.dispatch_lock.lock();

        let handlers: Vec<EventHandler> = match self.slots.read().get(event) {
            Some(slot) => slot.subscribers.iter().map(|(_, h)| h.clone()).collect(),
            None => Vec::new(),
        };

        let mut delivery = Delivery::default();
        for handler in handlers {
            delivery.delivered += 1;

            let message = match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };

            log::error!("Handler for event '{}' failed: {}", event, message);
            self.handler_failures.fetch_add(1, Ordering::SeqCst);
            delivery.failures.push(BridgeError::EventHandlerFailure {
                event: event.to_string(),
                message,
            });
        }

        delivery
    }

    fn remove(&self, event: &str, id: SubscriptionId) -> bool {
        let mut slots = self.slots.write();
        let Some(slot) = slots.get_mut(event) else {
            return false;
        };

        let before = slot.subscribers.len();
        slot.subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = slot.subscribers.len() != before;

        if slot.subscribers.is_empty() {
            let host_listener = slot.host_listener;
            slots.remove(event);
            drop(slots);
            self.host.remove_event_listener(host_listener);
            log::debug!("No subscribers left for '{}', released host listener", event);
        }

        removed
    }
}

impl Drop for SubscriptionTable {
    fn drop(&mut self) {
        // The host outlives the page; release our forwarding listeners.
        for (event, slot) in self.slots.get_mut().drain() {
            self.host.remove_event_listener(slot.host_listener);
            log::debug!("Bridge dropped, released host listener for '{}'", event);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Page-side adapter over an injected [`Host`].
pub struct Bridge {
    table: Arc<SubscriptionTable>,
    call_timeout: Option<Duration>,
}

impl Bridge {
    /// `call_timeout` bounds every native call; `None` waits forever.
    pub fn new(host: Arc<dyn Host>, call_timeout: Option<Duration>) -> Self {
        Self {
            table: Arc::new(SubscriptionTable {
                host,
                slots: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                handler_failures: AtomicU64::new(0),
                dispatch_lock: ReentrantMutex::new(()),
            }),
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Look `name` up once. An unknown name still yields a handle; invoking
    /// it fails with `UnresolvedFunction`.
    pub fn resolve_native_function(&self, name: &str) -> NativeFunctionHandle {
        let function = self.table.host.native_function(name);
        if function.is_none() {
            log::warn!("Native function '{}' is not registered by the host", name);
        }

        NativeFunctionHandle {
            name: name.to_string(),
            function,
            timeout: self.call_timeout,
        }
    }

    /// Same lookup as `resolve_native_function`, failing immediately instead.
    pub fn try_resolve_native_function(&self, name: &str) -> Result<NativeFunctionHandle, BridgeError> {
        let handle = self.resolve_native_function(name);
        if handle.is_resolved() {
            Ok(handle)
        } else {
            Err(BridgeError::UnresolvedFunction {
                name: name.to_string(),
            })
        }
    }

    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.table.next_id.fetch_add(1, Ordering::SeqCst));

        let mut slots = self.table.slots.write();
        let slot = slots.entry(event.to_string()).or_insert_with(|| {
            let table: Weak<SubscriptionTable> = Arc::downgrade(&self.table);
            let event_name = event.to_string();
            let host_listener = self.table.host.add_event_listener(
                event,
                Arc::new(move |payload: &Value| {
                    let Some(table) = table.upgrade() else {
                        return;
                    };
                    let delivery = table.dispatch(&event_name, payload);
                    if !delivery.failures.is_empty() {
                        log::warn!(
                            "{} of {} handler(s) failed for event '{}'",
                            delivery.failures.len(),
                            delivery.delivered,
                            event_name
                        );
                    }
                }),
            );
            EventSlot {
                host_listener,
                subscribers: Vec::new(),
            }
        });
        slot.subscribers.push((id, Arc::new(handler)));
        drop(slots);

        log::info!("Subscribed to event: {}", event);

        Subscription {
            id,
            event: event.to_string(),
            table: Arc::downgrade(&self.table),
        }
    }

    /// Deliver `payload` to this page's subscribers of `event`, bypassing the host.
    pub fn dispatch(&self, event: &str, payload: &Value) -> Delivery {
        self.table.dispatch(event, payload)
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.table
            .slots
            .read()
            .get(event)
            .map_or(0, |slot| slot.subscribers.len())
    }

    pub fn initialisation_data(&self) -> InitialisationData {
        self.table.host.initialisation_data()
    }

    /// Total handler failures seen across all deliveries.
    pub fn handler_failures(&self) -> u64 {
        self.table.handler_failures.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`Bridge::subscribe`]. Dropping it keeps the subscription alive.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    event: String,
    table: Weak<SubscriptionTable>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns false if the bridge is gone or the subscription was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.table.upgrade() {
            Some(table) => {
                let removed = table.remove(&self.event, self.id);
                if removed {
                    log::info!("Unsubscribed from event: {}", self.event);
                }
                removed
            }
            None => false,
        }
    }
}

/// A named reference to a host callable, resolved once.
#[derive(Clone)]
pub struct NativeFunctionHandle {
    name: String,
    function: Option<NativeFunction>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for NativeFunctionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunctionHandle")
            .field("name", &self.name)
            .field("resolved", &self.function.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NativeFunctionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_resolved(&self) -> bool {
        self.function.is_some()
    }

    /// Call the host function with `args`, passed through untouched.
    ///
    /// The result is awaited the same way whether the host answers inside
    /// the call or later.
    ///
    /// With a timeout configured this must be polled inside a Tokio runtime
    /// with timers enabled. Outside any runtime it fails with
    /// `RuntimeUnavailable` before the host is called.
    pub async fn invoke<I, V>(&self, args: I) -> Result<Value, BridgeError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let Some(function) = &self.function else {
            return Err(BridgeError::UnresolvedFunction {
                name: self.name.clone(),
            });
        };

        if self.timeout.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(BridgeError::RuntimeUnavailable {
                name: self.name.clone(),
            });
        }

        let args: Vec<Value> = args.into_iter().map(Into::into).collect();
        let (completion, pending) = Completion::channel();

        log::debug!("Invoking native function '{}' with {} argument(s)", self.name, args.len());

        // A host function that panics drops its completion on unwind.
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| function(args, completion))) {
            return Err(BridgeError::NativeCallFailure {
                name: self.name.clone(),
                message: panic_message(panic.as_ref()),
            });
        }

        let answer = match self.timeout {
            Some(after) => tokio::time::timeout(after, pending)
                .await
                .map_err(|_| BridgeError::Timeout {
                    name: self.name.clone(),
                    after,
                })?,
            None => pending.await,
        };

        match answer {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(BridgeError::NativeCallFailure {
                name: self.name.clone(),
                message,
            }),
            Err(_) => Err(BridgeError::ResponseDropped {
                name: self.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NativeBackend;
    use parking_lot::Mutex;
    use serde_json::json;

    fn bridge_over(backend: NativeBackend) -> (Arc<NativeBackend>, Bridge) {
        let backend = Arc::new(backend);
        let bridge = Bridge::new(backend.clone(), Some(Duration::from_secs(1)));
        (backend, bridge)
    }

    #[tokio::test]
    async fn synchronous_answer() {
        let (_, bridge) = bridge_over(NativeBackend::new().with_native_function("gain", |_, c| {
            c.resolve(0.5)
        }));

        let gain = bridge.resolve_native_function("gain");
        assert!(gain.is_resolved());
        assert_eq!(gain.invoke(Vec::<Value>::new()).await.unwrap(), json!(0.5));
    }

    #[tokio::test]
    async fn deferred_answer_from_another_task() {
        let (_, bridge) = bridge_over(NativeBackend::new().with_native_function("later", |args, c| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                c.resolve(json!({ "args": args }));
            });
        }));

        let answer = bridge.resolve_native_function("later").invoke([1, 2]).await.unwrap();
        assert_eq!(answer, json!({ "args": [1, 2] }));
    }

    #[tokio::test]
    async fn try_resolve_fails_early() {
        let (_, bridge) = bridge_over(NativeBackend::new());
        let err = bridge.try_resolve_native_function("nope").unwrap_err();
        assert!(matches!(err, BridgeError::UnresolvedFunction { ref name } if name == "nope"));
    }

    #[tokio::test]
    async fn dropped_completion_is_reported() {
        let (_, bridge) = bridge_over(NativeBackend::new().with_native_function("forgetful", |_, c| {
            drop(c);
        }));

        let err = bridge.resolve_native_function("forgetful").invoke(["x"]).await.unwrap_err();
        assert!(matches!(err, BridgeError::ResponseDropped { .. }));
    }

    #[tokio::test]
    async fn panicking_host_function_is_a_call_failure() {
        let (_, bridge) = bridge_over(NativeBackend::new().with_native_function("broken", |_, _| {
            panic!("boom");
        }));

        let err = bridge.resolve_native_function("broken").invoke(["x"]).await.unwrap_err();
        match err {
            BridgeError::NativeCallFailure { name, message } => {
                assert_eq!(name, "broken");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_times_out() {
        let backend = Arc::new(NativeBackend::new().with_native_function("silent", |_, c| {
            // Keep the completion alive without ever answering.
            std::mem::forget(c);
        }));
        let bridge = Bridge::new(backend, Some(Duration::from_secs(10)));

        let err = bridge.resolve_native_function("silent").invoke(["x"]).await.unwrap_err();
        match err {
            BridgeError::Timeout { name, after } => {
                assert_eq!(name, "silent");
                assert_eq!(after, Duration::from_secs(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_releases_host_listener() {
        let (backend, bridge) = bridge_over(NativeBackend::new());

        let first = bridge.subscribe("meter", |_| Ok(()));
        let second = bridge.subscribe("meter", |_| Ok(()));
        assert_eq!(backend.listener_count("meter"), 1);
        assert_eq!(bridge.subscriber_count("meter"), 2);

        assert!(first.unsubscribe());
        assert_eq!(backend.listener_count("meter"), 1);

        assert!(second.unsubscribe());
        assert_eq!(bridge.subscriber_count("meter"), 0);
        assert_eq!(backend.listener_count("meter"), 0);
    }

    #[test]
    fn unsubscribe_after_bridge_dropped() {
        let (_, bridge) = bridge_over(NativeBackend::new());
        let sub = bridge.subscribe("meter", |_| Ok(()));
        drop(bridge);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn handler_may_subscribe_during_delivery() {
        let (backend, bridge) = bridge_over(NativeBackend::new());
        let bridge = Arc::new(bridge);
        let late_calls = Arc::new(Mutex::new(0));

        let inner_bridge = Arc::downgrade(&bridge);
        let counter = late_calls.clone();
        bridge.subscribe("meter", move |_| {
            if let Some(b) = inner_bridge.upgrade() {
                let counter = counter.clone();
                b.subscribe("meter", move |_| {
                    *counter.lock() += 1;
                    Ok(())
                });
            }
            Ok(())
        });

        backend.emit_event("meter", 1);
        // Subscriber added mid-delivery only sees later events.
        assert_eq!(*late_calls.lock(), 0);
        backend.emit_event("meter", 2);
        assert_eq!(*late_calls.lock(), 1);
    }

    #[test]
    fn dispatch_reports_failures() {
        let (_, bridge) = bridge_over(NativeBackend::new());
        bridge.subscribe("meter", |_| anyhow::bail!("bad level"));
        bridge.subscribe("meter", |_| Ok(()));

        let delivery = bridge.dispatch("meter", &json!(3));
        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.failures.len(), 1);
        assert!(matches!(
            &delivery.failures[0],
            BridgeError::EventHandlerFailure { event, message } if event == "meter" && message.contains("bad level")
        ));
    }

    #[test]
    fn dropping_bridge_releases_host_listeners() {
        let backend = Arc::new(NativeBackend::new());

        for _ in 0..3 {
            let bridge = Bridge::new(backend.clone(), None);
            bridge.subscribe("exampleEvent", |_| Ok(()));
            bridge.subscribe("meter", |_| Ok(()));
            assert_eq!(backend.listener_count("exampleEvent"), 1);
        }

        assert_eq!(backend.listener_count("exampleEvent"), 0);
        assert_eq!(backend.listener_count("meter"), 0);
        assert_eq!(backend.emit_event("exampleEvent", 1), 0);
    }

    #[test]
    fn host_delivered_failures_are_counted() {
        let (backend, bridge) = bridge_over(NativeBackend::new());
        bridge.subscribe("meter", |_| anyhow::bail!("bad level"));
        bridge.subscribe("meter", |_| -> anyhow::Result<()> { panic!("worse level") });
        bridge.subscribe("meter", |_| Ok(()));

        backend.emit_event("meter", 1);
        backend.emit_event("meter", 2);
        assert_eq!(bridge.handler_failures(), 4);
    }

    #[test]
    fn timed_invoke_outside_runtime_is_an_error() {
        use std::future::Future;
        use std::task::{Context, Poll, Wake, Waker};

        struct NoopWake;
        impl Wake for NoopWake {
            fn wake(self: Arc<Self>) {}
        }

        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let (_, bridge) = bridge_over(NativeBackend::new().with_native_function("gain", move |_, c| {
            *flag.lock() = true;
            c.resolve(1)
        }));
        let gain = bridge.resolve_native_function("gain");

        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut call = std::pin::pin!(gain.invoke(["x"]));

        match call.as_mut().poll(&mut cx) {
            Poll::Ready(Err(BridgeError::RuntimeUnavailable { name })) => assert_eq!(name, "gain"),
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert!(!*called.lock());
    }

    #[test]
    fn initialisation_data_passes_through() {
        let (_, bridge) = bridge_over(NativeBackend::new().with_initialisation_data("vendor", "ACME"));
        assert_eq!(bridge.initialisation_data().get("vendor"), Some(&json!("ACME")));
    }
}
