use anyhow::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::bridge::{Bridge, NativeFunctionHandle, Subscription};
use crate::bridge_api::Value;
use crate::config::PageConfig;
use crate::console::ConsoleLog;
use crate::notifications::NotificationBoard;

/// Page logic: a counter, a button that calls into the host, and a
/// subscription that turns host events into notifications.
pub struct PageApp {
    native_function: NativeFunctionHandle,
    greeting: String,
    console: Arc<RwLock<ConsoleLog>>,
    notifications: Arc<NotificationBoard>,
    count: AtomicU32,
    event_subscription: Option<Subscription>,
}

impl PageApp {
    pub fn new(
        bridge: &Bridge,
        page: &PageConfig,
        console: Arc<RwLock<ConsoleLog>>,
        notifications: Arc<NotificationBoard>,
    ) -> Self {
        let native_function = bridge.resolve_native_function(&page.native_function);

        let event_console = console.clone();
        let event_notifications = notifications.clone();
        let event_name = page.event_name.clone();
        let event_subscription = bridge.subscribe(&page.event_name, move |payload| {
            event_console.write().log_event(&event_name, payload);
            event_notifications.show(payload);
            Ok(())
        });

        console.write().log_info("Bridge ready");

        Self {
            native_function,
            greeting: page.greeting.clone(),
            console,
            notifications,
            count: AtomicU32::new(0),
            event_subscription: Some(event_subscription),
        }
    }

    /// Counter button. Returns the new count.
    pub fn increment(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// "Call native code" button.
    pub async fn call_native(&self) -> Result<Value> {
        let name = self.native_function.name().to_string();

        match self.native_function.invoke([self.greeting.as_str()]).await {
            Ok(response) => {
                self.console.write().log_native_response(&name, &response);
                Ok(response)
            }
            Err(e) => {
                self.console
                    .write()
                    .log_error(&format!("Call to {} failed: {}", name, e));
                Err(e.into())
            }
        }
    }

    pub fn notifications(&self) -> &NotificationBoard {
        &self.notifications
    }

    /// Stop reacting to host events.
    pub fn detach(&mut self) -> bool {
        match self.event_subscription.take() {
            Some(subscription) => subscription.unsubscribe(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::host::NativeBackend;
    use serde_json::json;
    use std::time::Duration;
    use tokio::runtime::Handle;

    struct Page {
        backend: Arc<NativeBackend>,
        bridge: Bridge,
        console: Arc<RwLock<ConsoleLog>>,
        notifications: Arc<NotificationBoard>,
    }

    fn page(backend: NativeBackend) -> Page {
        let backend = Arc::new(backend);
        Page {
            bridge: Bridge::new(backend.clone(), Some(Duration::from_secs(1))),
            backend,
            console: Arc::new(RwLock::new(ConsoleLog::new())),
            notifications: Arc::new(NotificationBoard::new(
                Duration::from_secs(30),
                Handle::current(),
            )),
        }
    }

    fn app(p: &Page) -> PageApp {
        PageApp::new(
            &p.bridge,
            &PageConfig::default(),
            p.console.clone(),
            p.notifications.clone(),
        )
    }

    #[tokio::test]
    async fn counter() {
        let p = page(NativeBackend::new());
        let app = app(&p);
        assert_eq!(app.increment(), 1);
        assert_eq!(app.increment(), 2);
        assert_eq!(app.count(), 2);
    }

    #[tokio::test]
    async fn call_native_logs_response() {
        let p = page(NativeBackend::new().with_native_function("sayHello", |args, c| {
            c.resolve(json!({ "echo": args }));
        }));
        let app = app(&p);

        let response = app.call_native().await.unwrap();
        assert_eq!(response, json!({ "echo": ["Test message"] }));

        let console = p.console.read();
        let last = console.get_entries().last().unwrap();
        assert!(last.to_string().contains("sayHello()"));
    }

    #[tokio::test]
    async fn missing_function_surfaces_error() {
        let p = page(NativeBackend::new());
        let app = app(&p);

        let err = app.call_native().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::UnresolvedFunction { .. })
        ));
    }

    #[tokio::test]
    async fn host_event_becomes_notification() {
        let p = page(NativeBackend::new());
        let _app = app(&p);

        p.backend.emit_event("exampleEvent", 42.0);

        let visible = p.notifications.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "Notification: 42");
        assert!(p
            .console
            .read()
            .get_entries()
            .iter()
            .any(|e| e.to_string().contains("<- exampleEvent 42")));
    }

    #[tokio::test]
    async fn detached_page_ignores_events() {
        let p = page(NativeBackend::new());
        let mut app = app(&p);

        assert!(app.detach());
        assert!(!app.detach());
        p.backend.emit_event("exampleEvent", 1);
        assert!(app.notifications().is_empty());
    }
}
