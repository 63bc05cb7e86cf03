use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::bridge_api::{value_to_text, Completion, Value};
use crate::host::NativeBackend;

pub const SAY_HELLO: &str = "sayHello";
pub const EXAMPLE_EVENT: &str = "exampleEvent";

/// Payload pushed through the visibility-gated path.
pub const GATED_PAYLOAD: f64 = 42.0;
/// Payload pushed unconditionally.
pub const DIRECT_PAYLOAD: f64 = 67.0;

/// Host function behind `sayHello`: answers at once, then pushes two
/// `exampleEvent`s after `delay`.
pub fn say_hello(
    backend: Weak<NativeBackend>,
    delay: Duration,
    runtime: Handle,
) -> impl Fn(Vec<Value>, Completion) + Send + Sync + 'static {
    move |args: Vec<Value>, completion: Completion| {
        log::info!("{} called from the page", SAY_HELLO);
        log::info!("Scheduling event emission in {:?}", delay);
        schedule_example_events(backend.clone(), delay, &runtime);

        let message = args.first().map(value_to_text).unwrap_or_default();
        completion.resolve(format!("Received by host: {}", message));
    }
}

fn schedule_example_events(backend: Weak<NativeBackend>, delay: Duration, runtime: &Handle) {
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        log::info!("Action executed after {:?}", delay);

        // The backend may have been torn down with the page.
        let Some(backend) = backend.upgrade() else {
            return;
        };
        backend.emit_event_if_visible(EXAMPLE_EVENT, GATED_PAYLOAD);
        backend.emit_event(EXAMPLE_EVENT, DIRECT_PAYLOAD);
    });
}

/// Register the demo functions on `backend`.
pub fn install(backend: &Arc<NativeBackend>, delay: Duration, runtime: Handle) {
    backend.register_native_function(SAY_HELLO, say_hello(Arc::downgrade(backend), delay, runtime));
}
