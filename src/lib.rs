pub mod bridge;
pub mod bridge_api;
pub mod config;
pub mod console;
pub mod demo;
pub mod error;
pub mod host;
pub mod notifications;
pub mod resources;
pub mod ui;

use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::Handle;

pub use bridge::{Bridge, NativeFunctionHandle, Subscription};
pub use bridge_api::{HostEvent, Value};
pub use config::Config;
pub use console::ConsoleLog;
pub use error::BridgeError;
pub use host::{Host, NativeBackend};
pub use notifications::NotificationBoard;
pub use resources::ResourceProvider;
pub use ui::PageApp;

/// Main application state
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub console: Arc<RwLock<ConsoleLog>>,
    pub backend: Arc<NativeBackend>,
    pub bridge: Arc<Bridge>,
    pub notifications: Arc<NotificationBoard>,
    pub resources: Option<ResourceProvider>,
}

impl AppState {
    /// Builds the host, the bridge the page sees, and the page-side surfaces.
    /// Timers are spawned on `runtime`.
    pub fn new(config: Config, runtime: Handle) -> Result<Self> {
        let backend = Arc::new(
            NativeBackend::new()
                .with_initialisation_data("vendor", config.host.vendor.as_str())
                .with_initialisation_data("pluginName", config.host.plugin_name.as_str())
                .with_initialisation_data("pluginVersion", config.host.plugin_version.as_str()),
        );
        demo::install(&backend, config.event_delay(), runtime.clone());

        let resources = match &config.host.resource_root {
            Some(root) => Some(ResourceProvider::from_dir(root)?),
            None => None,
        };

        let bridge = Arc::new(Bridge::new(backend.clone(), config.call_timeout()));
        let notifications = Arc::new(NotificationBoard::new(config.notification_lifetime(), runtime));

        let mut console = ConsoleLog::new();
        console.set_enabled(config.ui.console_enabled);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            console: Arc::new(RwLock::new(console)),
            backend,
            bridge,
            notifications,
            resources,
        })
    }

    pub fn page(&self) -> PageApp {
        let page_config = self.config.read().page.clone();
        PageApp::new(
            &self.bridge,
            &page_config,
            self.console.clone(),
            self.notifications.clone(),
        )
    }
}
