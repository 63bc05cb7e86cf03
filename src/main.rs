use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use webview_shell_core::{AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::load_or_default()?;
    let settle = config.event_delay() + Duration::from_secs(1);
    let linger = config.notification_lifetime();

    let app_state = Arc::new(AppState::new(config, Handle::current())?);

    if let Some(resources) = &app_state.resources {
        match resources.get("/") {
            Some(index) => log::info!("Serving index.html ({} bytes)", index.data.len()),
            None => log::warn!("Page directory has no index.html"),
        }
    }

    for (key, value) in app_state.bridge.initialisation_data() {
        log::info!("Initialisation data {} = {}", key, value);
    }

    let page = app_state.page();
    page.increment();

    if let Err(e) = page.call_native().await {
        eprintln!("Native call failed: {:#}", e);
    }

    // Wait for the host's scheduled events, then for the toasts to expire.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            tokio::time::sleep(settle).await;
            for record in page.notifications().visible() {
                println!("{} (shown {})", record.text, record.shown_at.format("%H:%M:%S"));
            }
            tokio::time::sleep(linger).await;
        } => {}
    }

    for entry in app_state.console.write().get_new_entries() {
        println!("{}", entry);
    }

    Ok(())
}
