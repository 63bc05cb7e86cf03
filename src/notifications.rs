use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::bridge_api::{value_to_text, Value};

pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(30);

/// A toast currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub id: u64,
    pub text: String,
    pub shown_at: DateTime<Local>,
}

/// Non-blocking toast surface. Each record removes itself after `lifetime`.
pub struct NotificationBoard {
    records: Arc<RwLock<Vec<NotificationRecord>>>,
    lifetime: Duration,
    next_id: AtomicU64,
    runtime: Handle,
}

impl NotificationBoard {
    /// Removal timers run on `runtime`, so `show` can be called from any thread.
    pub fn new(lifetime: Duration, runtime: Handle) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            lifetime,
            next_id: AtomicU64::new(1),
            runtime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Show `payload` as `Notification: <payload>`. Returns the record id.
    pub fn show(&self, payload: &Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = NotificationRecord {
            id,
            text: format!("Notification: {}", value_to_text(payload)),
            shown_at: Local::now(),
        };

        log::info!("Showing notification #{}: {}", id, record.text);
        self.records.write().push(record);

        let deadline = Instant::now() + self.lifetime;
        let records = self.records.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if remove_record(&records, id) {
                log::debug!("Notification #{} expired", id);
            }
        });

        id
    }

    /// Remove a notification before its lifetime ends.
    pub fn dismiss(&self, id: u64) -> bool {
        let removed = remove_record(&self.records, id);
        if removed {
            log::debug!("Notification #{} dismissed", id);
        }
        removed
    }

    /// Visible notifications, oldest first.
    pub fn visible(&self) -> Vec<NotificationRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn remove_record(records: &RwLock<Vec<NotificationRecord>>, id: u64) -> bool {
    let mut records = records.write();
    let before = records.len();
    records.retain(|r| r.id != id);
    records.len() != before
}
