use chrono::{DateTime, Local};

use crate::bridge_api::{value_to_text, Value};

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum LogKind {
    Info(String),
    Error(String),
    EventReceived { event: String, payload: String },
    NativeResponse { function: String, response: String },
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub kind: LogKind,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = self.at.format("%H:%M:%S");
        match &self.kind {
            LogKind::Info(msg) => write!(f, "[{}] {}", time, msg),
            LogKind::Error(msg) => write!(f, "[{}] ERROR {}", time, msg),
            LogKind::EventReceived { event, payload } => {
                write!(f, "[{}] <- {} {}", time, event, payload)
            }
            LogKind::NativeResponse { function, response } => {
                write!(f, "[{}] {}() -> {}", time, function, response)
            }
        }
    }
}

/// Page console: what the page would print, kept in a bounded buffer and
/// mirrored to the `log` facade.
pub struct ConsoleLog {
    enabled: bool,
    entries: Vec<LogEntry>,
    max_entries: usize,
    last_displayed_count: usize,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            enabled: true,
            entries: Vec::new(),
            max_entries: max_entries.max(1),
            last_displayed_count: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_info(&mut self, message: &str) {
        log::info!("{}", message);
        self.push(LogKind::Info(message.to_string()));
    }

    pub fn log_error(&mut self, message: &str) {
        log::error!("{}", message);
        self.push(LogKind::Error(message.to_string()));
    }

    pub fn log_event(&mut self, event: &str, payload: &Value) {
        let payload = value_to_text(payload);
        log::info!("Received event '{}': {}", event, payload);
        self.push(LogKind::EventReceived {
            event: event.to_string(),
            payload,
        });
    }

    pub fn log_native_response(&mut self, function: &str, response: &Value) {
        let response = value_to_text(response);
        log::info!("Response from {}: {}", function, response);
        self.push(LogKind::NativeResponse {
            function: function.to_string(),
            response,
        });
    }

    fn push(&mut self, kind: LogKind) {
        if !self.enabled {
            return;
        }

        self.entries.push(LogEntry {
            at: Local::now(),
            kind,
        });

        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
            self.last_displayed_count = self.last_displayed_count.saturating_sub(1);
        }
    }

    pub fn get_entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries added since the previous call.
    pub fn get_new_entries(&mut self) -> &[LogEntry] {
        let start = self.last_displayed_count.min(self.entries.len());
        self.last_displayed_count = self.entries.len();
        &self.entries[start..]
    }

    pub fn reset_display_count(&mut self) {
        self.last_displayed_count = 0;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_displayed_count = 0;
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}
