// src/notify.rs

//! User-visible status notifications.
//!
//! Sinks are fire-and-forget: the engine never waits on them and never learns
//! whether delivery worked.

use std::sync::Mutex;

use tracing::info;

pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Emits every notification as an `info` event on the `workchain::notify`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, message: &str) {
        info!(target: "workchain::notify", "{message}");
    }
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _message: &str) {}
}

/// Keeps notifications in memory, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}
