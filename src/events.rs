use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::notification::Notification;

/// Event names as constants, matching the dashboard's notification listeners.
pub mod event_names {
    pub const NOTIFICATIONS_UPDATED: &str = "notifications:updated";
    pub const NOTIFICATIONS_HIGH_SEVERITY: &str = "notifications:high-severity";
}

/// Emitted by the notification poller after each resolved fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum PollEvent {
    #[serde(rename = "notifications:updated")]
    Updated { unread: usize },
    #[serde(rename = "notifications:high-severity")]
    HighSeverity(Notification),
}

impl PollEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PollEvent::Updated { .. } => event_names::NOTIFICATIONS_UPDATED,
            PollEvent::HighSeverity(_) => event_names::NOTIFICATIONS_HIGH_SEVERITY,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<PollEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PollEvent>;

pub fn emit_event(tx: &EventSender, event: PollEvent) -> Result<(), String> {
    let name = event.name();
    tx.send(event)
        .map_err(|_| format!("no listener for {}", name))
}
