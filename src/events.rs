use serde::Serialize;
use tokio::sync::broadcast;

const NOTIFICATION_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Error,
}

/// Transient, non-blocking message for the shell to show as a toast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub level: NotificationLevel,
    pub kind: String,
    pub message: String,
}

impl Notification {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Fan-out of notifications to every subscribed shell component.
#[derive(Clone)]
pub struct EventHub {
    notifications: broadcast::Sender<Notification>,
}

impl EventHub {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { notifications }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        log::debug!(
            "[events] {:?} {}: {}",
            notification.level,
            notification.kind,
            notification.message
        );
        // No subscribers is fine: nobody is showing toasts right now.
        let _ = self.notifications.send(notification);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
