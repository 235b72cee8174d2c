use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Severity attached to user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotificationLevel {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Success => "success",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        }
    }
}

/// Fire-and-forget outlet for banners and toasts; delivery failures are the sink's problem.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, level: NotificationLevel);
}

/// Sink that forwards notifications to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, message: &str, level: NotificationLevel) {
        match level {
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(level = level.label(), "{message}")
            }
            NotificationLevel::Warning => warn!(level = level.label(), "{message}"),
            NotificationLevel::Error => error!(level = level.label(), "{message}"),
        }
    }
}
