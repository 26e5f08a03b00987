// Collaborators the coordinator drives on forced termination

use super::types::NotifyLevel;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Auth system that owns the user's credentials
#[async_trait]
pub trait AuthSystem: Send + Sync {
    /// Sign the user out. Must be idempotent.
    async fn logout(&self) -> Result<(), String>;
}

/// Surfaces user-visible messages. Must not block.
pub trait UiNotifier: Send + Sync {
    fn notify(&self, message: &str, level: NotifyLevel) -> Result<(), String>;
}

/// Host runtime of the client, able to restart it from scratch
pub trait ClientRuntime: Send + Sync {
    /// Discard all in-memory client state and start over
    fn force_restart(&self);
}

/// Collaborators injected into a coordinator
#[derive(Clone)]
pub struct SessionHooks {
    pub auth: Arc<dyn AuthSystem>,
    pub notifier: Option<Arc<dyn UiNotifier>>,
    pub runtime: Arc<dyn ClientRuntime>,
}

impl SessionHooks {
    pub fn new(auth: Arc<dyn AuthSystem>, runtime: Arc<dyn ClientRuntime>) -> Self {
        Self {
            auth,
            notifier: None,
            runtime,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UiNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

/// Notifier for headless clients: writes notices to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl UiNotifier for TracingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) -> Result<(), String> {
        match level {
            NotifyLevel::Error => error!("Notice: {}", message),
            NotifyLevel::Warning => warn!("Notice: {}", message),
            NotifyLevel::Info | NotifyLevel::Success => info!("Notice: {}", message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_notifier_accepts_every_level() {
        let notifier = TracingNotifier;
        for level in [
            NotifyLevel::Info,
            NotifyLevel::Warning,
            NotifyLevel::Error,
            NotifyLevel::Success,
        ] {
            assert!(notifier.notify("hello", level).is_ok());
        }
    }
}
