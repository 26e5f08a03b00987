#![allow(dead_code)]

use async_trait::async_trait;
use session_exclusivity::registry::{MemoryConnection, MemoryRegistry};
use session_exclusivity::session::{
    AuthSystem, ClientEnvironment, ClientRuntime, CoordinatorConfig, CoordinatorState,
    NotifyLevel, SessionCoordinator, SessionHooks, UiNotifier,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Auth system that counts logouts and can be told to fail
#[derive(Default)]
pub struct RecordingAuth {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl AuthSystem for RecordingAuth {
    async fn logout(&self) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err("auth backend unreachable".to_string())
        } else {
            Ok(())
        }
    }
}

/// Notifier that keeps every message it was asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, NotifyLevel)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn levels(&self) -> Vec<NotifyLevel> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, level)| *level)
            .collect()
    }
}

impl UiNotifier for RecordingNotifier {
    fn notify(&self, message: &str, level: NotifyLevel) -> Result<(), String> {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), level));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRuntime {
    pub restarts: AtomicUsize,
}

impl ClientRuntime for RecordingRuntime {
    fn force_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

/// One simulated browser tab
pub struct TestClient {
    pub coordinator: SessionCoordinator,
    pub connection: Arc<MemoryConnection>,
    pub auth: Arc<RecordingAuth>,
    pub notifier: Arc<RecordingNotifier>,
    pub runtime: Arc<RecordingRuntime>,
}

impl TestClient {
    pub fn logouts(&self) -> usize {
        self.auth.calls.load(Ordering::SeqCst)
    }

    pub fn restarts(&self) -> usize {
        self.runtime.restarts.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }
}

pub fn test_client(registry: &MemoryRegistry) -> TestClient {
    test_client_with(registry.connect(), CoordinatorConfig::default(), DESKTOP_UA)
}

pub fn test_client_with(
    connection: MemoryConnection,
    config: CoordinatorConfig,
    user_agent: &str,
) -> TestClient {
    let connection = Arc::new(connection);
    let auth = Arc::new(RecordingAuth::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let runtime = Arc::new(RecordingRuntime::default());

    let hooks = SessionHooks::new(auth.clone(), runtime.clone()).with_notifier(notifier.clone());
    let coordinator = SessionCoordinator::new(
        connection.clone(),
        hooks,
        config,
        ClientEnvironment::new(user_agent),
    )
    .expect("valid test config");

    TestClient {
        coordinator,
        connection,
        auth,
        notifier,
        runtime,
    }
}

/// Let spawned tasks run without moving virtual time meaningfully
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Number of records stored under `sessions/{user_id}`
pub fn record_count(registry: &MemoryRegistry, user_id: &str) -> usize {
    registry
        .peek(&format!("sessions/{}", user_id))
        .and_then(|value| value.as_object().map(|children| children.len()))
        .unwrap_or(0)
}

/// Session ids stored under `sessions/{user_id}`
pub fn record_ids(registry: &MemoryRegistry, user_id: &str) -> Vec<String> {
    registry
        .peek(&format!("sessions/{}", user_id))
        .and_then(|value| value.as_object().map(|children| children.keys().cloned().collect()))
        .unwrap_or_default()
}
