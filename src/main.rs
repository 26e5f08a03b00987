use async_trait::async_trait;
use session_exclusivity::config;
use session_exclusivity::registry::{MemoryRegistry, SessionRegistry};
use session_exclusivity::session::{
    AuthSystem, ClientEnvironment, ClientRuntime, CoordinatorConfig, CoordinatorState,
    SessionCoordinator, SessionHooks, TracingNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LAPTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const PHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Auth stand-in that only logs
struct DemoAuth {
    device: &'static str,
}

#[async_trait]
impl AuthSystem for DemoAuth {
    async fn logout(&self) -> Result<(), String> {
        tracing::info!("[{}] auth: signed out", self.device);
        Ok(())
    }
}

/// Runtime stand-in that logs instead of reloading
struct DemoRuntime {
    device: &'static str,
}

impl ClientRuntime for DemoRuntime {
    fn force_restart(&self) {
        tracing::info!("[{}] runtime: restarting client", self.device);
    }
}

fn client(
    registry: &MemoryRegistry,
    config: &CoordinatorConfig,
    device: &'static str,
    user_agent: &str,
) -> Result<SessionCoordinator, session_exclusivity::SessionError> {
    let connection: Arc<dyn SessionRegistry> = Arc::new(registry.connect());
    let hooks = SessionHooks::new(Arc::new(DemoAuth { device }), Arc::new(DemoRuntime { device }))
        .with_notifier(Arc::new(TracingNotifier));

    SessionCoordinator::new(
        connection,
        hooks,
        config.clone(),
        ClientEnvironment::new(user_agent),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_exclusivity=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let app_config = config::load_config_with_fallback();
    let session_config = app_config.session;
    let user_id = std::env::var("DEMO_USER_ID").unwrap_or_else(|_| "demo-user".to_string());

    tracing::info!("Simulating two logins for user {}", user_id);

    let registry = MemoryRegistry::new();
    let laptop = client(&registry, &session_config, "laptop", LAPTOP_UA)?;
    let phone = client(&registry, &session_config, "phone", PHONE_UA)?;

    laptop.initialize(&user_id).await?;
    if !laptop.wait_until_watching().await {
        tracing::warn!("Laptop never armed its usurpation watch");
    }

    phone.initialize(&user_id).await?;

    // Laptop should notice the phone, show the notice, log out and restart
    let deadline = session_config.kick_notice_delay()
        + session_config.grace_delay()
        + Duration::from_secs(5);
    let mut laptop_state = laptop.subscribe_state();
    match tokio::time::timeout(
        deadline,
        laptop_state.wait_for(|state| *state == CoordinatorState::Terminated),
    )
    .await
    {
        Ok(_) => tracing::info!("Laptop session was terminated"),
        Err(_) => tracing::warn!("Laptop still {} after {:?}", laptop.state(), deadline),
    }

    for record in phone.sessions().await? {
        tracing::info!(
            "Remaining session {} on {} (created {})",
            record.session_id,
            record.device_descriptor,
            record.created_at
        );
    }

    phone.cleanup().await;
    tracing::info!("Phone logged out, state {}", phone.state());

    Ok(())
}
