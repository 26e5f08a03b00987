// Session exclusivity coordinator
// Keeps one live session per account: evicts earlier records, registers and
// leases our own, then watches for a later login and forces a restart if one
// shows up.
//
// Exclusivity is best effort. Eviction is an unconditional delete followed by
// an insert, so two logins racing inside the grace window can each evict
// nothing, register, and later see each other through the watch. Both are
// then kicked out.

use super::hooks::SessionHooks;
use super::identity;
use super::store::{SessionStore, decode_record};
use super::timers::{TimerHandle, TimerService};
use super::types::{
    ClientEnvironment, CoordinatorConfig, CoordinatorState, NotifyLevel, SessionEvent,
    SessionRecord,
};
use crate::error::{RegistryError, SessionError, SessionResult};
use crate::registry::{ChildAdded, SessionRegistry, SubscriptionId};
use chrono::{DateTime, Utc};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info, warn};

/// Who we are registered as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Progress of the usurpation watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    /// Not armed yet (grace delay running, or not initialized)
    Pending,
    /// Subscribed to the user's registry path
    Armed,
    /// Torn down, or arming failed; a fresh initialize rearms it
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    store: SessionStore,
    hooks: SessionHooks,
    config: CoordinatorConfig,
    env: ClientEnvironment,
    state: watch::Sender<CoordinatorState>,
    watch_status: watch::Sender<WatchStatus>,
    events: broadcast::Sender<SessionEvent>,
    /// Cleared on any teardown; every callback checks it before acting
    active: AtomicBool,
    cleanup_started: AtomicBool,
    identity: Mutex<Option<SessionIdentity>>,
    subscription: Mutex<Option<SubscriptionId>>,
    heartbeat: Mutex<Option<TimerHandle>>,
    timers: TimerService,
}

/// Enforces a single live session for the account it is initialized with.
///
/// Construct one per login and drop it on logout. Dropping cancels every
/// timer and background task it owns.
pub struct SessionCoordinator {
    inner: Arc<Inner>,
    _shutdown: DropGuard,
}

impl SessionCoordinator {
    /// Create a coordinator over a registry connection
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        hooks: SessionHooks,
        config: CoordinatorConfig,
        env: ClientEnvironment,
    ) -> SessionResult<Self> {
        config.validate().map_err(SessionError::Validation)?;

        let timers = TimerService::new();
        let shutdown = timers.drop_guard();
        let (events, _) = broadcast::channel(32);

        let inner = Arc::new(Inner {
            store: SessionStore::new(registry, config.registry_root.clone()),
            hooks,
            config,
            env,
            state: watch::Sender::new(CoordinatorState::Uninitialized),
            watch_status: watch::Sender::new(WatchStatus::Pending),
            events,
            active: AtomicBool::new(false),
            cleanup_started: AtomicBool::new(false),
            identity: Mutex::new(None),
            subscription: Mutex::new(None),
            heartbeat: Mutex::new(None),
            timers,
        });

        Ok(Self {
            inner,
            _shutdown: shutdown,
        })
    }

    /// Register this client as the user's only session.
    ///
    /// Evicts every existing record for the user, writes and leases our own,
    /// starts the heartbeat and arms the usurpation watch after the grace
    /// delay. Returns once the record is leased; the watch arms later.
    pub async fn initialize(&self, user_id: &str) -> SessionResult<()> {
        if user_id.trim().is_empty() {
            return Err(SessionError::Validation(
                "user id must not be empty".to_string(),
            ));
        }
        self.inner
            .store
            .user_path(user_id)
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        if !self
            .inner
            .transition(CoordinatorState::Uninitialized, CoordinatorState::Initializing)
        {
            return Err(SessionError::InvalidState(self.state()));
        }

        self.inner.initialize(user_id).await
    }

    /// Refresh `lastActivityAt` on our record. Failures are logged and
    /// ignored; nothing happens unless the coordinator is active.
    pub async fn update_activity(&self) {
        self.inner.update_activity().await;
    }

    /// Run the forced-logout sequence: notify, wait, log out, restart.
    /// No-op unless the coordinator is active.
    pub async fn handle_kicked_out(&self) {
        self.inner.handle_kicked_out(None).await;
    }

    /// Voluntary teardown: stop the watch and timers, delete our record and
    /// forget our identity. Safe to call more than once.
    pub async fn cleanup(&self) {
        self.inner.cleanup().await;
    }

    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn watch_status(&self) -> WatchStatus {
        *self.inner.watch_status.borrow()
    }

    /// Wait until the usurpation watch is armed. Returns false if it never
    /// will be (teardown, or arming failed).
    pub async fn wait_until_watching(&self) -> bool {
        let mut rx = self.inner.watch_status.subscribe();
        match rx.wait_for(|status| *status != WatchStatus::Pending).await {
            Ok(status) => *status == WatchStatus::Armed,
            Err(_) => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.inner.identity()
    }

    pub fn session_id(&self) -> Option<String> {
        self.identity().map(|identity| identity.session_id)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Records currently registered for our user, oldest first
    pub async fn sessions(&self) -> SessionResult<Vec<SessionRecord>> {
        let Some(identity) = self.identity() else {
            return Ok(Vec::new());
        };
        Ok(self.inner.store.list(&identity.user_id).await?)
    }
}

impl Inner {
    fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn identity(&self) -> Option<SessionIdentity> {
        lock(&self.identity).clone()
    }

    /// Move `from -> to`; false if the state was not `from`
    fn transition(&self, from: CoordinatorState, to: CoordinatorState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Session coordinator {} -> {}", from, to);
        }
        changed
    }

    /// Bail out of a resumed task if someone else moved the state on
    fn ensure_state(&self, expected: CoordinatorState) -> SessionResult<()> {
        let current = self.state();
        if current == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState(current))
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn initialize(self: &Arc<Self>, user_id: &str) -> SessionResult<()> {
        let session_id = identity::new_session_id();
        let mut written = false;

        let (record, evicted) = match self.register(user_id, &session_id, &mut written).await {
            Ok(registered) => registered,
            Err(e) => {
                self.abort_initialize(user_id, &session_id, written, &e)
                    .await;
                return Err(e);
            }
        };

        *lock(&self.identity) = Some(SessionIdentity {
            user_id: user_id.to_string(),
            session_id: session_id.clone(),
            created_at: record.created_at,
        });

        self.active.store(true, Ordering::SeqCst);
        if !self.transition(CoordinatorState::Initializing, CoordinatorState::Active) {
            // cleanup() ran while we were registering
            self.active.store(false, Ordering::SeqCst);
            let e = SessionError::InvalidState(self.state());
            self.abort_initialize(user_id, &session_id, true, &e).await;
            return Err(e);
        }

        info!(
            "Registered session {} for user {} on {} ({} prior session(s) evicted)",
            session_id, user_id, record.device_descriptor, evicted
        );
        self.publish(SessionEvent::Registered {
            session_id: session_id.clone(),
            evicted,
        });

        self.watch_status.send_replace(WatchStatus::Pending);
        self.start_heartbeat();
        self.schedule_watch(user_id.to_string(), session_id);
        Ok(())
    }

    /// Evict, register, lease. `written` is set once our record exists.
    async fn register(
        &self,
        user_id: &str,
        session_id: &str,
        written: &mut bool,
    ) -> SessionResult<(SessionRecord, usize)> {
        let evicted = self.store.evict_all(user_id).await?;
        self.ensure_state(CoordinatorState::Initializing)?;

        let now = self.store.now().await?;
        self.ensure_state(CoordinatorState::Initializing)?;

        let raw = self.env.user_agent.as_deref().unwrap_or_default();
        let record = SessionRecord::new(
            user_id,
            session_id,
            now,
            identity::device_descriptor(&self.env),
            identity::truncate_client_identifier(raw, self.config.max_client_identifier_len),
        );

        self.store.register(&record).await?;
        *written = true;

        self.store.arm_lease(user_id, session_id).await?;
        self.ensure_state(CoordinatorState::Initializing)?;

        Ok((record, evicted))
    }

    /// Undo a partial initialize so no orphan record is left behind
    async fn abort_initialize(
        &self,
        user_id: &str,
        session_id: &str,
        written: bool,
        cause: &SessionError,
    ) {
        match cause {
            SessionError::RegistryUnavailable(e) => {
                error!("Session registration for user {} failed: {}", user_id, e)
            }
            other => warn!("Session registration for user {} aborted: {}", user_id, other),
        }

        if written {
            if let Err(e) = self.store.remove(user_id, session_id).await {
                warn!(
                    "Failed to roll back session {} for user {}: {}",
                    session_id, user_id, e
                );
            }
        }

        lock(&self.identity).take();
        self.transition(CoordinatorState::Initializing, CoordinatorState::Uninitialized);
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let handle = self
            .timers
            .every("heartbeat", self.config.heartbeat_interval(), move || {
                let inner = Arc::clone(&inner);
                async move { inner.update_activity().await }
            });
        *lock(&self.heartbeat) = Some(handle);
    }

    fn schedule_watch(self: &Arc<Self>, user_id: String, session_id: String) {
        let inner = Arc::clone(self);
        self.timers
            .after("usurpation-watch", self.config.grace_delay(), async move {
                inner.watch(user_id, session_id).await;
            });
    }

    async fn watch(self: Arc<Self>, user_id: String, session_id: String) {
        if !self.is_active() {
            self.watch_status.send_replace(WatchStatus::Closed);
            return;
        }

        let mut subscription = match self.store.watch_user(&user_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(
                    "Failed to arm usurpation watch for session {} of user {}: {}",
                    session_id, user_id, e
                );
                self.withdraw_unguarded(&user_id, &session_id).await;
                return;
            }
        };

        // Torn down while we were subscribing
        if !self.is_active() {
            if let Err(e) = self.store.unwatch(subscription.id()).await {
                debug!("Failed to drop stale watch for session {}: {}", session_id, e);
            }
            self.watch_status.send_replace(WatchStatus::Closed);
            return;
        }

        *lock(&self.subscription) = Some(subscription.id());
        self.watch_status.send_replace(WatchStatus::Armed);
        self.publish(SessionEvent::WatchArmed);
        debug!(
            "Usurpation watch armed for session {} of user {}",
            session_id, user_id
        );

        while let Some(child) = subscription.next().await {
            if !self.on_child_added(&session_id, child).await {
                return;
            }
        }

        // Stream ended under us (connection dropped)
        if self.is_active() {
            warn!(
                "Usurpation watch for session {} of user {} closed unexpectedly",
                session_id, user_id
            );
            self.withdraw_unguarded(&user_id, &session_id).await;
        }
    }

    /// Give the session up once the watch is lost. Stops the heartbeat, drops
    /// our record and falls back to `Uninitialized`.
    async fn withdraw_unguarded(&self, user_id: &str, session_id: &str) {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.watch_status.send_replace(WatchStatus::Closed);
            return;
        }

        self.stop_watch_and_heartbeat().await;
        if let Err(e) = self.store.remove(user_id, session_id).await {
            warn!(
                "Failed to remove unguarded session {} for user {}: {}",
                session_id, user_id, e
            );
        }

        lock(&self.identity).take();
        if self.transition(CoordinatorState::Active, CoordinatorState::Uninitialized) {
            warn!(
                "Session {} for user {} withdrawn without a usurpation watch",
                session_id, user_id
            );
            self.publish(SessionEvent::WatchFailed);
        }
    }

    /// Handle one child-added event. Returns false once the watch should stop.
    async fn on_child_added(self: &Arc<Self>, own_session_id: &str, child: ChildAdded) -> bool {
        if child.key == own_session_id {
            return true;
        }

        if !self.is_active() || self.state() != CoordinatorState::Active {
            debug!(
                "Ignoring registration of session {} while {}",
                child.key,
                self.state()
            );
            return false;
        }

        let user_id = self
            .identity()
            .map(|identity| identity.user_id)
            .unwrap_or_default();

        // A bare field write (e.g. a late heartbeat) is not a login
        let Some(usurper) = decode_record(&user_id, &child.key, child.value) else {
            return true;
        };

        warn!(
            "Session {} for user {} was superseded by session {} on {}",
            own_session_id, user_id, usurper.session_id, usurper.device_descriptor
        );

        self.handle_kicked_out(Some(child.key)).await;
        false
    }

    async fn handle_kicked_out(self: &Arc<Self>, usurper: Option<String>) {
        // Claim the transition; only the first caller proceeds
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Kick-out ignored: session is no longer active");
            return;
        }
        if !self.transition(CoordinatorState::Active, CoordinatorState::KickedOut) {
            return;
        }
        if let Some(by_session_id) = usurper {
            self.publish(SessionEvent::Usurped { by_session_id });
        }

        self.stop_watch_and_heartbeat().await;

        if let Err(e) = self.notify_user() {
            warn!("{}", e);
        }

        // Give the user time to read the notice; cleanup() may cut this short
        tokio::select! {
            _ = self.timers.cancelled() => {
                info!("Kick-out sequence interrupted by cleanup");
                return;
            }
            _ = tokio::time::sleep(self.config.kick_notice_delay()) => {}
        }

        if let Err(e) = self.logout().await {
            warn!("{}", e);
        }

        let restart = catch_unwind(AssertUnwindSafe(|| self.hooks.runtime.force_restart()));
        if restart.is_err() {
            error!("Client restart hook panicked");
        }

        lock(&self.identity).take();
        if self.transition(CoordinatorState::KickedOut, CoordinatorState::Terminated) {
            info!("Session terminated after being superseded");
            self.publish(SessionEvent::Terminated { forced: true });
        }
        self.timers.cancel_all();
    }

    async fn stop_watch_and_heartbeat(&self) {
        self.watch_status.send_replace(WatchStatus::Closed);

        let heartbeat = lock(&self.heartbeat).take();
        if let Some(handle) = heartbeat {
            handle.cancel();
        }

        let subscription = lock(&self.subscription).take();
        if let Some(id) = subscription {
            if let Err(e) = self.store.unwatch(id).await {
                warn!("Failed to remove usurpation watch: {}", e);
            }
        }
    }

    fn notify_user(&self) -> SessionResult<()> {
        let Some(notifier) = &self.hooks.notifier else {
            return Err(SessionError::NotificationFailure(
                "no UI notifier configured".to_string(),
            ));
        };

        let message = self.config.kick_notice_message.as_str();
        match catch_unwind(AssertUnwindSafe(|| notifier.notify(message, NotifyLevel::Error))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::NotificationFailure(e)),
            Err(_) => Err(SessionError::NotificationFailure(
                "notifier panicked".to_string(),
            )),
        }
    }

    async fn logout(&self) -> SessionResult<()> {
        let auth = Arc::clone(&self.hooks.auth);
        // Own task so a panicking logout cannot take the sequence down
        match tokio::spawn(async move { auth.logout().await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::LogoutFailure(e)),
            Err(e) => Err(SessionError::LogoutFailure(format!(
                "logout task failed: {}",
                e
            ))),
        }
    }

    async fn update_activity(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let Some(identity) = self.identity() else {
            return;
        };

        match self.touch(&identity).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Session {} for user {} was evicted without a visible successor",
                    identity.session_id, identity.user_id
                );
                // Own task: the kick-out cancels the heartbeat that found it
                let inner = Arc::clone(self);
                self.timers.spawn("evicted-kick-out", async move {
                    inner.handle_kicked_out(None).await;
                });
            }
            Err(e) => debug!(
                "Heartbeat for session {} failed: {}",
                identity.session_id, e
            ),
        }
    }

    /// Refresh our record. Ok(false) means it is gone and nothing was written.
    async fn touch(&self, identity: &SessionIdentity) -> Result<bool, RegistryError> {
        let Some(record) = self
            .store
            .get(&identity.user_id, &identity.session_id)
            .await?
        else {
            return Ok(false);
        };

        let now = self.store.now().await?;
        if !self.is_active() {
            return Ok(true);
        }

        // Never report activity before creation, whatever the store clock says
        let at = now.max(record.created_at);
        self.store
            .touch(&identity.user_id, &identity.session_id, at)
            .await?;
        Ok(true)
    }

    async fn cleanup(&self) {
        if self.state().is_terminal() || self.cleanup_started.swap(true, Ordering::SeqCst) {
            debug!("Session cleanup already done");
            return;
        }

        self.active.store(false, Ordering::SeqCst);
        self.timers.cancel_all();
        self.stop_watch_and_heartbeat().await;

        let identity = lock(&self.identity).take();
        if let Some(identity) = identity {
            match self
                .store
                .remove(&identity.user_id, &identity.session_id)
                .await
            {
                Ok(()) => info!(
                    "Removed session {} for user {}",
                    identity.session_id, identity.user_id
                ),
                Err(e) => warn!(
                    "Failed to remove session {} for user {}: {}",
                    identity.session_id, identity.user_id, e
                ),
            }
        }

        let previous = self.state.send_replace(CoordinatorState::Terminated);
        if previous != CoordinatorState::Terminated {
            debug!("Session coordinator {} -> terminated", previous);
            self.publish(SessionEvent::Terminated { forced: false });
        }
    }
}
