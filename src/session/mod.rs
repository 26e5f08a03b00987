// Session exclusivity
// One live login per account: identity generation, the typed registry
// adapter, timers, collaborator hooks and the coordinator state machine

pub mod coordinator;
pub mod hooks;
pub mod identity;
pub mod store;
pub mod timers;
pub mod types;

pub use coordinator::{SessionCoordinator, SessionIdentity, WatchStatus};
pub use hooks::{AuthSystem, ClientRuntime, SessionHooks, TracingNotifier, UiNotifier};
pub use store::SessionStore;
pub use timers::{TimerHandle, TimerService};
pub use types::{
    ClientEnvironment, CoordinatorConfig, CoordinatorState, NotifyLevel, SessionEvent,
    SessionRecord,
};
