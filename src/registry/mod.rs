// Session registry abstraction
// A shared, path-addressable store with child-added watches, disconnect leases
// and store-assigned timestamps

pub mod memory;
pub mod path;

pub use memory::{MemoryConnection, MemoryRegistry, RegistryOp};

use crate::error::RegistryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

/// Identifier of a child-added subscription, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A child that appeared under a watched path
#[derive(Debug, Clone, PartialEq)]
pub struct ChildAdded {
    /// Key of the new child (the last path segment)
    pub key: String,
    /// Value stored under the child at the time it was observed
    pub value: Value,
}

/// Handle to a live child-added subscription.
///
/// Events arrive in delivery order. The stream ends once the registry drops
/// the subscription, either through [`SessionRegistry::off`] or because the
/// owning connection went away.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    path: String,
    events: mpsc::UnboundedReceiver<ChildAdded>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        path: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChildAdded>,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            events,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next child-added event
    pub async fn next(&mut self) -> Option<ChildAdded> {
        self.events.recv().await
    }
}

/// Capabilities the coordinator requires of the shared session store.
///
/// Every call is a suspension point. Implementations give no ordering
/// guarantee across clients beyond last-write-wins per path.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Upsert a value at a path. Writing `null` removes the path.
    async fn write(&self, path: &str, value: Value) -> Result<(), RegistryError>;

    /// Remove a path and everything below it
    async fn delete(&self, path: &str) -> Result<(), RegistryError>;

    /// One-shot read of the value at a path
    async fn read_once(&self, path: &str) -> Result<Option<Value>, RegistryError>;

    /// Subscribe to children appearing under a path.
    ///
    /// Delivery is at-least-once and includes every child already present
    /// when the subscription is made.
    async fn on_child_added(&self, path: &str) -> Result<Subscription, RegistryError>;

    /// Cancel a subscription. Unknown ids are ignored.
    async fn off(&self, subscription: SubscriptionId) -> Result<(), RegistryError>;

    /// Delete a path server-side if this client disconnects without removing it
    async fn expire_on_disconnect(&self, path: &str) -> Result<(), RegistryError>;

    /// Current time according to the store, not the client clock
    async fn server_timestamp(&self) -> Result<DateTime<Utc>, RegistryError>;
}
