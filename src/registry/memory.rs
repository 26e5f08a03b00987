// In-memory session registry
// Shared JSON tree guarded by a Mutex, with child-added watchers,
// per-connection disconnect leases and a non-decreasing store clock

use super::path::segments;
use super::{ChildAdded, SessionRegistry, Subscription, SubscriptionId};
use crate::error::RegistryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Registry operation kinds, used for failure injection and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    Write,
    Delete,
    ReadOnce,
    OnChildAdded,
    Off,
    ExpireOnDisconnect,
    ServerTimestamp,
}

struct Watcher {
    id: SubscriptionId,
    connection: u64,
    path: Vec<String>,
    known: HashSet<String>,
    tx: mpsc::UnboundedSender<ChildAdded>,
}

struct Shared {
    tree: Value,
    watchers: Vec<Watcher>,
    leases: HashMap<u64, Vec<Vec<String>>>,
    clock: DateTime<Utc>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            tree: Value::Object(Map::new()),
            watchers: Vec::new(),
            leases: HashMap::new(),
            clock: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl Shared {
    /// Issue a store timestamp that never runs backwards
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        if now > self.clock {
            self.clock = now;
        }
        self.clock
    }

    /// Deliver children that appeared since each watcher last looked
    fn dispatch(&mut self) {
        let tree = &self.tree;
        self.watchers.retain_mut(|watcher| {
            let path: Vec<&str> = watcher.path.iter().map(String::as_str).collect();
            let Some(children) = get_at(tree, &path).and_then(Value::as_object) else {
                watcher.known.clear();
                return !watcher.tx.is_closed();
            };

            for (key, value) in children {
                if watcher.known.contains(key) {
                    continue;
                }
                let event = ChildAdded {
                    key: key.clone(),
                    value: value.clone(),
                };
                if watcher.tx.send(event).is_err() {
                    // Receiver dropped without calling off()
                    return false;
                }
            }

            watcher.known = children.keys().cloned().collect();
            true
        });
    }
}

fn get_at<'a>(node: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(node, |current, segment| current.as_object()?.get(*segment))
}

fn set_at(node: &mut Value, path: &[&str], value: Value) {
    match path.split_first() {
        None => *node = value,
        Some((head, rest)) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry((*head).to_string()).or_insert(Value::Null);
                set_at(child, rest, value);
            }
        }
    }
}

fn remove_at(node: &mut Value, path: &[&str]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    let Some(map) = node.as_object_mut() else {
        return false;
    };

    if rest.is_empty() {
        return map.remove(*head).is_some();
    }

    let Some(child) = map.get_mut(*head) else {
        return false;
    };
    let removed = remove_at(child, rest);

    // Prune parents left empty
    if child.as_object().is_some_and(Map::is_empty) {
        map.remove(*head);
    }
    removed
}

/// The shared store. Clients talk to it through [`MemoryConnection`]s.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    shared: Arc<Mutex<Shared>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection with its own lease set
    pub fn connect(&self) -> MemoryConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Opened registry connection {}", id);
        MemoryConnection {
            registry: self.clone(),
            id,
            online: AtomicBool::new(true),
            latency: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Inspect the value at a path without going through a connection
    pub fn peek(&self, path: &str) -> Option<Value> {
        let segs = segments(path).ok()?;
        let shared = self.lock().ok()?;
        get_at(&shared.tree, &segs).cloned()
    }

    /// Number of live child-added subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        self.lock().map(|shared| shared.watchers.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>, RegistryError> {
        self.shared
            .lock()
            .map_err(|e| RegistryError::Unavailable(format!("Lock poisoned: {}", e)))
    }
}

/// One client's view of a [`MemoryRegistry`].
///
/// Supports simulated outages, per-operation failures and artificial
/// latency so tests can interleave competing clients.
pub struct MemoryConnection {
    registry: MemoryRegistry,
    id: u64,
    online: AtomicBool,
    latency: Duration,
    failing: Mutex<HashSet<RegistryOp>>,
    counts: Mutex<HashMap<RegistryOp, usize>>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sleep this long before every operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulate the network dropping (every op fails) or coming back
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make every call of one operation kind fail until cleared
    pub fn fail_operation(&self, op: RegistryOp) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// How many times an operation was attempted on this connection
    pub fn op_count(&self, op: RegistryOp) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Drop the connection: fire its leases and end its subscriptions.
    /// Returns the number of leased paths that were removed.
    pub fn disconnect(&self) -> Result<usize, RegistryError> {
        self.online.store(false, Ordering::SeqCst);

        let mut shared = self.registry.lock()?;
        let leased = shared.leases.remove(&self.id).unwrap_or_default();

        let mut removed = 0;
        for path in &leased {
            let segs: Vec<&str> = path.iter().map(String::as_str).collect();
            if remove_at(&mut shared.tree, &segs) {
                removed += 1;
            }
        }

        shared.watchers.retain(|w| w.connection != self.id);
        shared.dispatch();

        info!(
            "Registry connection {} disconnected, {} leased path(s) expired",
            self.id, removed
        );
        Ok(removed)
    }

    async fn begin(&self, op: RegistryOp) -> Result<(), RegistryError> {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_insert(0) += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(format!(
                "connection {} is offline",
                self.id
            )));
        }

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op);
        if failing {
            return Err(RegistryError::Unavailable(format!(
                "injected failure for {:?}",
                op
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl SessionRegistry for MemoryConnection {
    async fn write(&self, path: &str, value: Value) -> Result<(), RegistryError> {
        self.begin(RegistryOp::Write).await?;
        let segs = segments(path)?;
        if segs.is_empty() {
            return Err(RegistryError::InvalidPath(
                "cannot write the registry root".to_string(),
            ));
        }

        let mut shared = self.registry.lock()?;
        if value.is_null() {
            remove_at(&mut shared.tree, &segs);
        } else {
            set_at(&mut shared.tree, &segs, value);
        }
        shared.dispatch();
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RegistryError> {
        self.begin(RegistryOp::Delete).await?;
        let segs = segments(path)?;

        let mut shared = self.registry.lock()?;
        if segs.is_empty() {
            shared.tree = Value::Object(Map::new());
        } else {
            remove_at(&mut shared.tree, &segs);
        }
        shared.dispatch();
        Ok(())
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>, RegistryError> {
        self.begin(RegistryOp::ReadOnce).await?;
        let segs = segments(path)?;

        let shared = self.registry.lock()?;
        Ok(get_at(&shared.tree, &segs).cloned())
    }

    async fn on_child_added(&self, path: &str) -> Result<Subscription, RegistryError> {
        self.begin(RegistryOp::OnChildAdded).await?;
        let segs = segments(path)?;

        let id = SubscriptionId::new(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let mut shared = self.registry.lock()?;
        let mut known = HashSet::new();

        // Backlog: every child already present
        if let Some(children) = get_at(&shared.tree, &segs).and_then(Value::as_object) {
            for (key, value) in children {
                let _ = tx.send(ChildAdded {
                    key: key.clone(),
                    value: value.clone(),
                });
                known.insert(key.clone());
            }
        }

        shared.watchers.push(Watcher {
            id,
            connection: self.id,
            path: segs.iter().map(|s| s.to_string()).collect(),
            known,
            tx,
        });

        debug!("Subscription {:?} watching '{}'", id, path);
        Ok(Subscription::new(id, path, rx))
    }

    async fn off(&self, subscription: SubscriptionId) -> Result<(), RegistryError> {
        self.begin(RegistryOp::Off).await?;
        let mut shared = self.registry.lock()?;
        shared.watchers.retain(|w| w.id != subscription);
        Ok(())
    }

    async fn expire_on_disconnect(&self, path: &str) -> Result<(), RegistryError> {
        self.begin(RegistryOp::ExpireOnDisconnect).await?;
        let segs = segments(path)?;
        if segs.is_empty() {
            return Err(RegistryError::InvalidPath(
                "cannot lease the registry root".to_string(),
            ));
        }

        let mut shared = self.registry.lock()?;
        shared
            .leases
            .entry(self.id)
            .or_default()
            .push(segs.iter().map(|s| s.to_string()).collect());
        Ok(())
    }

    async fn server_timestamp(&self) -> Result<DateTime<Utc>, RegistryError> {
        self.begin(RegistryOp::ServerTimestamp).await?;
        let mut shared = self.registry.lock()?;
        Ok(shared.tick())
    }
}
