// Typed session store over the raw registry capabilities

use super::types::SessionRecord;
use crate::error::RegistryError;
use crate::registry::path::child_path;
use crate::registry::{SessionRegistry, Subscription, SubscriptionId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field updated by the heartbeat
const LAST_ACTIVITY_FIELD: &str = "lastActivityAt";

/// Session records laid out as `{root}/{userId}/{sessionId}`
#[derive(Clone)]
pub struct SessionStore {
    registry: Arc<dyn SessionRegistry>,
    root: String,
}

impl SessionStore {
    /// Create a store rooted at `root` (e.g. "sessions")
    pub fn new(registry: Arc<dyn SessionRegistry>, root: impl Into<String>) -> Self {
        Self {
            registry,
            root: root.into().trim_matches('/').to_string(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Path holding every record of one user
    pub fn user_path(&self, user_id: &str) -> Result<String, RegistryError> {
        child_path(&self.root, user_id)
    }

    /// Path of a single record
    pub fn record_path(&self, user_id: &str, session_id: &str) -> Result<String, RegistryError> {
        child_path(&self.user_path(user_id)?, session_id)
    }

    /// Store-supplied current time
    pub async fn now(&self) -> Result<DateTime<Utc>, RegistryError> {
        self.registry.server_timestamp().await
    }

    /// Delete every record under the user's path, unconditionally.
    /// Returns how many were removed.
    pub async fn evict_all(&self, user_id: &str) -> Result<usize, RegistryError> {
        let user_path = self.user_path(user_id)?;
        let existing = self.registry.read_once(&user_path).await?;

        let keys: Vec<String> = match existing {
            Some(Value::Object(children)) => children.keys().cloned().collect(),
            _ => return Ok(0),
        };

        for session_id in &keys {
            let path = child_path(&user_path, session_id)?;
            self.registry.delete(&path).await?;
            debug!("Evicted session {} for user {}", session_id, user_id);
        }

        if !keys.is_empty() {
            info!("Evicted {} existing session(s) for user {}", keys.len(), user_id);
        }
        Ok(keys.len())
    }

    /// Write a record at its path
    pub async fn register(&self, record: &SessionRecord) -> Result<(), RegistryError> {
        let path = self.record_path(&record.user_id, &record.session_id)?;
        let value = serde_json::to_value(record)?;
        self.registry.write(&path, value).await
    }

    /// Have the store remove the record if this client vanishes
    pub async fn arm_lease(&self, user_id: &str, session_id: &str) -> Result<(), RegistryError> {
        let path = self.record_path(user_id, session_id)?;
        self.registry.expire_on_disconnect(&path).await
    }

    /// Refresh `lastActivityAt` on a record
    pub async fn touch(
        &self,
        user_id: &str,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let path = child_path(&self.record_path(user_id, session_id)?, LAST_ACTIVITY_FIELD)?;
        self.registry
            .write(&path, Value::from(at.timestamp_millis()))
            .await
    }

    /// Delete a single record
    pub async fn remove(&self, user_id: &str, session_id: &str) -> Result<(), RegistryError> {
        let path = self.record_path(user_id, session_id)?;
        self.registry.delete(&path).await
    }

    /// Fetch one record, if present and well-formed
    pub async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, RegistryError> {
        let path = self.record_path(user_id, session_id)?;
        let Some(value) = self.registry.read_once(&path).await? else {
            return Ok(None);
        };
        Ok(decode_record(user_id, session_id, value))
    }

    /// All records for a user, oldest first. Malformed entries are skipped.
    pub async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>, RegistryError> {
        let user_path = self.user_path(user_id)?;
        let Some(Value::Object(children)) = self.registry.read_once(&user_path).await? else {
            return Ok(Vec::new());
        };

        let mut records: Vec<SessionRecord> = children
            .into_iter()
            .filter_map(|(session_id, value)| decode_record(user_id, &session_id, value))
            .collect();

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Watch for records added under the user's path
    pub async fn watch_user(&self, user_id: &str) -> Result<Subscription, RegistryError> {
        let user_path = self.user_path(user_id)?;
        self.registry.on_child_added(&user_path).await
    }

    pub async fn unwatch(&self, subscription: SubscriptionId) -> Result<(), RegistryError> {
        self.registry.off(subscription).await
    }
}

/// Decode a stored value into a record owned by `user_id`
pub fn decode_record(user_id: &str, session_id: &str, value: Value) -> Option<SessionRecord> {
    match serde_json::from_value::<SessionRecord>(value) {
        Ok(mut record) => {
            record.user_id = user_id.to_string();
            Some(record)
        }
        Err(e) => {
            warn!(
                "Skipping malformed session record {} for user {}: {}",
                session_id, user_id, e
            );
            None
        }
    }
}
