// Session types and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Coordinator configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Top-level registry path under which sessions are grouped by user
    pub registry_root: String,
    /// Wait before arming the usurpation watch (avoids seeing our own write)
    pub grace_delay_ms: u64,
    /// Heartbeat period for refreshing `lastActivityAt`
    pub heartbeat_interval_secs: u64,
    /// How long the kicked-out notice stays up before logout
    pub kick_notice_delay_ms: u64,
    /// Maximum stored length of the raw client identifier, in characters
    pub max_client_identifier_len: usize,
    /// Message shown to the user when another login takes over
    pub kick_notice_message: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            registry_root: "sessions".to_string(),
            grace_delay_ms: 1000,
            heartbeat_interval_secs: 30,
            kick_notice_delay_ms: 2000,
            max_client_identifier_len: 200,
            kick_notice_message:
                "Your account was signed in on another device. You have been logged out."
                    .to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn kick_notice_delay(&self) -> Duration {
        Duration::from_millis(self.kick_notice_delay_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let root = self.registry_root.trim_matches('/');
        if root.is_empty() {
            return Err("registry_root must not be empty".to_string());
        }
        crate::registry::path::validate_segment(root)
            .map_err(|e| format!("registry_root is not a single path segment: {}", e))?;

        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be greater than zero".to_string());
        }

        if self.max_client_identifier_len == 0 {
            return Err("max_client_identifier_len must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Lifecycle of a coordinator. `Terminated` is final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Constructed, nothing registered yet
    Uninitialized,
    /// `initialize` in flight
    Initializing,
    /// Record registered and leased; heartbeat running
    Active,
    /// Another login took over; forced teardown in progress
    KickedOut,
    /// Torn down, either voluntarily or after being kicked out
    Terminated,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Uninitialized => "uninitialized",
            CoordinatorState::Initializing => "initializing",
            CoordinatorState::Active => "active",
            CoordinatorState::KickedOut => "kicked_out",
            CoordinatorState::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Terminated)
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record at `{root}/{userId}/{sessionId}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Owning user; implied by the record's path and not persisted
    #[serde(skip)]
    pub user_id: String,
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity_at: DateTime<Utc>,
    pub device_descriptor: String,
    pub raw_client_identifier: String,
}

impl SessionRecord {
    /// Create a record stamped with a store-supplied time
    pub fn new(
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
        device_descriptor: String,
        raw_client_identifier: String,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            created_at: now,
            last_activity_at: now,
            device_descriptor,
            raw_client_identifier,
        }
    }
}

/// Best-effort view of the client environment a session runs in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEnvironment {
    /// Free-text client identifier, typically a browser user agent
    pub user_agent: Option<String>,
    /// Platform hint reported separately from the user agent
    pub platform: Option<String>,
}

impl ClientEnvironment {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Lifecycle events published by a coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Our record is written and leased; `evicted` prior records were removed
    Registered { session_id: String, evicted: usize },
    /// The usurpation watch is live
    WatchArmed,
    /// The watch could not be armed; the session was withdrawn
    WatchFailed,
    /// Another session registered for the same user
    Usurped { by_session_id: String },
    /// Reached `Terminated`; `forced` is true on the kicked-out path
    Terminated { forced: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_delay(), Duration::from_millis(1000));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.kick_notice_delay(), Duration::from_millis(2000));
        assert_eq!(config.max_client_identifier_len, 200);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CoordinatorConfig {
            heartbeat_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("heartbeat"));

        config.heartbeat_interval_secs = 30;
        config.registry_root = "a/b".to_string();
        assert!(config.validate().is_err());

        config.registry_root = "/".to_string();
        assert!(config.validate().unwrap_err().contains("must not be empty"));

        // Zero grace delay is allowed
        config.registry_root = "sessions".to_string();
        config.grace_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_record_persisted_shape() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = SessionRecord::new(
            "u1",
            "s1",
            now,
            "Windows / Chrome".to_string(),
            "Mozilla/5.0".to_string(),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "sessionId": "s1",
                "createdAt": 1_700_000_000_123_i64,
                "lastActivityAt": 1_700_000_000_123_i64,
                "deviceDescriptor": "Windows / Chrome",
                "rawClientIdentifier": "Mozilla/5.0",
            })
        );

        let decoded: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.user_id, "");
        assert_eq!(decoded.created_at, now);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CoordinatorState::KickedOut.to_string(), "kicked_out");
        assert!(CoordinatorState::Terminated.is_terminal());
        assert!(!CoordinatorState::KickedOut.is_terminal());
    }
}
