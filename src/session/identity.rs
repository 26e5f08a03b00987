// Session identity generation
// Session ids and best-effort device descriptors for registry records

use super::types::ClientEnvironment;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Placeholder for any device dimension that cannot be determined
pub const UNKNOWN: &str = "Unknown";

/// Last time component handed out, so ids from one process never go backwards
static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Generate a new session id.
///
/// The id is a zero-padded hex millisecond counter followed by 64 random
/// bits. The time component strictly increases within a process even when
/// the wall clock stalls or steps back.
pub fn new_session_id() -> String {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_ISSUED_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    let millis = now.max(previous + 1);

    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{:012x}-{}", millis, &random[..16])
}

/// Device information parsed from a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device type (desktop, mobile, tablet)
    pub device_type: String,
    /// Operating system
    pub os: String,
    /// Browser name
    pub browser: String,
}

impl DeviceInfo {
    /// Human-readable summary stored in the session record
    pub fn descriptor(&self) -> String {
        format!("{} / {}", self.os, self.browser)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.descriptor(), self.device_type)
    }
}

/// Classify the client environment. Each dimension falls back to
/// [`UNKNOWN`] on its own.
pub fn device_info(env: &ClientEnvironment) -> DeviceInfo {
    let ua = env.user_agent.as_deref().unwrap_or("").to_lowercase();
    let platform = env.platform.as_deref().unwrap_or("").to_lowercase();

    let device_type = if ua.contains("tablet") || ua.contains("ipad") {
        "tablet"
    } else if ua.contains("mobile") || ua.contains("iphone") {
        "mobile"
    } else if ua.is_empty() {
        UNKNOWN
    } else {
        "desktop"
    }
    .to_string();

    // Mobile OS first; their user agents also mention desktop platforms
    let os = detect_os(&ua)
        .or_else(|| detect_os(&platform))
        .unwrap_or(UNKNOWN)
        .to_string();

    let browser = if ua.contains("edg") {
        "Edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox") || ua.contains("fxios") {
        "Firefox"
    } else if ua.contains("chrome") || ua.contains("crios") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        UNKNOWN
    }
    .to_string();

    DeviceInfo {
        device_type,
        os,
        browser,
    }
}

fn detect_os(signal: &str) -> Option<&'static str> {
    if signal.contains("android") {
        Some("Android")
    } else if signal.contains("iphone") || signal.contains("ipad") || signal.contains("ios") {
        Some("iOS")
    } else if signal.contains("windows") || signal.contains("win32") || signal.contains("win64") {
        Some("Windows")
    } else if signal.contains("mac os") || signal.contains("macos") || signal.contains("macintel") {
        Some("macOS")
    } else if signal.contains("cros") {
        Some("ChromeOS")
    } else if signal.contains("linux") {
        Some("Linux")
    } else {
        None
    }
}

/// Descriptor string for a session record; never empty
pub fn device_descriptor(env: &ClientEnvironment) -> String {
    device_info(env).descriptor()
}

/// Truncate the raw client identifier to at most `max_chars` characters
pub fn truncate_client_identifier(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}
