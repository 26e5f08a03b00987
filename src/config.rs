use crate::session::CoordinatorConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Environment variable pointing at the configuration file
pub const CONFIG_PATH_ENV: &str = "SESSION_CONFIG_PATH";

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub session: CoordinatorConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.session.validate()
    }
}

/// Parse configuration from YAML text
pub fn parse_config(contents: &str) -> Result<AppConfig, String> {
    let config: AppConfig = serde_yaml::from_str(contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, String> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config = parse_config(&contents)?;

    info!(
        "Configuration loaded: root '{}', grace {}ms, heartbeat {}s, notice {}ms",
        config.session.registry_root,
        config.session.grace_delay_ms,
        config.session.heartbeat_interval_secs,
        config.session.kick_notice_delay_ms
    );

    Ok(config)
}

/// Load configuration with fallback options.
///
/// Tries `SESSION_CONFIG_PATH`, then the usual file names in the working
/// directory, then falls back to defaults.
pub fn load_config_with_fallback() -> AppConfig {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        match load_config(&config_path) {
            Ok(config) => return config,
            Err(e) => warn!(
                "Failed to load config from {} ({}): {}",
                CONFIG_PATH_ENV, config_path, e
            ),
        }
    }

    for path in ["session.yaml", "session.yml"] {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    info!("No configuration file found, using defaults");
    AppConfig::default()
}
