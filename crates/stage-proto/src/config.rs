use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::settings::EventSettings;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub setlist: SetlistConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Settings sent with `START_SESSION` before the server has said anything.
    #[serde(default)]
    pub defaults: EventSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Event to select on startup.  Empty means "none yet".
    #[serde(default)]
    pub event_id: String,
    /// How often connect-then-start checks for a live connection.
    #[serde(default = "default_start_poll_interval_ms")]
    pub start_poll_interval_ms: u64,
    /// How long connect-then-start waits before giving up.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    /// Settle time before a local settings change is transmitted.
    #[serde(default = "default_settings_debounce_ms")]
    pub settings_debounce_ms: u64,
    /// A transient error code is surfaced at most once per window.
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
}

/// Where the pre-session setlist comes from: an https:// URL or a local file.
/// `{event_id}` in the source is replaced with the selected event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetlistConfig {
    #[serde(default = "default_setlist_source")]
    pub source: String,
}

impl SetlistConfig {
    pub fn source_for(&self, event_id: &str) -> String {
        self.source.replace("{event_id}", event_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResolverConfig {
    /// Infer item type from `bible:`/`media:`/`announcement:` prefixes on
    /// display ids when no list knows the index.  Off unless a server still
    /// relies on it.
    #[serde(default)]
    pub legacy_prefix_inference: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_id: String::new(),
            start_poll_interval_ms: default_start_poll_interval_ms(),
            start_timeout_secs: default_start_timeout_secs(),
            settings_debounce_ms: default_settings_debounce_ms(),
            error_cooldown_secs: default_error_cooldown_secs(),
        }
    }
}

impl Default for SetlistConfig {
    fn default() -> Self {
        Self {
            source: default_setlist_source(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl SessionConfig {
    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms.max(1))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn settings_debounce(&self) -> Duration {
        Duration::from_millis(self.settings_debounce_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }
}

fn default_server_address() -> String {
    platform::server_address()
}

fn default_reconnect_min_ms() -> u64 {
    250
}

fn default_reconnect_max_ms() -> u64 {
    5_000
}

fn default_start_poll_interval_ms() -> u64 {
    500
}

fn default_start_timeout_secs() -> u64 {
    10
}

fn default_settings_debounce_ms() -> u64 {
    300
}

fn default_error_cooldown_secs() -> u64 {
    30
}

fn default_setlist_source() -> String {
    platform::config_dir()
        .join("setlist.json")
        .to_string_lossy()
        .into_owned()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
