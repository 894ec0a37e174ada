//! Configuration management
//!
//! Settings are layered, highest precedence first:
//! 1. `ZD_*` environment variables
//! 2. the `zapdesk.toml` file
//! 3. built-in defaults
//!
//! `${VAR_NAME}` inside the file is replaced with the variable's value.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Default config file name looked up in the working directory
pub const CONFIG_FILE: &str = "zapdesk.toml";

/// Main configuration for zapdesk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP API configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// WhatsApp daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Outbound webhook configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Chatwoot bridge configuration
    #[serde(default)]
    pub chatwoot: ChatwootSettings,

    /// Connection registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for HTTP API server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Admin API key for management endpoints (None = open)
    pub api_key: Option<String>,

    /// Allowed CORS origins. If empty, any origin is allowed
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
            allowed_origins: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file (`:memory:` for ephemeral)
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the WhatsApp multi-device daemon
    #[serde(default = "default_daemon_url")]
    pub url: String,

    /// Event feed polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for a single daemon request
    #[serde(default = "default_daemon_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            url: default_daemon_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_daemon_timeout_secs(),
        }
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Timeout for a single webhook POST
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-session pending event capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatwootSettings {
    /// Timeout for a single Chatwoot REST call
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-session pending event capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ChatwootSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ChatwootSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long `start` waits for the client to connect or issue a QR code
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    /// Reconnect sessions that were connected when the process stopped
    #[serde(default = "default_restore_on_boot")]
    pub restore_on_boot: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout_secs(),
            restore_on_boot: default_restore_on_boot(),
        }
    }
}

impl RegistryConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "data/zapdesk.db".to_string()
}

fn default_daemon_url() -> String {
    "http://localhost:7070".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_daemon_timeout_secs() -> u64 {
    30
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    256
}

fn default_start_timeout_secs() -> u64 {
    20
}

fn default_restore_on_boot() -> bool {
    true
}

fn parse_bool(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "false" | "0" | "no" | "off")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Expand `${VAR_NAME}` references in config text
    ///
    /// Unset variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{'

                let mut var_name = String::new();
                while let Some(c) = chars.next() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load from a TOML file
    ///
    /// `${VAR_NAME}` references are expanded first, then `ZD_*` variables
    /// override the result.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// Parse a TOML document after `${VAR}` expansion, without env overrides
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded_content = Self::expand_env_vars(content);

        let config: TomlConfig = toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        Ok(Self::from_toml_config(config))
    }

    /// Load from the default location
    ///
    /// Uses `./zapdesk.toml` when present, otherwise defaults plus environment.
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        Ok(Self::from_env())
    }

    /// Load configuration from defaults plus environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Build a Config from the parsed file
    fn from_toml_config(toml: TomlConfig) -> Self {
        let server = toml.server.unwrap_or_default();
        let database = toml.database.unwrap_or_default();
        let daemon = toml.daemon.unwrap_or_default();
        let webhook = toml.webhook.unwrap_or_default();
        let chatwoot = toml.chatwoot.unwrap_or_default();
        let registry = toml.registry.unwrap_or_default();

        Config {
            server: ServerConfig {
                port: server.port.unwrap_or_else(default_port),
                api_key: server.api_key.filter(|k| !k.is_empty()),
                allowed_origins: server.allowed_origins,
            },
            database: DatabaseConfig {
                path: database.path.unwrap_or_else(default_db_path),
            },
            daemon: DaemonConfig {
                url: daemon.url.unwrap_or_else(default_daemon_url),
                poll_interval_ms: daemon
                    .poll_interval_ms
                    .unwrap_or_else(default_poll_interval_ms),
                request_timeout_secs: daemon
                    .request_timeout_secs
                    .unwrap_or_else(default_daemon_timeout_secs),
            },
            webhook: WebhookConfig {
                timeout_secs: webhook.timeout_secs.unwrap_or_else(default_http_timeout_secs),
                queue_capacity: webhook.queue_capacity.unwrap_or_else(default_queue_capacity),
            },
            chatwoot: ChatwootSettings {
                timeout_secs: chatwoot.timeout_secs.unwrap_or_else(default_http_timeout_secs),
                queue_capacity: chatwoot.queue_capacity.unwrap_or_else(default_queue_capacity),
            },
            registry: RegistryConfig {
                start_timeout_secs: registry
                    .start_timeout_secs
                    .unwrap_or_else(default_start_timeout_secs),
                restore_on_boot: registry
                    .restore_on_boot
                    .unwrap_or_else(default_restore_on_boot),
            },
        }
    }

    /// Apply `ZD_*` overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("ZD_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(key) = std::env::var("ZD_API_KEY") {
            if !key.is_empty() {
                self.server.api_key = Some(key);
            }
        }
        if let Ok(origins) = std::env::var("ZD_ALLOWED_ORIGINS") {
            self.server.allowed_origins = Some(split_list(&origins));
        }

        if let Ok(path) = std::env::var("ZD_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }

        if let Ok(url) = std::env::var("ZD_DAEMON_URL") {
            if !url.is_empty() {
                self.daemon.url = url;
            }
        }
        if let Ok(ms) = std::env::var("ZD_DAEMON_POLL_MS") {
            if let Ok(ms) = ms.parse() {
                self.daemon.poll_interval_ms = ms;
            }
        }

        if let Ok(secs) = std::env::var("ZD_WEBHOOK_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.webhook.timeout_secs = secs;
            }
        }
        if let Ok(secs) = std::env::var("ZD_CHATWOOT_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.chatwoot.timeout_secs = secs;
            }
        }

        if let Ok(secs) = std::env::var("ZD_START_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.registry.start_timeout_secs = secs;
            }
        }
        if let Ok(restore) = std::env::var("ZD_RESTORE_ON_BOOT") {
            self.registry.restore_on_boot = parse_bool(&restore);
        }
    }
}

// ============================================================================
// File layout
// ============================================================================

/// Top level of `zapdesk.toml`
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    database: Option<TomlDatabaseConfig>,
    daemon: Option<TomlDaemonConfig>,
    webhook: Option<TomlQueueConfig>,
    chatwoot: Option<TomlQueueConfig>,
    registry: Option<TomlRegistryConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServerConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDatabaseConfig {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDaemonConfig {
    url: Option<String>,
    poll_interval_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// Shared shape of `[webhook]` and `[chatwoot]`
#[derive(Debug, Deserialize, Default)]
struct TomlQueueConfig {
    timeout_secs: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlRegistryConfig {
    start_timeout_secs: Option<u64>,
    restore_on_boot: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.path, "data/zapdesk.db");
        assert_eq!(config.daemon.url, "http://localhost:7070");
        assert_eq!(config.webhook.timeout(), Duration::from_secs(10));
        assert_eq!(config.registry.start_timeout(), Duration::from_secs(20));
        assert!(config.registry.restore_on_boot);
    }

    #[test]
    fn test_expand_env_vars() {
        // Variables only this test sets
        unsafe {
            std::env::set_var("ZD_CONFIG_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${ZD_CONFIG_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        // Unset variable
        let result = Config::expand_env_vars("prefix_${ZD_NONEXISTENT_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("ZD_CONFIG_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here"), "no_vars_here");
        assert_eq!(Config::expand_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_expand_env_vars_empty_name() {
        assert_eq!(Config::expand_env_vars("${}_content"), "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[server]
port = 9090
api_key = "admin"
allowed_origins = ["https://desk.example"]

[database]
path = "/var/lib/zapdesk.db"

[daemon]
url = "http://wa-daemon:7000"
poll_interval_ms = 250

[webhook]
timeout_secs = 3

[chatwoot]
queue_capacity = 32

[registry]
restore_on_boot = false
"#;

        let config = Config::from_toml_str(toml_content).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.api_key.as_deref(), Some("admin"));
        assert_eq!(
            config.server.allowed_origins,
            Some(vec!["https://desk.example".to_string()])
        );
        assert_eq!(config.database.path, "/var/lib/zapdesk.db");
        assert_eq!(config.daemon.url, "http://wa-daemon:7000");
        assert_eq!(config.daemon.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.daemon.request_timeout_secs, 30);
        assert_eq!(config.webhook.timeout_secs, 3);
        assert_eq!(config.webhook.queue_capacity, 256);
        assert_eq!(config.chatwoot.queue_capacity, 32);
        assert!(!config.registry.restore_on_boot);
    }

    #[test]
    fn test_toml_empty_api_key_is_none() {
        let config = Config::from_toml_str("[server]\napi_key = \"\"\n").unwrap();
        assert!(config.server.api_key.is_none());
    }

    #[test]
    fn test_toml_parse_error() {
        let err = Config::from_toml_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("FALSE"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
    }
}
