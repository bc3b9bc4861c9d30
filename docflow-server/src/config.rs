//! # Configuration Management
//!
//! TOML-based configuration with environment-variable overrides and a
//! startup validation pass.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! timeout = "30s"
//! max_upload_bytes = 52428800
//! strict_startup = false
//!
//! [broker]
//! backend = "memory"          # or "redis"
//! url = "redis://localhost:6379/0"
//! events_channel = "events"
//!
//! [events]
//! buffer_max_size = 1000
//! buffer_max_age = "15m"
//! client_inbox_size = 100
//!
//! [storage]
//! root = "./storage"
//!
//! [shutdown]
//! grace_period = "30s"
//!
//! [workers]
//! max_retries = 3
//! retry_delay = "1s"
//!
//! [[plugins]]
//! name = "audio_transcription"
//! enabled = true
//! [plugins.settings]
//! model = "small"
//! ```
//!
//! ## Environment overrides
//!
//! `DOCFLOW_HOST`, `DOCFLOW_PORT`, `DOCFLOW_TIMEOUT`,
//! `DOCFLOW_MAX_UPLOAD_BYTES`, `DOCFLOW_BROKER_BACKEND`,
//! `DOCFLOW_REDIS_URL`, `DOCFLOW_EVENT_BUFFER_SIZE`,
//! `DOCFLOW_EVENT_BUFFER_AGE`, `DOCFLOW_CLIENT_INBOX_SIZE`,
//! `DOCFLOW_STORAGE_ROOT`, `DOCFLOW_SHUTDOWN_GRACE`, `DOCFLOW_LOG_LEVEL`.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docflow_sdk::common::duration_serde;
use docflow_sdk::events::JsonMap;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub events: EventsConfig,
    pub storage: StorageConfig,
    pub shutdown: ShutdownConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
    /// Per-plugin settings and enabled flags, seeded into the config store
    pub plugins: Vec<PluginSettingsEntry>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Upper bound on upload body size in bytes
    pub max_upload_bytes: usize,
    /// Fail startup when the broker is unreachable
    pub strict_startup: bool,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

/// Message broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Redis connection URL (redis backend only)
    pub url: String,
    /// Pub/sub channel carrying event envelopes
    pub events_channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process channels; suitable for tests and single-process runs
    Memory,
    /// Redis pub/sub and lists; required for an out-of-process worker pool
    Redis,
}

/// Event bus knobs: ring buffer bounds and streaming-client inbox size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub buffer_max_size: usize,
    #[serde(with = "duration_serde")]
    pub buffer_max_age: Duration,
    pub client_inbox_size: usize,
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for locally stored document bytes
    pub root: String,
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Total graceful window; job drain gets this minus a 5 s reserve
    #[serde(with = "duration_serde")]
    pub grace_period: Duration,
}

/// Worker runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Retries for transient-external failures before the job fails
    pub max_retries: u32,
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Per-plugin configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettingsEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub settings: JsonMap,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            broker: BrokerConfig::default(),
            events: EventsConfig::default(),
            storage: StorageConfig::default(),
            shutdown: ShutdownConfig::default(),
            workers: WorkerConfig::default(),
            logging: LoggingConfig::default(),
            plugins: Vec::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout: Duration::from_secs(30),
            max_upload_bytes: 50 * 1024 * 1024,
            strict_startup: false,
            cors: CorsConfig::default(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            url: "redis://localhost:6379/0".to_string(),
            events_channel: "events".to_string(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: 1000,
            buffer_max_age: Duration::from_secs(15 * 60),
            client_inbox_size: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "./storage".to_string(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("DOCFLOW_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = env::var("DOCFLOW_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid DOCFLOW_PORT: {}", port_str))?;
            if port > 0 {
                self.server.port = port;
            }
        }

        if let Ok(timeout) = env::var("DOCFLOW_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }

        if let Ok(max_upload) = env::var("DOCFLOW_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = max_upload
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid DOCFLOW_MAX_UPLOAD_BYTES: {}", max_upload))?;
        }

        if let Ok(backend) = env::var("DOCFLOW_BROKER_BACKEND") {
            match backend.as_str() {
                "memory" => self.broker.backend = BrokerBackend::Memory,
                "redis" => {
                    self.broker.backend = BrokerBackend::Redis;
                    if let Ok(url) = env::var("DOCFLOW_REDIS_URL") {
                        self.broker.url = url;
                    }
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid broker backend: {}. Use 'memory' or 'redis'",
                        backend
                    ));
                }
            }
        }

        if let Ok(size) = env::var("DOCFLOW_EVENT_BUFFER_SIZE") {
            self.events.buffer_max_size = size
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid DOCFLOW_EVENT_BUFFER_SIZE: {}", size))?;
        }

        if let Ok(age) = env::var("DOCFLOW_EVENT_BUFFER_AGE") {
            self.events.buffer_max_age = parse_duration(&age)?;
        }

        if let Ok(size) = env::var("DOCFLOW_CLIENT_INBOX_SIZE") {
            self.events.client_inbox_size = size
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid DOCFLOW_CLIENT_INBOX_SIZE: {}", size))?;
        }

        if let Ok(root) = env::var("DOCFLOW_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage.root = root;
            }
        }

        if let Ok(grace) = env::var("DOCFLOW_SHUTDOWN_GRACE") {
            self.shutdown.grace_period = parse_duration(&grace)?;
        }

        if let Ok(level) = env::var("DOCFLOW_LOG_LEVEL") {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if valid_levels.contains(&level.as_str()) {
                self.logging.level = level;
            } else {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Use: {:?}",
                    level,
                    valid_levels
                ));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be between 1 and 65535"));
        }

        if self.server.timeout.as_secs() == 0 {
            return Err(anyhow::anyhow!("Server timeout cannot be 0"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size cannot be 0"));
        }

        if self.broker.backend == BrokerBackend::Redis
            && !self.broker.url.starts_with("redis://")
            && !self.broker.url.starts_with("rediss://")
        {
            return Err(anyhow::anyhow!(
                "Redis URL must start with redis:// or rediss://"
            ));
        }

        if self.broker.events_channel.is_empty() {
            return Err(anyhow::anyhow!("Events channel cannot be empty"));
        }

        if self.events.buffer_max_size == 0 {
            return Err(anyhow::anyhow!("Event buffer size cannot be 0"));
        }

        if self.events.buffer_max_age.as_secs() == 0 {
            return Err(anyhow::anyhow!("Event buffer age cannot be 0"));
        }

        if self.events.client_inbox_size == 0 {
            return Err(anyhow::anyhow!("Client inbox size cannot be 0"));
        }

        if self.shutdown.grace_period.as_secs() < 10 {
            return Err(anyhow::anyhow!(
                "Shutdown grace period must be at least 10 seconds, got {}",
                self.shutdown.grace_period.as_secs()
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.plugins {
            if entry.name.is_empty() {
                return Err(anyhow::anyhow!("Plugin name cannot be empty"));
            }
            if !seen.insert(&entry.name) {
                return Err(anyhow::anyhow!(
                    "Duplicate plugin configuration: {}",
                    entry.name
                ));
            }
        }

        Ok(())
    }

    /// Plugin settings keyed by name, handed to the loader.
    pub fn plugin_settings(&self) -> HashMap<String, JsonMap> {
        self.plugins
            .iter()
            .map(|entry| (entry.name.clone(), entry.settings.clone()))
            .collect()
    }

    /// Plugins explicitly disabled in configuration.
    pub fn disabled_plugins(&self) -> Vec<String> {
        self.plugins
            .iter()
            .filter(|entry| !entry.enabled)
            .map(|entry| entry.name.clone())
            .collect()
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    duration_serde::parse_duration(s).map_err(|e| anyhow::anyhow!(e))
}
