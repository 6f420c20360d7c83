use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "VESSEL_CONFIG";
/// Environment variable overriding the listen address.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Path prefix the application is mounted under; empty for the root.
    pub mount_prefix: String,
    pub accept_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub keep_alive_timeout_ms: u64,
    pub buffer_size: usize,
    pub max_head_size: usize,
    pub max_body_size: usize,
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            mount_prefix: String::new(),
            accept_timeout_ms: 500,
            read_timeout_ms: 30_000,
            keep_alive_timeout_ms: 5_000,
            buffer_size: 8192,
            max_head_size: 64 * 1024,
            max_body_size: 10 * 1024 * 1024,
            server_name: "vessel".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on handler tasks, idle and busy together.
    pub max_handlers: usize,
    /// Idle handlers kept alive past the idle timeout.
    pub min_idle_handlers: usize,
    pub idle_timeout_ms: u64,
    pub max_requests: usize,
    pub max_responses: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_handlers: 64,
            min_idle_handlers: 4,
            idle_timeout_ms: 60_000,
            max_requests: 128,
            max_responses: 128,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default inactivity timeout; `<= 0` never expires.
    pub timeout_secs: i64,
    /// How often expired sessions are swept.
    pub purge_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            purge_interval_secs: 60,
        }
    }
}

impl Config {
    /// Loads `VESSEL_CONFIG` if set, else the defaults, then applies the
    /// `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var(LISTEN_ENV) {
            config.server.listen_addr = addr;
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
