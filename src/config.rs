//! Configuration module for the market data client

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Market data server address
    pub server_ip: String,
    pub port: u16,

    /// Application credentials issued on registration
    pub app_id: Option<String>,
    pub app_secret: Option<String>,

    /// Registration email
    pub email: Option<String>,

    /// Timeouts
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,

    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,

    /// Compress outbound bodies until the server says otherwise
    pub compress: bool,

    /// Symbols the daemon subscribes to (e.g., ["000001", "sh600000"])
    pub symbols: Vec<String>,

    /// Port for the health/metrics endpoint
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let symbols: Vec<String> = env::var("DSX_SYMBOLS")
            .unwrap_or_else(|_| defaults.symbols.join(","))
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server_ip: env::var("DSX_SERVER_IP").unwrap_or(defaults.server_ip),
            port: env::var("DSX_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            app_id: env::var("DSX_APP_ID").ok().filter(|v| !v.is_empty()),
            app_secret: env::var("DSX_APP_SECRET").ok().filter(|v| !v.is_empty()),
            email: env::var("DSX_EMAIL").ok().filter(|v| !v.is_empty()),
            connect_timeout_ms: env::var("DSX_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connect_timeout_ms),
            read_timeout_ms: env::var("DSX_READ_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.read_timeout_ms),
            reconnect_delay_ms: env::var("DSX_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reconnect_delay_ms),
            compress: env::var("DSX_COMPRESS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compress),
            symbols,
            health_port: env::var("DSX_HEALTH_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.health_port),
        })
    }

    /// Load a config file (toml/json/yaml by extension), overridden by `DSX_*` variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("DSX"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// `ip:port` for the market data server
    pub fn address(&self) -> String {
        format!("{}:{}", self.server_ip, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Login runs only when both halves of the credentials are present
    pub fn has_credentials(&self) -> bool {
        matches!(
            (self.app_id.as_deref(), self.app_secret.as_deref()),
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            port: 8001,
            app_id: None,
            app_secret: None,
            email: None,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 60_000,
            reconnect_delay_ms: 3_000,
            compress: true,
            symbols: vec!["000001".to_string()],
            health_port: 9090,
        }
    }
}
