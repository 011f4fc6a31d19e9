//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Local UI API binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Directory holding device-local records
    pub data_dir: PathBuf,
    /// Directory shared by every process on this machine for mirrored rooms
    pub mirror_dir: PathBuf,
    /// Local mirror poll period for spectators
    pub mirror_poll_interval: Duration,
    /// Upper bound on a single room push or room id check
    pub push_timeout: Duration,

    /// Cloud realtime database; `None` runs mirror-only
    pub cloud: Option<CloudConfig>,

    /// Allowed UI origin for CORS
    pub client_origin: String,
}

/// Cloud backend settings
#[derive(Clone, Debug)]
pub struct CloudConfig {
    /// Realtime database root URL
    pub database_url: String,
    /// Optional database auth token
    pub auth_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("127.0.0.1:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        };

        let mirror_poll_ms = match env::var("MIRROR_POLL_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::Invalid("MIRROR_POLL_MS"))?,
            Err(_) => 1000,
        };

        let push_timeout_ms = match env::var("PUSH_TIMEOUT_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::Invalid("PUSH_TIMEOUT_MS"))?,
            Err(_) => 5000,
        };

        let cloud = env::var("CLOUD_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|database_url| CloudConfig {
                database_url,
                auth_token: env::var("CLOUD_AUTH_TOKEN").ok(),
            });

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".cacho")),
            mirror_dir: env::var("MIRROR_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("cacho_mirror")),
            mirror_poll_interval: Duration::from_millis(mirror_poll_ms),
            push_timeout: Duration::from_millis(push_timeout_ms),

            cloud,

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
