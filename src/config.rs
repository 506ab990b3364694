//! Environment-driven configuration.

use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;

pub const DEFAULT_NAYAX_BASE_URL: &str = "https://lynx.nayax.com/operational/api/v1";

const MIN_NAYAX_TIMEOUT_SECS: u64 = 10;
const MAX_NAYAX_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where Nayax API tokens are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    Keyring,
    Memory,
}

impl FromStr for SecretBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(SecretBackend::Keyring),
            "memory" => Ok(SecretBackend::Memory),
            other => Err(format!("unknown secret backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Inventory caches older than this are reported as `partial`.
    pub cache_fresh_minutes: i64,
    pub session_hours: i64,
    pub secret_backend: SecretBackend,
    pub nayax_base_url: String,
    pub nayax_timeout_secs: u64,
    /// Variables that were unset, with the default used for each.
    pub defaulted: Vec<(&'static str, String)>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut env_vars = EnvReader::default();
        let data_dir: PathBuf = env_vars.get("VENDSYNC_DATA_DIR", "./data")?;
        let log_dir = match env::var("VENDSYNC_LOG_DIR") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
            _ => {
                let dir = data_dir.join("logs");
                env_vars.note_default("VENDSYNC_LOG_DIR", &dir.display().to_string());
                dir
            }
        };
        let timeout: u64 = env_vars.get("NAYAX_TIMEOUT_SECS", "30")?;

        Ok(Self {
            bind_addr: env_vars.get("VENDSYNC_BIND", "0.0.0.0:8080")?,
            data_dir,
            log_dir,
            cache_fresh_minutes: env_vars.positive("VENDSYNC_CACHE_FRESH_MINUTES", "60")?,
            session_hours: env_vars.positive("VENDSYNC_SESSION_HOURS", "12")?,
            secret_backend: env_vars.get("VENDSYNC_SECRET_BACKEND", "keyring")?,
            nayax_base_url: env_vars.get("NAYAX_BASE_URL", DEFAULT_NAYAX_BASE_URL)?,
            nayax_timeout_secs: timeout.clamp(MIN_NAYAX_TIMEOUT_SECS, MAX_NAYAX_TIMEOUT_SECS),
            defaulted: env_vars.defaulted,
        })
    }

    /// Report the variables that fell back to defaults. Call once logging is up.
    pub fn log_defaults(&self) {
        for (key, default) in &self.defaulted {
            info!("{key} not set, using default: {default}");
        }
    }

    /// Configuration for unit tests: in-memory secrets, no filesystem paths used.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir: PathBuf::from(":memory:"),
            log_dir: PathBuf::from(":memory:"),
            cache_fresh_minutes: 60,
            session_hours: 12,
            secret_backend: SecretBackend::Memory,
            nayax_base_url: DEFAULT_NAYAX_BASE_URL.to_string(),
            nayax_timeout_secs: MIN_NAYAX_TIMEOUT_SECS,
            defaulted: Vec::new(),
        }
    }
}

/// Reads variables and remembers which ones were missing.
#[derive(Default)]
struct EnvReader {
    defaulted: Vec<(&'static str, String)>,
}

impl EnvReader {
    fn note_default(&mut self, key: &'static str, default: &str) {
        self.defaulted.push((key, default.to_string()));
    }

    fn get<T: FromStr>(&mut self, key: &'static str, default: &str) -> Result<T, ConfigError>
    where
        T::Err: Display,
    {
        let raw = match env::var(key) {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                self.note_default(key, default);
                default.to_string()
            }
        };
        raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn positive(&mut self, key: &'static str, default: &str) -> Result<i64, ConfigError> {
        let value: i64 = self.get(key, default)?;
        if value <= 0 {
            return Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }
}
