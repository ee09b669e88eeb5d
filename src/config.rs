//! Runtime settings.
//!
//! Loaded from an optional TOML file, then overridden key by key from
//! `TAP2PAY_*` environment variables.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub device: DeviceSettings,
    pub poller: PollerSettings,
    pub reader: ReaderSettings,
    pub lifecycle: LifecycleSettings,
    pub host: HostSettings,
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend origin, e.g. `https://pay.example.com`.
    pub origin: Option<String>,
    /// Raw `Cookie` header carrying the authenticated session.
    pub cookie: Option<String>,
    pub api_prefix: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            origin: None,
            cookie: None,
            api_prefix: "/api/payments".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 25_000,
        }
    }
}

impl BackendSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerSettings {
    pub interval_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self { interval_ms: 4_000 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaderSettings {
    pub location_retry_ms: u64,
    pub simulated: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            location_retry_ms: 15_000,
            simulated: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleSettings {
    pub cancel_delay_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            cancel_delay_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostSettings {
    pub origin_timeout_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            origin_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorSettings {
    pub discovery_delay_ms: u64,
    pub collect_delay_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            discovery_delay_ms: 500,
            collect_delay_ms: 2_000,
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `TAP2PAY_*` overrides resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup("TAP2PAY_BACKEND_ORIGIN") {
            self.backend.origin = Some(origin);
        }
        if let Some(cookie) = lookup("TAP2PAY_BACKEND_COOKIE") {
            self.backend.cookie = Some(cookie);
        }
        if let Some(id) = lookup("TAP2PAY_DEVICE_ID") {
            self.device.id = Some(id);
        }
        if let Some(v) = parse_env(&lookup, "TAP2PAY_POLL_INTERVAL_MS")? {
            self.poller.interval_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "TAP2PAY_LOCATION_RETRY_MS")? {
            self.reader.location_retry_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "TAP2PAY_CANCEL_DELAY_MS")? {
            self.lifecycle.cancel_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "TAP2PAY_READER_SIMULATED")? {
            self.reader.simulated = v;
        }
        self.validate()
    }

    /// Rejects zero periods for the timers that re-arm themselves, which would
    /// otherwise hammer the backend in a tight loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.interval_ms == 0 {
            return Err(ConfigError::NonPositive {
                key: "poller.interval_ms",
            });
        }
        if self.reader.location_retry_ms == 0 {
            return Err(ConfigError::NonPositive {
                key: "reader.location_retry_ms",
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn location_retry(&self) -> Duration {
        Duration::from_millis(self.reader.location_retry_ms)
    }

    pub fn cancel_delay(&self) -> Duration {
        Duration::from_millis(self.lifecycle.cancel_delay_ms)
    }

    pub fn origin_timeout(&self) -> Duration {
        Duration::from_millis(self.host.origin_timeout_ms)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}
