use crate::mailer::MailerSettings;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;

// Defaults used when neither the config file nor the environment say otherwise.
const HOST: &str = "192.168.1.50";
const PORT: u16 = 3493; // The NUT default.
const UPS_NAME: &str = "ups";
const POLL_INTERVAL_MS: u64 = 10_000;
const SHUTDOWN_DELAY_MS: u64 = 120_000;

const ENV_PREFIX: &str = "UPSMON_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Extract(#[from] figment::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise config: {0}")]
    Serialise(#[from] toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(#[from] io::Error),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ups_name: String,
    pub poll_interval: u64,
    pub shutdown_delay: u64,
    pub enable_notifications: bool,
    pub autostart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailer: Option<MailerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: HOST.to_string(),
            port: PORT,
            user: String::new(),
            password: String::new(),
            ups_name: UPS_NAME.to_string(),
            poll_interval: POLL_INTERVAL_MS,
            shutdown_delay: SHUTDOWN_DELAY_MS,
            enable_notifications: true,
            autostart: true,
            mailer: None,
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if present), then `UPSMON_*` variables.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".into()));
        }
        if self.ups_name.trim().is_empty() {
            return Err(ConfigError::Invalid("ups_name must not be empty".into()));
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::Invalid("poll_interval must not be 0".into()));
        }
        Ok(())
    }

    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(&Settings::default())?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Writes the live flags back to the config file, keeping everything else
    /// in it as is. A missing file is created from the defaults.
    pub fn save_flags(path: &Path, flags: Flags) -> Result<(), ConfigError> {
        let mut doc = if path.exists() {
            fs::read_to_string(path)?.parse::<toml::Value>()?
        } else {
            toml::Value::try_from(Settings::default())?
        };

        let table = doc
            .as_table_mut()
            .ok_or_else(|| ConfigError::Invalid("config file is not a table".into()))?;
        table.insert(
            "enable_notifications".into(),
            toml::Value::Boolean(flags.notifications),
        );
        table.insert("autostart".into(), toml::Value::Boolean(flags.autostart));

        fs::write(path, toml::to_string_pretty(&doc)?)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub notifications: bool,
    pub autostart: bool,
}

/// The two settings that may change while monitoring.
///
/// Cloning shares the same flags.
#[derive(Debug, Clone)]
pub struct LiveFlags {
    inner: Arc<Mutex<Flags>>,
}

impl LiveFlags {
    pub fn new(settings: &Settings) -> LiveFlags {
        LiveFlags {
            inner: Arc::new(Mutex::new(Flags {
                notifications: settings.enable_notifications,
                autostart: settings.autostart,
            })),
        }
    }

    pub fn get(&self) -> Flags {
        *self.lock()
    }

    pub fn notifications(&self) -> bool {
        self.lock().notifications
    }

    /// Applies `f` under the lock and returns the resulting flags.
    pub fn update<F: FnOnce(&mut Flags)>(&self, f: F) -> Flags {
        let mut flags = self.lock();
        f(&mut flags);
        *flags
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flags> {
        // Flags are plain bools, so a poisoned lock still holds valid data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
