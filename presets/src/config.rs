//! Controller configuration, read from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::clock::LocalCalendar;
use crate::resolver::{Resolver, DEFAULT_MAX_DEPTH};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown timezone {0:?}")]
    Timezone(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub database_path: PathBuf,
    /// IANA name used for every local day and weekday computation.
    pub timezone: String,
    pub tick_interval_secs: u64,
    /// A tick still running after this long is rolled back.
    pub tick_deadline_secs: u64,
    pub max_preset_depth: usize,
    pub busy_timeout_ms: u64,
    /// UDP address the probe reports arrive on.
    pub sensor_bind: String,
    /// Probe readings older than this are unknown.
    pub sensor_stale_secs: u64,
    pub core_relay: String,
    pub oven_relay: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            database_path: PathBuf::from("temperatures_and_presets.db"),
            timezone: "Europe/London".to_owned(),
            tick_interval_secs: 60,
            tick_deadline_secs: 20,
            max_preset_depth: DEFAULT_MAX_DEPTH,
            busy_timeout_ms: 5_000,
            sensor_bind: "0.0.0.0:4000".to_owned(),
            sensor_stale_secs: 180,
            core_relay: "smoker-relay-core.local".to_owned(),
            oven_relay: "smoker-relay-oven.local".to_owned(),
        }
    }
}

impl ControllerConfig {
    /// Reads and validates `path`.
    pub fn load(path: &Path) -> Result<ControllerConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        ControllerConfig::from_toml_str(&text)
    }

    /// Defaults when `path` is `None`.
    pub fn load_or_default(path: Option<&Path>) -> Result<ControllerConfig, ConfigError> {
        match path {
            Some(path) => ControllerConfig::load(path),
            None => {
                let config = ControllerConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<ControllerConfig, ConfigError> {
        let config: ControllerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be positive".to_owned()));
        }
        if self.tick_deadline_secs == 0 || self.tick_deadline_secs >= self.tick_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "tick_deadline_secs ({}) must be positive and shorter than tick_interval_secs ({})",
                self.tick_deadline_secs, self.tick_interval_secs
            )));
        }
        if self.max_preset_depth == 0 {
            return Err(ConfigError::Invalid("max_preset_depth must be positive".to_owned()));
        }
        if self.sensor_stale_secs == 0 {
            return Err(ConfigError::Invalid("sensor_stale_secs must be positive".to_owned()));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    pub fn calendar(&self) -> Result<LocalCalendar, ConfigError> {
        Ok(LocalCalendar::new(self.timezone()?))
    }

    pub fn resolver(&self) -> Result<Resolver, ConfigError> {
        Ok(Resolver::new(self.calendar()?, self.max_preset_depth))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn tick_deadline(&self) -> Duration {
        Duration::from_secs(self.tick_deadline_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn sensor_stale(&self) -> Duration {
        Duration::from_secs(self.sensor_stale_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::London);
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.tick_deadline(), Duration::from_secs(20));
    }

    #[test]
    fn overrides() {
        let config = ControllerConfig::from_toml_str(
            r#"
            database_path = "/var/lib/smoker/smoker.db"
            timezone = "America/New_York"
            tick_interval_secs = 30
            tick_deadline_secs = 10
            core_relay = "10.0.0.5:4210"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/smoker/smoker.db"));
        assert_eq!(config.timezone().unwrap(), chrono_tz::America::New_York);
        assert_eq!(config.core_relay, "10.0.0.5:4210");
        assert_eq!(config.sensor_stale_secs, 180);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ControllerConfig::from_toml_str("timezone = \"Mars/Olympus\""),
            Err(ConfigError::Timezone(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("tick_interval_secs = 20\ntick_deadline_secs = 20"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("tick_interval_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ControllerConfig::from_toml_str("tick_interval = 20"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = ControllerConfig::load(Path::new("/nonexistent/smoker.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/smoker.toml"));
    }
}
