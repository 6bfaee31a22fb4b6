//! promvault.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default debounce window between the last mutation and a snapshot flush.
pub const DEFAULT_QUIESCENCE_WINDOW: Duration = Duration::from_millis(7500);

/// Default upper bound on a single snapshot write or load.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default quiet period after which an unused registry is flushed and stopped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_PORT: u16 = 9464;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration `{0}`")]
    Duration(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromvaultConfig {
    pub server: Option<ServerConfig>,
    pub storage: Option<StorageConfig>,
    pub persistence: Option<PersistenceConfig>,
    pub histograms: Option<HistogramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// e.g. "7500ms", "10s".
    pub quiescence_window: Option<String>,
    pub write_timeout: Option<String>,
    /// "0s" keeps registries resident.
    pub idle_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub max_samples_per_series: Option<usize>,
}

impl PromvaultConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PromvaultConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.storage.as_ref().and_then(|s| s.data_dir.as_deref())
    }

    pub fn quiescence_window(&self) -> Result<Duration, ConfigError> {
        match self.persistence.as_ref().and_then(|p| p.quiescence_window.as_deref()) {
            Some(s) => parse_duration(s),
            None => Ok(DEFAULT_QUIESCENCE_WINDOW),
        }
    }

    pub fn write_timeout(&self) -> Result<Duration, ConfigError> {
        match self.persistence.as_ref().and_then(|p| p.write_timeout.as_deref()) {
            Some(s) => parse_duration(s),
            None => Ok(DEFAULT_WRITE_TIMEOUT),
        }
    }

    /// `None` when idle deactivation is switched off.
    pub fn idle_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        let idle = match self.persistence.as_ref().and_then(|p| p.idle_timeout.as_deref()) {
            Some(s) => parse_duration(s)?,
            None => DEFAULT_IDLE_TIMEOUT,
        };
        Ok((!idle.is_zero()).then_some(idle))
    }

    pub fn max_samples_per_series(&self) -> Option<usize> {
        self.histograms.as_ref().and_then(|h| h.max_samples_per_series)
    }
}

/// Parse `"250ms"`, `"7.5s"`, `"2m"`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());
    let secs = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<f64>().map_err(|_| invalid())? / 1000.0
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<f64>().map_err(|_| invalid())?
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<f64>().map_err(|_| invalid())? * 60.0
    } else {
        s.parse::<f64>().map_err(|_| invalid())?
    };
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: PromvaultConfig = toml::from_str("").unwrap();
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.quiescence_window().unwrap(), DEFAULT_QUIESCENCE_WINDOW);
        assert_eq!(config.write_timeout().unwrap(), DEFAULT_WRITE_TIMEOUT);
        assert!(config.data_dir().is_none());
        assert!(config.max_samples_per_series().is_none());
        assert_eq!(config.idle_timeout().unwrap(), Some(DEFAULT_IDLE_TIMEOUT));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[server]
port = 8080

[storage]
data_dir = "/tmp/promvault"

[persistence]
quiescence_window = "2s"
write_timeout = "500ms"
idle_timeout = "10m"

[histograms]
max_samples_per_series = 1000
"#;
        let config: PromvaultConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.data_dir(), Some(Path::new("/tmp/promvault")));
        assert_eq!(config.quiescence_window().unwrap(), Duration::from_secs(2));
        assert_eq!(config.write_timeout().unwrap(), Duration::from_millis(500));
        assert_eq!(config.max_samples_per_series(), Some(1000));
        assert_eq!(config.idle_timeout().unwrap(), Some(Duration::from_secs(600)));

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_samples_per_series = 1000"));
    }

    #[test]
    fn zero_idle_timeout_disables_deactivation() {
        let config: PromvaultConfig =
            toml::from_str("[persistence]\nidle_timeout = \"0s\"\n").unwrap();
        assert_eq!(config.idle_timeout().unwrap(), None);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("7500ms").unwrap(), Duration::from_millis(7500));
        assert_eq!(parse_duration("7.5s").unwrap(), Duration::from_millis(7500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
