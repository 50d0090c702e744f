// src/config.rs - Incident coordinator configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration for the incident services.
///
/// Every field has a stated default so a partial (or empty) YAML document is
/// a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    /// Time-to-live for alert notification requests sent to the alarm service
    #[serde(default = "default_alert_timeout")]
    pub alert_timeout_secs: u64,

    /// Time-to-live for pending monitoring-station cancel requests
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_secs: u64,

    /// Concurrency shards for the pending-cancel map (rounded up to a power of two)
    #[serde(default = "default_cancel_shards")]
    pub cancel_shards: usize,

    /// Interval between sweeps of expired pending cancels
    #[serde(default = "default_cancel_sweep")]
    pub cancel_sweep_secs: u64,

    /// Maximum incidents returned by a per-place listing
    #[serde(default = "default_max_listed")]
    pub max_incidents_listed: usize,

    /// Mock station: delay before PENDING escalates to DISPATCHING
    #[serde(default = "default_mock_alert_timeout")]
    pub mock_alert_timeout_secs: u64,

    /// Mock station: window after which an unanswered dispatch is failed
    #[serde(default = "default_mock_dispatch_timeout")]
    pub mock_dispatch_timeout_secs: u64,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            alert_timeout_secs: default_alert_timeout(),
            cancel_timeout_secs: default_cancel_timeout(),
            cancel_shards: default_cancel_shards(),
            cancel_sweep_secs: default_cancel_sweep(),
            max_incidents_listed: default_max_listed(),
            mock_alert_timeout_secs: default_mock_alert_timeout(),
            mock_dispatch_timeout_secs: default_mock_dispatch_timeout(),
        }
    }
}

impl IncidentConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    pub fn cancel_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cancel_sweep_secs)
    }

    pub fn mock_alert_timeout(&self) -> Duration {
        Duration::from_secs(self.mock_alert_timeout_secs)
    }

    pub fn mock_dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.mock_dispatch_timeout_secs)
    }
}

fn default_alert_timeout() -> u64 {
    300
}

fn default_cancel_timeout() -> u64 {
    300
}

fn default_cancel_shards() -> usize {
    16
}

fn default_cancel_sweep() -> u64 {
    60
}

fn default_max_listed() -> usize {
    30
}

fn default_mock_alert_timeout() -> u64 {
    30
}

fn default_mock_dispatch_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = IncidentConfig::from_yaml("{}").unwrap();
        assert_eq!(config.alert_timeout_secs, 300);
        assert_eq!(config.cancel_timeout_secs, 300);
        assert_eq!(config.cancel_shards, 16);
        assert_eq!(config.cancel_sweep_secs, 60);
        assert_eq!(config.max_incidents_listed, 30);
        assert_eq!(config.mock_alert_timeout_secs, 30);
        assert_eq!(config.mock_dispatch_timeout_secs, 300);
    }

    #[test]
    fn test_partial_override() {
        let config = IncidentConfig::from_yaml("cancel_timeout_secs: 45\ncancel_shards: 5\n").unwrap();
        assert_eq!(config.cancel_timeout_secs, 45);
        assert_eq!(config.cancel_shards, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.alert_timeout_secs, 300);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_incidents_listed: 5").unwrap();
        let config = IncidentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_incidents_listed, 5);
    }
}
