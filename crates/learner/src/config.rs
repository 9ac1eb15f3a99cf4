//! Learner configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default seconds between origin scans.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
/// Default seconds after submission at which the broadened search runs.
pub const DEFAULT_FALLBACK_AT_SECS: u64 = 50;
/// Default seconds after submission at which an operation fails.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Timing thresholds for the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub fallback_at: Duration,
    pub timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fallback_at: Duration::from_secs(DEFAULT_FALLBACK_AT_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.fallback_at >= self.timeout {
            return Err(ConfigError::FallbackAfterTimeout {
                fallback_at: self.fallback_at.as_secs(),
                timeout: self.timeout.as_secs(),
            });
        }
        Ok(())
    }
}

/// Learner configuration from environment variables.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Directory holding one storage file per controller.
    pub origin_dir: PathBuf,
    /// Device document.
    pub devices_file: PathBuf,
    /// Root of the per-platform profile directories.
    pub profiles_dir: PathBuf,
    pub timing: Timing,
    /// HTTP listen address.
    pub bind_addr: String,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            origin_dir: PathBuf::from("/config/.storage"),
            devices_file: PathBuf::from("/config/learner/devices.json"),
            profiles_dir: PathBuf::from("/config/learner/codes"),
            timing: Timing::default(),
            bind_addr: "0.0.0.0:8099".to_string(),
        }
    }
}

impl LearnerConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            origin_dir: env_path("LEARNER_ORIGIN_DIR").unwrap_or(defaults.origin_dir),
            devices_file: env_path("LEARNER_DEVICES_FILE").unwrap_or(defaults.devices_file),
            profiles_dir: env_path("LEARNER_PROFILES_DIR").unwrap_or(defaults.profiles_dir),
            timing: Timing {
                poll_interval: env_secs("LEARNER_POLL_INTERVAL_SECS")
                    .unwrap_or(defaults.timing.poll_interval),
                fallback_at: env_secs("LEARNER_FALLBACK_AT_SECS")
                    .unwrap_or(defaults.timing.fallback_at),
                timeout: env_secs("LEARNER_TIMEOUT_SECS").unwrap_or(defaults.timing.timeout),
            },
            bind_addr: std::env::var("LEARNER_BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = Timing::default();
        assert_eq!(timing.poll_interval, Duration::from_secs(3));
        assert_eq!(timing.fallback_at, Duration::from_secs(50));
        assert_eq!(timing.timeout, Duration::from_secs(60));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_late_fallback() {
        let timing = Timing {
            fallback_at: Duration::from_secs(60),
            ..Timing::default()
        };
        assert!(matches!(
            timing.validate(),
            Err(ConfigError::FallbackAfterTimeout {
                fallback_at: 60,
                timeout: 60
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let timing = Timing {
            poll_interval: Duration::ZERO,
            ..Timing::default()
        };
        assert!(matches!(
            timing.validate(),
            Err(ConfigError::ZeroPollInterval)
        ));
    }
}
