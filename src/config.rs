//! # Configuration
//!
//! ## Responsibility
//! Parse and validate the engine's TOML configuration: local execution
//! knobs (enabled flag, pool width, result accumulation window) and the
//! tuning profile shared by both channels' bundlers.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same config
//! - Validated: semantic constraints are checked before a config is used
//! - Type-safe: invalid field combinations are caught at parse time via serde
//! - Every field has either a required value or a documented default
//!
//! ## NOT Responsible For
//! - Building the dispatcher from config (see: dispatcher.rs)
//! - Tuning-state updates at runtime (see: bundler/)

use crate::bundler::TuneProfile;
use crate::GridError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

/// Default local pool width: one worker per available processor.
fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Default accumulation time unit: nanoseconds.
fn default_time_unit() -> TimeUnit {
    TimeUnit::Nanoseconds
}

// ── Time units ───────────────────────────────────────────────────────────

/// Unit applied to `accumulation_time`, using the single-character codes
/// recognised in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds (`n`).
    #[serde(rename = "n")]
    Nanoseconds,
    /// Milliseconds (`m`).
    #[serde(rename = "m")]
    Milliseconds,
    /// Seconds (`s`).
    #[serde(rename = "s")]
    Seconds,
    /// Minutes (`M`).
    #[serde(rename = "M")]
    Minutes,
    /// Hours (`h`).
    #[serde(rename = "h")]
    Hours,
    /// Days (`d`).
    #[serde(rename = "d")]
    Days,
}

impl TimeUnit {
    /// Convert `value` expressed in this unit to a [`Duration`].
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(value),
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(3600)),
            TimeUnit::Days => Duration::from_secs(value.saturating_mul(86_400)),
        }
    }
}

// ── Local execution ──────────────────────────────────────────────────────

/// Settings for the in-process execution channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LocalExecutionConfig {
    /// Whether local execution is enabled. When false, whole jobs go to
    /// the remote channel.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Width of the shared worker pool. Defaults to available processors.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Maximum results accumulated per batch before a flush to the
    /// listener. `None` means unbounded.
    pub accumulation_size: Option<usize>,
    /// Length of the accumulation window, in `accumulation_time_unit`
    /// units. `None` means unbounded.
    pub accumulation_time: Option<u64>,
    /// Unit applied to `accumulation_time`.
    #[serde(default = "default_time_unit")]
    pub accumulation_time_unit: TimeUnit,
}

impl Default for LocalExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: default_threads(),
            accumulation_size: None,
            accumulation_time: None,
            accumulation_time_unit: TimeUnit::Nanoseconds,
        }
    }
}

impl LocalExecutionConfig {
    /// The accumulation window as a [`Duration`].
    ///
    /// An unset window behaves as unbounded (effectively infinite).
    pub fn accumulation_window(&self) -> Duration {
        match self.accumulation_time {
            Some(value) => self.accumulation_time_unit.to_duration(value),
            None => Duration::MAX,
        }
    }

    /// The accumulation size cap, unbounded when unset.
    pub fn accumulation_cap(&self) -> usize {
        self.accumulation_size.unwrap_or(usize::MAX)
    }
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for one dispatcher instance.
///
/// # Example
///
/// ```toml
/// [local]
/// enabled = true
/// threads = 8
/// accumulation_size = 100
/// accumulation_time = 50
/// accumulation_time_unit = "m"
///
/// [tuning]
/// performance_cache_size = 2000
/// proportionality_factor = 4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BalancerConfig {
    /// In-process execution channel settings.
    #[serde(default)]
    pub local: LocalExecutionConfig,
    /// Tuning profile applied to both channels' bundlers.
    #[serde(default)]
    pub tuning: TuneProfile,
}

impl BalancerConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// [`GridError::Config`] on malformed TOML or failed validation.
    pub fn from_toml(content: &str) -> Result<Self, GridError> {
        let config: BalancerConfig =
            toml::from_str(content).map_err(|e| GridError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file.
    ///
    /// # Errors
    ///
    /// [`GridError::Config`] when the file cannot be read, parsed, or
    /// validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GridError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml(&content)
    }

    /// Check semantic constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// [`GridError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.local.threads == 0 {
            return Err(GridError::Config(
                "local.threads must be >= 1".to_string(),
            ));
        }
        if self.local.accumulation_size == Some(0) {
            return Err(GridError::Config(
                "local.accumulation_size must be >= 1 when set".to_string(),
            ));
        }
        if self.tuning.performance_cache_size == 0 {
            return Err(GridError::Config(
                "tuning.performance_cache_size must be >= 1".to_string(),
            ));
        }
        if self.tuning.proportionality_factor == 0 {
            return Err(GridError::Config(
                "tuning.proportionality_factor must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = BalancerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.local.enabled);
        assert!(config.local.threads >= 1);
        assert_eq!(config.tuning.performance_cache_size, 2000);
        assert_eq!(config.tuning.proportionality_factor, 4);
    }

    #[test]
    fn test_unset_accumulation_is_unbounded() {
        let config = LocalExecutionConfig::default();
        assert_eq!(config.accumulation_window(), Duration::MAX);
        assert_eq!(config.accumulation_cap(), usize::MAX);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [local]
            enabled = false
            threads = 4
            accumulation_size = 100
            accumulation_time = 50
            accumulation_time_unit = "m"

            [tuning]
            performance_cache_size = 500
            proportionality_factor = 2
        "#;
        let config = BalancerConfig::from_toml(toml);
        assert!(config.is_ok());
        let config = config.unwrap_or_default();
        assert!(!config.local.enabled);
        assert_eq!(config.local.threads, 4);
        assert_eq!(config.local.accumulation_cap(), 100);
        assert_eq!(
            config.local.accumulation_window(),
            Duration::from_millis(50)
        );
        assert_eq!(config.tuning.performance_cache_size, 500);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = BalancerConfig::from_toml("");
        assert!(config.is_ok());
        assert_eq!(config.unwrap_or_default(), BalancerConfig::default());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = BalancerConfig::from_toml("[local]\nthreads = 0");
        assert!(matches!(result, Err(GridError::Config(msg)) if msg.contains("local.threads")));
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let result = BalancerConfig::from_toml("[tuning]\nperformance_cache_size = 0");
        assert!(
            matches!(result, Err(GridError::Config(msg)) if msg.contains("performance_cache_size"))
        );
    }

    #[test]
    fn test_zero_factor_rejected() {
        let result = BalancerConfig::from_toml("[tuning]\nproportionality_factor = 0");
        assert!(
            matches!(result, Err(GridError::Config(msg)) if msg.contains("proportionality_factor"))
        );
    }

    #[test]
    fn test_zero_accumulation_size_rejected() {
        let result = BalancerConfig::from_toml("[local]\naccumulation_size = 0");
        assert!(
            matches!(result, Err(GridError::Config(msg)) if msg.contains("accumulation_size"))
        );
    }

    #[test]
    fn test_malformed_toml_reports_config_error() {
        let result = BalancerConfig::from_toml("local = not-a-table");
        assert!(matches!(result, Err(GridError::Config(_))));
    }

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Nanoseconds.to_duration(100), Duration::from_nanos(100));
        assert_eq!(TimeUnit::Milliseconds.to_duration(5), Duration::from_millis(5));
        assert_eq!(TimeUnit::Seconds.to_duration(3), Duration::from_secs(3));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Hours.to_duration(1), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Days.to_duration(1), Duration::from_secs(86_400));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => {
                assert!(false, "tempfile failed: {e}");
                return;
            }
        };
        let write_result = writeln!(file, "[local]\nthreads = 2");
        assert!(write_result.is_ok());

        let config = BalancerConfig::from_path(file.path());
        assert!(config.is_ok());
        assert_eq!(config.unwrap_or_default().local.threads, 2);
    }

    #[test]
    fn test_from_path_missing_file_reports_path() {
        let result = BalancerConfig::from_path("/nonexistent/taskgrid.toml");
        assert!(matches!(result, Err(GridError::Config(msg)) if msg.contains("taskgrid.toml")));
    }
}
