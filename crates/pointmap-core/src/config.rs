//! Mapper configuration.
//!
//! A [`MapperConfig`] is built once by the process (TOML file, then
//! environment overrides, then defaults) and handed to the engine by value.
//! Core logic never reads the environment itself.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MapperError, Result};

/// Default values for every recognized option.
pub mod defaults {
    /// Points per oracle sub-batch
    pub const MAX_POINTS_PER_BATCH: usize = 1000;
    /// Wall-clock ceiling for a whole batch
    pub const BATCH_TIMEOUT_SECS: u64 = 300;
    /// Minimum confidence for a candidate to become a mapping record
    pub const ACCEPTANCE_CONFIDENCE_THRESHOLD: f32 = 0.7;
    /// Concurrent oracle sub-calls
    pub const ORACLE_CONCURRENCY: usize = 4;
    /// Bounded wait for one oracle call
    pub const ORACLE_TIMEOUT_SECS: u64 = 60;
    /// Retries after the first failed oracle call of a sub-batch
    pub const ORACLE_MAX_RETRIES: u32 = 1;
    /// Pause before an oracle retry
    pub const ORACLE_RETRY_BACKOFF_MS: u64 = 500;
    /// Candidates requested per point
    pub const MAX_CANDIDATES_PER_POINT: usize = 1;
    /// Longest accepted cleaned point name
    pub const MAX_POINT_NAME_LENGTH: usize = 128;
}

/// Environment variable overrides.
pub mod env_vars {
    pub const MAX_POINTS_PER_BATCH: &str = "POINTMAP_MAX_POINTS_PER_BATCH";
    pub const BATCH_TIMEOUT_SECS: &str = "POINTMAP_BATCH_TIMEOUT_SECS";
    pub const ACCEPTANCE_THRESHOLD: &str = "POINTMAP_ACCEPTANCE_THRESHOLD";
    pub const ORACLE_CONCURRENCY: &str = "POINTMAP_ORACLE_CONCURRENCY";
    pub const ORACLE_TIMEOUT_SECS: &str = "POINTMAP_ORACLE_TIMEOUT_SECS";
    pub const ORACLE_MAX_RETRIES: &str = "POINTMAP_ORACLE_MAX_RETRIES";
}

/// Options consumed by the mapping engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapperConfig {
    pub max_points_per_batch: usize,
    pub batch_timeout_seconds: u64,
    pub acceptance_confidence_threshold: f32,
    pub oracle_concurrency: usize,
    pub oracle_timeout_seconds: u64,
    pub oracle_max_retries: u32,
    pub oracle_retry_backoff_ms: u64,
    pub max_candidates_per_point: usize,
    pub max_point_name_length: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            max_points_per_batch: defaults::MAX_POINTS_PER_BATCH,
            batch_timeout_seconds: defaults::BATCH_TIMEOUT_SECS,
            acceptance_confidence_threshold: defaults::ACCEPTANCE_CONFIDENCE_THRESHOLD,
            oracle_concurrency: defaults::ORACLE_CONCURRENCY,
            oracle_timeout_seconds: defaults::ORACLE_TIMEOUT_SECS,
            oracle_max_retries: defaults::ORACLE_MAX_RETRIES,
            oracle_retry_backoff_ms: defaults::ORACLE_RETRY_BACKOFF_MS,
            max_candidates_per_point: defaults::MAX_CANDIDATES_PER_POINT,
            max_point_name_length: defaults::MAX_POINT_NAME_LENGTH,
        }
    }
}

/// Layout of a TOML config file: options live under `[mapper]`.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    mapper: Option<MapperConfig>,
}

impl MapperConfig {
    /// Parse the `[mapper]` table of a TOML document.
    ///
    /// Missing keys (or a missing table) fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: TomlConfig = toml::from_str(content)?;
        Ok(parsed.mapper.unwrap_or_default())
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MapperError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            category = "config",
            path = %path.display(),
            "Loaded mapper config"
        );
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Unparseable values are ignored with a warning so a typo in the
    /// environment never silently zeroes an option.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(category = "config", key, value = %raw, "Ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, env_vars::MAX_POINTS_PER_BATCH) {
            self.max_points_per_batch = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::BATCH_TIMEOUT_SECS) {
            self.batch_timeout_seconds = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::ACCEPTANCE_THRESHOLD) {
            self.acceptance_confidence_threshold = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::ORACLE_CONCURRENCY) {
            self.oracle_concurrency = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::ORACLE_TIMEOUT_SECS) {
            self.oracle_timeout_seconds = v;
        }
        if let Some(v) = parsed(&lookup, env_vars::ORACLE_MAX_RETRIES) {
            self.oracle_max_retries = v;
        }
        self
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.acceptance_confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MapperError::Config(format!(
                "acceptanceConfidenceThreshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.max_points_per_batch == 0 {
            return Err(MapperError::Config(
                "maxPointsPerBatch must be greater than 0".into(),
            ));
        }
        if self.batch_timeout_seconds == 0 {
            return Err(MapperError::Config(
                "batchTimeoutSeconds must be greater than 0".into(),
            ));
        }
        if self.oracle_concurrency == 0 {
            return Err(MapperError::Config(
                "oracleConcurrency must be greater than 0".into(),
            ));
        }
        if self.oracle_timeout_seconds == 0 {
            return Err(MapperError::Config(
                "oracleTimeoutSeconds must be greater than 0".into(),
            ));
        }
        if self.max_candidates_per_point == 0 {
            return Err(MapperError::Config(
                "maxCandidatesPerPoint must be greater than 0".into(),
            ));
        }
        if self.max_point_name_length == 0 {
            return Err(MapperError::Config(
                "maxPointNameLength must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn with_max_points_per_batch(mut self, max: usize) -> Self {
        self.max_points_per_batch = max;
        self
    }

    pub fn with_acceptance_threshold(mut self, threshold: f32) -> Self {
        self.acceptance_confidence_threshold = threshold;
        self
    }

    pub fn with_oracle_concurrency(mut self, concurrency: usize) -> Self {
        self.oracle_concurrency = concurrency;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout_seconds = timeout.as_secs().max(1);
        self
    }

    pub fn with_oracle_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.oracle_max_retries = retries;
        self.oracle_retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_seconds = timeout.as_secs().max(1);
        self
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_seconds)
    }

    pub fn oracle_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.oracle_retry_backoff_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MapperConfig::default();
        assert_eq!(config.max_points_per_batch, 1000);
        assert_eq!(config.batch_timeout_seconds, 300);
        assert_eq!(config.acceptance_confidence_threshold, 0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_table() {
        let config = MapperConfig::from_toml_str(
            r#"
            [mapper]
            maxPointsPerBatch = 250
            acceptanceConfidenceThreshold = 0.85
            "#,
        )
        .unwrap();
        assert_eq!(config.max_points_per_batch, 250);
        assert_eq!(config.acceptance_confidence_threshold, 0.85);
        assert_eq!(config.oracle_concurrency, defaults::ORACLE_CONCURRENCY);
    }

    #[test]
    fn test_toml_without_mapper_table() {
        let config = MapperConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, MapperConfig::default());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (env_vars::MAX_POINTS_PER_BATCH, "10"),
            (env_vars::ACCEPTANCE_THRESHOLD, "0.9"),
            (env_vars::ORACLE_CONCURRENCY, "not-a-number"),
        ]);
        let config =
            MapperConfig::default().apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_points_per_batch, 10);
        assert_eq!(config.acceptance_confidence_threshold, 0.9);
        assert_eq!(config.oracle_concurrency, defaults::ORACLE_CONCURRENCY);
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        for threshold in [-0.1, 1.5, f32::NAN] {
            let config = MapperConfig::default().with_acceptance_threshold(threshold);
            assert!(matches!(config.validate(), Err(MapperError::Config(_))));
        }
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(MapperConfig::default()
            .with_max_points_per_batch(0)
            .validate()
            .is_err());
        assert!(MapperConfig::default()
            .with_oracle_concurrency(0)
            .validate()
            .is_err());
    }
}
