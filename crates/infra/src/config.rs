//! Host configuration for the projection subsystem.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `EVENTIDE_PROJECTION_WORKERS` | 3 |
//! | `EVENTIDE_CHECKPOINT_THRESHOLD` | 4000 |
//! | `EVENTIDE_PENDING_EVENTS_THRESHOLD` | 1000 |
//! | `EVENTIDE_CHECKPOINT_WRITE_ATTEMPTS` | 3 |

use core::fmt::Display;
use core::str::FromStr;

use thiserror::Error;

use eventide_projections::{ProjectionConfig, SourceDefinition};

pub const WORKERS_VAR: &str = "EVENTIDE_PROJECTION_WORKERS";
pub const CHECKPOINT_THRESHOLD_VAR: &str = "EVENTIDE_CHECKPOINT_THRESHOLD";
pub const PENDING_EVENTS_THRESHOLD_VAR: &str = "EVENTIDE_PENDING_EVENTS_THRESHOLD";
pub const CHECKPOINT_WRITE_ATTEMPTS_VAR: &str = "EVENTIDE_CHECKPOINT_WRITE_ATTEMPTS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker pool size plus defaults applied to every created projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionsConfig {
    pub workers: usize,
    pub checkpoint_handled_threshold: usize,
    pub pending_events_threshold: usize,
    pub max_checkpoint_write_attempts: u32,
}

impl Default for ProjectionsConfig {
    fn default() -> Self {
        let projection = ProjectionConfig::new("", SourceDefinition::all_streams());
        Self {
            workers: 3,
            checkpoint_handled_threshold: projection.checkpoint_handled_threshold,
            pending_events_threshold: projection.pending_events_threshold,
            max_checkpoint_write_attempts: projection.max_checkpoint_write_attempts,
        }
    }
}

impl ProjectionsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; absent keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            workers: parse(&lookup, WORKERS_VAR, defaults.workers)?,
            checkpoint_handled_threshold: parse(
                &lookup,
                CHECKPOINT_THRESHOLD_VAR,
                defaults.checkpoint_handled_threshold,
            )?,
            pending_events_threshold: parse(
                &lookup,
                PENDING_EVENTS_THRESHOLD_VAR,
                defaults.pending_events_threshold,
            )?,
            max_checkpoint_write_attempts: parse(
                &lookup,
                CHECKPOINT_WRITE_ATTEMPTS_VAR,
                defaults.max_checkpoint_write_attempts,
            )?,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_checkpoint_handled_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_handled_threshold = threshold;
        self
    }

    /// Configuration of one projection with these defaults applied.
    pub fn projection(&self, name: impl Into<String>, source: SourceDefinition) -> ProjectionConfig {
        ProjectionConfig::new(name, source)
            .with_checkpoint_handled_threshold(self.checkpoint_handled_threshold)
            .with_pending_events_threshold(self.pending_events_threshold)
            .with_max_checkpoint_write_attempts(self.max_checkpoint_write_attempts)
    }
}

/// Parse a positive number, or fall back to `default` when unset.
fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + From<u8>,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };

    let value = raw.trim().parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if value < T::from(1) {
        return Err(invalid("must be at least 1".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ProjectionsConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, ProjectionsConfig::default());
        assert_eq!(config.workers, 3);
        assert_eq!(config.checkpoint_handled_threshold, 4000);
        assert_eq!(config.pending_events_threshold, 1000);
        assert_eq!(config.max_checkpoint_write_attempts, 3);
    }

    #[test]
    fn reads_overrides() {
        let config = ProjectionsConfig::from_lookup(lookup(&[
            (WORKERS_VAR, "8"),
            (CHECKPOINT_THRESHOLD_VAR, " 250 "),
            (CHECKPOINT_WRITE_ATTEMPTS_VAR, "5"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.checkpoint_handled_threshold, 250);
        assert_eq!(config.pending_events_threshold, 1000);
        assert_eq!(config.max_checkpoint_write_attempts, 5);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = ProjectionsConfig::from_lookup(lookup(&[(WORKERS_VAR, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: WORKERS_VAR, .. }));

        let err = ProjectionsConfig::from_lookup(lookup(&[(CHECKPOINT_THRESHOLD_VAR, "0")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: CHECKPOINT_THRESHOLD_VAR,
                value: "0".into(),
                reason: "must be at least 1".into(),
            }
        );
    }

    #[test]
    fn projection_config_inherits_defaults() {
        let config = ProjectionsConfig::default().with_checkpoint_handled_threshold(2);

        let projection = config.projection("orders", SourceDefinition::stream("orders"));

        assert_eq!(projection.checkpoint_handled_threshold, 2);
        assert_eq!(projection.max_checkpoint_write_attempts, 3);
        assert!(projection.validate().is_ok());
    }
}
