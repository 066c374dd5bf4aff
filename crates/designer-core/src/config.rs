//! Designer configuration from environment variables.

use std::env;
use std::time::Duration;

use designer_bus::is_valid_subject;
use designer_types::{LevelFilter, LogLevel, DEFAULT_INBOX_PREFIX, LOG_STREAM_SUBJECT, VALIDATE_SUBJECT};

use crate::error::ConfigError;

/// Default bus endpoint
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

/// Default reply window for validation requests
pub const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default log buffer capacity
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Configuration for a designer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignerConfig {
    /// Bus endpoint
    pub nats_url: String,

    /// Namespace for reply inboxes
    pub inbox_prefix: String,

    /// Reply window for validation requests
    pub validate_timeout: Duration,

    /// Log entries retained
    pub log_capacity: usize,

    /// Initial display filter
    pub log_filter: LevelFilter,

    /// Subject carrying the orchestrator's log stream
    pub log_subject: String,

    /// Subject the orchestrator validates DAGs on
    pub validate_subject: String,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            inbox_prefix: DEFAULT_INBOX_PREFIX.to_string(),
            validate_timeout: DEFAULT_VALIDATE_TIMEOUT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_filter: LevelFilter::Only(LogLevel::Info),
            log_subject: LOG_STREAM_SUBJECT.to_string(),
            validate_subject: VALIDATE_SUBJECT.to_string(),
        }
    }
}

impl DesignerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DESIGNER_NATS_URL`: Bus endpoint (default: nats://127.0.0.1:4222)
    /// - `DESIGNER_INBOX_PREFIX`: Reply inbox namespace (default: designer.inbox)
    /// - `DESIGNER_VALIDATE_TIMEOUT_MS`: Validation reply window (default: 5000)
    /// - `DESIGNER_LOG_CAPACITY`: Log entries retained (default: 200)
    /// - `DESIGNER_LOG_FILTER`: ALL, DEBUG, INFO, WARN or ERROR (default: INFO)
    /// - `DESIGNER_LOG_SUBJECT`: Log stream subject (default: workflow.logs.stream)
    /// - `DESIGNER_VALIDATE_SUBJECT`: Validation subject (default: workflow.designer.validate)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let validate_timeout = match lookup("DESIGNER_VALIDATE_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(v.trim().parse::<u64>().map_err(|e| {
                ConfigError::invalid("DESIGNER_VALIDATE_TIMEOUT_MS", e.to_string())
            })?),
            None => defaults.validate_timeout,
        };

        let log_capacity = match lookup("DESIGNER_LOG_CAPACITY") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::invalid("DESIGNER_LOG_CAPACITY", e.to_string()))?,
            None => defaults.log_capacity,
        };

        let log_filter = match lookup("DESIGNER_LOG_FILTER") {
            Some(v) => v
                .parse::<LevelFilter>()
                .map_err(|e| ConfigError::invalid("DESIGNER_LOG_FILTER", e.to_string()))?,
            None => defaults.log_filter,
        };

        let config = Self {
            nats_url: lookup("DESIGNER_NATS_URL").unwrap_or(defaults.nats_url),
            inbox_prefix: lookup("DESIGNER_INBOX_PREFIX").unwrap_or(defaults.inbox_prefix),
            validate_timeout,
            log_capacity,
            log_filter,
            log_subject: lookup("DESIGNER_LOG_SUBJECT").unwrap_or(defaults.log_subject),
            validate_subject: lookup("DESIGNER_VALIDATE_SUBJECT")
                .unwrap_or(defaults.validate_subject),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make a session unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nats_url.trim().is_empty() {
            return Err(ConfigError::invalid("DESIGNER_NATS_URL", "must not be empty"));
        }
        if self.validate_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "DESIGNER_VALIDATE_TIMEOUT_MS",
                "must be greater than zero",
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::invalid(
                "DESIGNER_LOG_CAPACITY",
                "must be greater than zero",
            ));
        }
        // Inboxes extend the prefix, so it must itself be a concrete subject.
        if !is_valid_subject(&self.inbox_prefix) {
            return Err(ConfigError::invalid(
                "DESIGNER_INBOX_PREFIX",
                format!("{:?} is not a valid subject", self.inbox_prefix),
            ));
        }
        if !is_valid_subject(&self.log_subject) {
            return Err(ConfigError::invalid(
                "DESIGNER_LOG_SUBJECT",
                format!("{:?} is not a valid subject", self.log_subject),
            ));
        }
        if !is_valid_subject(&self.validate_subject) {
            return Err(ConfigError::invalid(
                "DESIGNER_VALIDATE_SUBJECT",
                format!("{:?} is not a valid subject", self.validate_subject),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DesignerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DesignerConfig::default());
        assert_eq!(config.log_capacity, 200);
        assert_eq!(config.log_filter, LevelFilter::Only(LogLevel::Info));
        assert_eq!(config.validate_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_overrides() {
        let config = DesignerConfig::from_lookup(lookup(&[
            ("DESIGNER_NATS_URL", "nats://bus:4222"),
            ("DESIGNER_VALIDATE_TIMEOUT_MS", "250"),
            ("DESIGNER_LOG_CAPACITY", "50"),
            ("DESIGNER_LOG_FILTER", "all"),
            ("DESIGNER_LOG_SUBJECT", "team.logs"),
        ]))
        .unwrap();

        assert_eq!(config.nats_url, "nats://bus:4222");
        assert_eq!(config.validate_timeout, Duration::from_millis(250));
        assert_eq!(config.log_capacity, 50);
        assert_eq!(config.log_filter, LevelFilter::All);
        assert_eq!(config.log_subject, "team.logs");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = DesignerConfig::from_lookup(lookup(&[("DESIGNER_LOG_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DESIGNER_LOG_CAPACITY", .. }));

        let err =
            DesignerConfig::from_lookup(lookup(&[("DESIGNER_VALIDATE_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DESIGNER_VALIDATE_TIMEOUT_MS", .. }));

        let err = DesignerConfig::from_lookup(lookup(&[("DESIGNER_LOG_FILTER", "LOUD")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DESIGNER_LOG_FILTER", .. }));

        let err =
            DesignerConfig::from_lookup(lookup(&[("DESIGNER_VALIDATE_SUBJECT", "")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DESIGNER_VALIDATE_SUBJECT", .. }));

        let err =
            DesignerConfig::from_lookup(lookup(&[("DESIGNER_INBOX_PREFIX", "inbox.>")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DESIGNER_INBOX_PREFIX", .. }));
    }
}
