//! Configuration for the firehose.
//!
//! Everything is read from environment variables. Parsing goes through a
//! lookup function so tests can supply variables without touching the
//! process environment.

use thiserror::Error;

use crate::sink::DEFAULT_QUEUE_CAPACITY;

/// Configuration errors. Any of these prevents the process from starting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {var} (example: {example})")]
    Missing {
        var: &'static str,
        example: &'static str,
    },

    #[error("invalid {var} '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("unknown sink type '{0}' (supported: http, stdout)")]
    UnknownSink(String),
}

/// Firehose configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Orchestrator connection settings.
    pub nomad: NomadConfig,

    /// Delivery sink settings.
    pub sink: SinkConfig,

    /// Path of the SQLite database holding restore points.
    pub state_path: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Orchestrator API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NomadConfig {
    /// Base URL of the Nomad HTTP API.
    pub address: String,

    /// ACL token sent with every request.
    pub token: Option<String>,

    /// Region to query; the agent's own region when unset.
    pub region: Option<String>,
}

/// Delivery sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub kind: SinkKind,

    /// Number of delivery workers draining the queue.
    pub worker_count: usize,

    /// Maximum number of payloads waiting for delivery.
    pub queue_capacity: usize,
}

/// Delivery transport selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// POST every payload to `address`.
    Http { address: String },

    /// Write every payload as a line on stdout.
    Stdout,
}

impl SinkKind {
    pub fn name(&self) -> &'static str {
        match self {
            SinkKind::Http { .. } => "http",
            SinkKind::Stdout => "stdout",
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nomad = NomadConfig {
            address: non_empty(lookup("NOMAD_ADDR"))
                .unwrap_or_else(|| "http://127.0.0.1:4646".to_string()),
            token: non_empty(lookup("NOMAD_TOKEN")),
            region: non_empty(lookup("NOMAD_REGION")),
        };

        let sink = SinkConfig::from_lookup(&lookup)?;

        let state_path = non_empty(lookup("FIREHOSE_STATE_PATH"))
            .unwrap_or_else(|| "/var/lib/firehose/state.db".to_string());

        let log_level =
            non_empty(lookup("FIREHOSE_LOG_LEVEL")).unwrap_or_else(|| "info".to_string());

        Ok(Self {
            nomad,
            sink,
            state_path,
            log_level,
        })
    }
}

impl SinkConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match non_empty(lookup("SINK_TYPE")).as_deref() {
            None => {
                return Err(ConfigError::Missing {
                    var: "SINK_TYPE",
                    example: "http",
                })
            }
            Some("http") => {
                let address =
                    non_empty(lookup("SINK_HTTP_ADDRESS")).ok_or(ConfigError::Missing {
                        var: "SINK_HTTP_ADDRESS",
                        example: "http://miau.com:8080/biau",
                    })?;
                SinkKind::Http { address }
            }
            Some("stdout") => SinkKind::Stdout,
            Some(other) => return Err(ConfigError::UnknownSink(other.to_string())),
        };

        let worker_count = positive(lookup("SINK_WORKER_COUNT"), "SINK_WORKER_COUNT", 1)?;
        let queue_capacity = positive(
            lookup("SINK_QUEUE_CAPACITY"),
            "SINK_QUEUE_CAPACITY",
            DEFAULT_QUEUE_CAPACITY,
        )?;

        Ok(Self {
            kind,
            worker_count,
            queue_capacity,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn positive(value: Option<String>, var: &'static str, default: usize) -> Result<usize, ConfigError> {
    let Some(value) = non_empty(value) else {
        return Ok(default);
    };

    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be greater than zero",
        }),
        Ok(n) => Ok(n),
        Err(_) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be an integer",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("SINK_TYPE", "stdout")])).unwrap();

        assert_eq!(config.nomad.address, "http://127.0.0.1:4646");
        assert!(config.nomad.token.is_none());
        assert_eq!(config.sink.kind, SinkKind::Stdout);
        assert_eq!(config.sink.worker_count, 1);
        assert_eq!(config.sink.queue_capacity, 10_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_http_sink() {
        let config = Config::from_lookup(lookup(&[
            ("SINK_TYPE", "http"),
            ("SINK_HTTP_ADDRESS", "http://collector:8080/events"),
            ("SINK_WORKER_COUNT", "4"),
            ("NOMAD_ADDR", "https://nomad.service.consul:4646"),
            ("NOMAD_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(
            config.sink.kind,
            SinkKind::Http {
                address: "http://collector:8080/events".to_string()
            }
        );
        assert_eq!(config.sink.worker_count, 4);
        assert_eq!(config.nomad.address, "https://nomad.service.consul:4646");
        assert_eq!(config.nomad.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_http_sink_requires_address() {
        let err = Config::from_lookup(lookup(&[("SINK_TYPE", "http")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                var: "SINK_HTTP_ADDRESS",
                ..
            }
        ));
    }

    #[test]
    fn test_sink_type_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "SINK_TYPE", .. }));
    }

    #[test]
    fn test_unknown_sink_type() {
        let err = Config::from_lookup(lookup(&[("SINK_TYPE", "kinesis")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownSink("kinesis".to_string()));
    }

    #[rstest]
    #[case("0", "must be greater than zero")]
    #[case("-1", "must be an integer")]
    #[case("many", "must be an integer")]
    fn test_invalid_worker_count(#[case] value: &str, #[case] expected: &str) {
        let err = Config::from_lookup(lookup(&[
            ("SINK_TYPE", "stdout"),
            ("SINK_WORKER_COUNT", value),
        ]))
        .unwrap_err();

        match err {
            ConfigError::Invalid { var, reason, .. } => {
                assert_eq!(var, "SINK_WORKER_COUNT");
                assert_eq!(reason, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case("", 1)]
    #[case("1", 1)]
    #[case(" 8 ", 8)]
    fn test_worker_count_values(#[case] value: &str, #[case] expected: usize) {
        let config = Config::from_lookup(lookup(&[
            ("SINK_TYPE", "stdout"),
            ("SINK_WORKER_COUNT", value),
        ]))
        .unwrap();
        assert_eq!(config.sink.worker_count, expected);
    }
}
