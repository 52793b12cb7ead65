//! Configuration validation.
//!
//! Serde handles syntax; this module checks values that deserialize fine but
//! cannot run (zero windows, unparseable addresses). Every problem is
//! reported, not just the first one.

use std::net::SocketAddr;

use crate::config::schema::TrackerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &TrackerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: &str| {
        if !ok {
            errors.push(ValidationError {
                field,
                message: message.to_string(),
            });
        }
    };

    check(
        config.listener.bind_address.parse::<SocketAddr>().is_ok(),
        "listener.bind_address",
        "must be an IP:port socket address",
    );
    check(
        config.listener.max_connections > 0,
        "listener.max_connections",
        "must be greater than zero",
    );
    check(config.listener.backlog > 0, "listener.backlog", "must be greater than zero");

    check(
        config.rate_limit.threshold > 0,
        "rate_limit.threshold",
        "must be greater than zero",
    );
    check(
        config.rate_limit.window_secs > 0,
        "rate_limit.window_secs",
        "must be greater than zero",
    );
    check(
        config.rate_limit.sweep_interval_secs > 0,
        "rate_limit.sweep_interval_secs",
        "must be greater than zero",
    );

    check(config.timeouts.read_secs > 0, "timeouts.read_secs", "must be greater than zero");
    check(config.timeouts.idle_secs > 0, "timeouts.idle_secs", "must be greater than zero");

    check(
        config.limits.max_header_bytes >= 64,
        "limits.max_header_bytes",
        "must be at least 64",
    );
    check(config.limits.max_headers > 0, "limits.max_headers", "must be greater than zero");

    if config.observability.metrics_enabled {
        check(
            config.observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            "must be an IP:port socket address",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
