//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (deadline > 0, clock > 0, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// Widest host name the status record can carry.
pub const MAX_HOSTNAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("route '{route}' has an empty path prefix")]
    EmptyPrefix { route: String },

    #[error("route '{route}' path prefix '{prefix}' must start with '/'")]
    RelativePrefix { route: String, prefix: String },

    #[error("duplicate route name '{0}'")]
    DuplicateRoute(String),

    #[error("host name is {len} bytes, at most {max} fit")]
    HostnameTooLong { len: usize, max: usize },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.queue_depth == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.queue_depth",
        });
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.request_timeout_secs",
        });
    }

    if config.bus.clock_hz == 0 {
        errors.push(ValidationError::Zero {
            field: "bus.clock_hz",
        });
    }
    if config.bridge.deadline_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "bridge.deadline_ms",
        });
    }

    let mut names = HashSet::new();
    for route in &config.routes {
        if route.path_prefix.is_empty() {
            errors.push(ValidationError::EmptyPrefix {
                route: route.name.clone(),
            });
        } else if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::RelativePrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
    }

    let len = config.device.hostname.len();
    if len > MAX_HOSTNAME_LEN {
        errors.push(ValidationError::HostnameTooLong {
            len,
            max: MAX_HOSTNAME_LEN,
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
