//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::{ProxyConfig, StorageMode};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field}: '{value}' is not a valid host[:port]")]
    InvalidAuthority { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("inspect.route_prefix '{0}' must start with '/' and not end with '/'")]
    InvalidRoutePrefix(String),

    #[error("storage.path must be set when storage.mode is on_disk")]
    MissingStoragePath,
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_authority(&mut errors, "upstream.address", &config.upstream.address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.storage.queue_capacity == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "storage.queue_capacity",
        });
    }
    if config.storage.write_timeout_ms == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "storage.write_timeout_ms",
        });
    }
    if config.storage.mode == StorageMode::OnDisk && config.storage.path.trim().is_empty() {
        errors.push(ValidationError::MissingStoragePath);
    }

    if config.inspect.enabled {
        let prefix = &config.inspect.route_prefix;
        if !prefix.starts_with('/') || prefix.ends_with('/') {
            errors.push(ValidationError::InvalidRoutePrefix(prefix.clone()));
        }
        if config.inspect.latest_max == 0 {
            errors.push(ValidationError::MustBePositive {
                field: "inspect.latest_max",
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// The upstream may be named by host, as long as it forms a URI authority.
fn check_authority(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if Authority::from_str(value).is_err() {
        errors.push(ValidationError::InvalidAuthority {
            field,
            value: value.to_string(),
        });
    }
}
