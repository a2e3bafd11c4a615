//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the capture proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the capture proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream server every request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Trace persistence settings.
    pub storage: StorageConfig,

    /// What gets captured per exchange.
    pub capture: CaptureConfig,

    /// Inspection routes.
    pub inspect: InspectConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Where traces are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    OnDisk,
    InMemory,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::OnDisk => write!(f, "on disk"),
            StorageMode::InMemory => write!(f, "in memory"),
        }
    }
}

/// Trace storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,

    /// Database file, used in `on_disk` mode.
    pub path: String,

    /// Upper bound for one persisted write in milliseconds.
    pub write_timeout_ms: u64,

    /// Finished traces waiting for persistence before new ones are rejected.
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::OnDisk,
            path: "capture.db".to_string(),
            write_timeout_ms: 2000,
            queue_capacity: 1024,
        }
    }
}

/// Capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Record traces at all.
    pub enabled: bool,

    /// Buffer and record request bodies.
    pub capture_ingress: bool,

    /// Largest request body accepted when capturing ingress.
    pub max_ingress_bytes: usize,

    /// Response bytes copied per trace; the rest is forwarded but not kept.
    pub max_egress_bytes: usize,

    /// Response streaming deadline in seconds (0 = none).
    pub response_deadline_secs: u64,

    /// Persist traces of aborted or timed out responses too.
    pub keep_incomplete: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_ingress: true,
            max_ingress_bytes: 1024 * 1024, // 1MB
            max_egress_bytes: 4 * 1024 * 1024,
            response_deadline_secs: 30,
            keep_incomplete: false,
        }
    }
}

/// Inspection surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Serve the inspection routes.
    pub enabled: bool,

    /// Prefix for inspection routes and the links they emit.
    pub route_prefix: String,

    /// Default number of entries in the latest listing.
    pub latest_max: usize,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route_prefix: "/traffic".to_string(),
            latest_max: 50,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response headers) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
