//! Capturing HTTP proxy library.
//!
//! Forwards traffic to one upstream, records every exchange as an ordered
//! trace in an embedded store, and serves an inspection surface over it.

pub mod capture;
pub mod config;
pub mod http;
pub mod inspect;
pub mod lifecycle;
pub mod observability;
pub mod render;
pub mod storage;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use storage::{TraceRecord, TraceStore, TraceWriter};
