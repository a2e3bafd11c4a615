//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Open store → Spawn writer → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain write queue → Close store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain queued traces, close database

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
