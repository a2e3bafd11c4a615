//! Trace storage subsystem.
//!
//! # Data Flow
//! ```text
//! request task
//!     → TraceStore::create_trace (ID assigned, nothing persisted)
//!     → fill record while the response streams
//!     → TraceWriter::submit (bounded queue, rejects when full)
//!     → writer task → TraceStore::store_trace (one redb write transaction)
//!
//! inspection surface
//!     → count / first / last / next / prev / latest (read snapshots)
//! ```
//!
//! # Design Decisions
//! - Key order is creation order, so navigation needs no secondary index
//! - Navigation is stateless: callers pass the ID they navigate from
//! - Undecodable values are skipped with a warning during traversal
//! - The store is an explicit instance shared via `Arc`, never a global

pub mod id;
pub mod record;
pub mod store;
pub mod writer;

pub use id::TraceIdGenerator;
pub use record::{TracePayload, TraceRecord};
pub use store::{LatestTraces, StoreError, TraceStore};
pub use writer::{TraceQueue, TraceWriter};
