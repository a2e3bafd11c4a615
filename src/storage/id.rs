//! Chronologically sortable trace identifiers.
//!
//! An ID is a fixed-width UTC timestamp followed by a sequence number:
//!
//! ```text
//! 2024-05-01T12:30:45.123456789Z-0000000000
//! └──────────── timestamp ─────┘ └─ seq ──┘
//! ```
//!
//! Both parts are zero padded, so byte order equals creation order. When the
//! clock has not moved past the last issued timestamp the timestamp is reused
//! and the sequence bumped, which keeps IDs strictly increasing through
//! sub-resolution bursts and backwards clock steps.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

#[derive(Debug, Default)]
struct IdState {
    timestamp: Option<DateTime<Utc>>,
    sequence: u64,
}

/// Issues strictly increasing, unique trace IDs.
#[derive(Debug, Default)]
pub struct TraceIdGenerator {
    state: Mutex<IdState>,
}

impl TraceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ID from the wall clock.
    pub fn next_id(&self) -> String {
        self.next_id_at(Utc::now())
    }

    fn next_id_at(&self, now: DateTime<Utc>) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamp = match state.timestamp {
            Some(last) if now <= last => {
                state.sequence += 1;
                last
            }
            _ => {
                state.timestamp = Some(now);
                state.sequence = 0;
                now
            }
        };
        format_id(timestamp, state.sequence)
    }
}

fn format_id(timestamp: DateTime<Utc>, sequence: u64) -> String {
    format!("{}-{:010}", timestamp.format(TIMESTAMP_FORMAT), sequence)
}
