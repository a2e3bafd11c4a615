//! Queued trace persistence.
//!
//! Request tasks hand finished traces to a [`TraceWriter`] and return
//! immediately. A single background task drains the queue and persists each
//! trace on the blocking pool, one at a time. A write that exceeds its timeout
//! is waited out rather than abandoned, so a stalled engine backs up into the
//! bounded queue and request tasks see [`StoreError::QueueFull`] instead of
//! piling up blocked threads.
//!
//! Queue-full policy: the new trace is rejected with [`StoreError::QueueFull`].
//! Failed writes are logged and counted, never retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::storage::record::TraceRecord;
use crate::storage::store::{StoreError, TraceStore};

/// Cloneable handle used by request tasks to enqueue finished traces.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    sender: mpsc::Sender<TraceRecord>,
}

/// Receiving half of the queue, consumed by [`TraceQueue::run`].
#[derive(Debug)]
pub struct TraceQueue {
    receiver: mpsc::Receiver<TraceRecord>,
}

impl TraceWriter {
    /// Create a writer and its queue without starting the drain task.
    pub fn new(capacity: usize) -> (Self, TraceQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, TraceQueue { receiver })
    }

    /// Create a writer and spawn the task persisting into `store`.
    ///
    /// The task exits once every `TraceWriter` clone is dropped and the queue
    /// is drained.
    pub fn spawn(
        store: Arc<TraceStore>,
        capacity: usize,
        write_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (writer, queue) = Self::new(capacity);
        let handle = tokio::spawn(queue.run(store, write_timeout));
        (writer, handle)
    }

    /// Enqueue a trace without waiting.
    pub fn submit(&self, trace: TraceRecord) -> Result<(), StoreError> {
        match self.sender.try_send(trace) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(trace)) => {
                tracing::warn!(trace_id = %trace.id, queued = self.pending(), "STORAGE write queue full, rejecting trace");
                metrics::record_trace_dropped("queue_full");
                Err(StoreError::QueueFull)
            }
            Err(TrySendError::Closed(trace)) => {
                tracing::warn!(trace_id = %trace.id, "STORAGE writer closed, rejecting trace");
                metrics::record_trace_dropped("writer_closed");
                Err(StoreError::WriterClosed)
            }
        }
    }

    /// Traces currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl TraceQueue {
    /// Drain the queue until every sender is gone.
    ///
    /// One write is in flight at a time. While the engine is stalled the
    /// queue fills up and [`TraceWriter::submit`] starts rejecting traces.
    pub async fn run(mut self, store: Arc<TraceStore>, write_timeout: Duration) {
        while let Some(trace) = self.receiver.recv().await {
            let id = trace.id.clone();
            match persist(store.clone(), trace, write_timeout).await {
                Ok(()) => tracing::debug!(trace_id = %id, "STORAGE trace persisted"),
                Err(e) => {
                    let reason = if matches!(e, StoreError::Timeout(_)) {
                        "timeout"
                    } else {
                        "write_failed"
                    };
                    metrics::record_trace_dropped(reason);
                    tracing::warn!(trace_id = %id, error = %e, "STORAGE could not persist trace");
                }
            }
        }
        tracing::info!("STORAGE trace writer shutting down");
    }
}

/// Persist one trace on the blocking pool.
///
/// Returns only once the blocking write has settled. A write that outlives
/// `write_timeout` is logged and counted as slow; it is reported as
/// [`StoreError::Timeout`] only if it then fails to commit.
pub async fn persist(
    store: Arc<TraceStore>,
    trace: TraceRecord,
    write_timeout: Duration,
) -> Result<(), StoreError> {
    let id = trace.id.clone();
    let mut task = tokio::task::spawn_blocking(move || store.store_trace(&trace));

    match tokio::time::timeout(write_timeout, &mut task).await {
        Ok(joined) => joined?,
        Err(_) => {
            tracing::warn!(trace_id = %id, timeout = ?write_timeout, "STORAGE write exceeded timeout, waiting for it to settle");
            metrics::record_slow_write();
            match task.await {
                Ok(Ok(())) => {
                    tracing::info!(trace_id = %id, "STORAGE slow write committed");
                    Ok(())
                }
                Ok(Err(e)) => {
                    tracing::warn!(trace_id = %id, error = %e, "STORAGE slow write failed");
                    Err(StoreError::Timeout(write_timeout))
                }
                Err(e) => {
                    tracing::warn!(trace_id = %id, error = %e, "STORAGE slow write task failed");
                    Err(StoreError::Timeout(write_timeout))
                }
            }
        }
    }
}
