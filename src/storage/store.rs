//! Ordered, transactional trace persistence on top of redb.
//!
//! One table, key = trace ID, value = JSON-encoded [`TraceRecord`]. Because IDs
//! sort in creation order, first/last/neighbor/latest queries are plain key
//! range scans with no secondary index.

use std::ops::Bound;
use std::path::Path;
use std::time::Instant;

use redb::backends::InMemoryBackend;
use redb::{
    AccessGuard, Database, ReadOnlyTable, ReadableTable, ReadableTableMetadata, StorageError,
    TableDefinition, TableError, TableHandle,
};
use thiserror::Error;

use crate::config::schema::{StorageConfig, StorageMode};
use crate::observability::metrics;
use crate::storage::id::TraceIdGenerator;
use crate::storage::record::TraceRecord;

const TRACES: TableDefinition<&str, &[u8]> = TableDefinition::new("traces");

/// Errors raised by the trace store and its write queue.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open trace database: {0}")]
    Open(#[source] redb::Error),

    #[error("cannot encode trace {id}: {source}")]
    Encoding {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot persist trace: {0}")]
    StorageWrite(#[source] redb::Error),

    #[error("cannot read traces: {0}")]
    StorageRead(#[source] redb::Error),

    #[error("stored trace {id} is malformed: {source}")]
    MalformedRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("trace write timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("trace write queue is full")]
    QueueFull,

    #[error("trace writer is closed")]
    WriterClosed,

    #[error("trace write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn open_error<E: Into<redb::Error>>(e: E) -> StoreError {
    StoreError::Open(e.into())
}

fn write_error<E: Into<redb::Error>>(e: E) -> StoreError {
    StoreError::StorageWrite(e.into())
}

fn read_error<E: Into<redb::Error>>(e: E) -> StoreError {
    StoreError::StorageRead(e.into())
}

/// The newest traces plus the total number stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestTraces {
    /// Most recent first.
    pub traces: Vec<TraceRecord>,
    pub total: u64,
}

/// Persistent, ordered trace store.
///
/// Constructed once and shared (`Arc<TraceStore>`) between the capture path
/// and the inspection surface. Writes are single-writer transactions; reads
/// run against a snapshot and never see a partially written record.
pub struct TraceStore {
    db: Database,
    ids: TraceIdGenerator,
    mode: StorageMode,
}

impl TraceStore {
    /// Open (or create) an on-disk store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(open_error)?;
        tracing::info!(path = %path.display(), "STORAGE opened trace database");
        Self::init(db, StorageMode::OnDisk)
    }

    /// Create a store that lives only as long as this instance.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(open_error)?;
        tracing::info!("STORAGE opened in-memory trace database");
        Self::init(db, StorageMode::InMemory)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        match config.mode {
            StorageMode::OnDisk => Self::open(&config.path),
            StorageMode::InMemory => Self::in_memory(),
        }
    }

    fn init(db: Database, mode: StorageMode) -> Result<Self, StoreError> {
        let exists = match db.begin_read().map_err(open_error)?.open_table(TRACES) {
            Ok(_) => true,
            Err(TableError::TableDoesNotExist(_)) => false,
            Err(e) => return Err(open_error(e)),
        };

        if !exists {
            let txn = db.begin_write().map_err(open_error)?;
            txn.open_table(TRACES).map_err(open_error)?;
            txn.commit().map_err(open_error)?;
            tracing::info!(table = TRACES.name(), "STORAGE created table to persist traffic captures");
        }

        Ok(Self {
            db,
            ids: TraceIdGenerator::new(),
            mode,
        })
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Allocate a new empty trace with a fresh ID. Nothing is persisted.
    pub fn create_trace(&self) -> TraceRecord {
        let trace = TraceRecord::new(self.ids.next_id());
        tracing::debug!(trace_id = %trace.id, "STORAGE created new trace");
        metrics::record_trace_created();
        trace
    }

    /// Persist a trace in a single transaction keyed by its ID.
    pub fn store_trace(&self, trace: &TraceRecord) -> Result<(), StoreError> {
        tracing::debug!(trace_id = %trace.id, "STORAGE storing trace");
        let started = Instant::now();

        let encoded = serde_json::to_vec(trace).map_err(|source| {
            tracing::warn!(trace_id = %trace.id, error = %source, "STORAGE cannot encode trace");
            StoreError::Encoding {
                id: trace.id.clone(),
                source,
            }
        })?;

        let txn = self.db.begin_write().map_err(write_error)?;
        {
            let mut table = txn.open_table(TRACES).map_err(write_error)?;
            table
                .insert(trace.id.as_str(), encoded.as_slice())
                .map_err(write_error)?;
        }
        txn.commit().map_err(|e| {
            tracing::warn!(trace_id = %trace.id, error = %e, "STORAGE error while storing trace");
            write_error(e)
        })?;

        metrics::record_trace_stored(started.elapsed());
        Ok(())
    }

    fn table(&self) -> Result<ReadOnlyTable<&'static str, &'static [u8]>, StoreError> {
        let txn = self.db.begin_read().map_err(read_error)?;
        txn.open_table(TRACES).map_err(read_error)
    }

    /// Number of persisted traces.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.table()?.len().map_err(read_error)
    }

    /// Fetch a trace by ID.
    pub fn get(&self, id: &str) -> Result<Option<TraceRecord>, StoreError> {
        tracing::debug!(trace_id = %id, "STORAGE fetching trace");
        let table = self.table()?;
        let Some(value) = table.get(id).map_err(read_error)? else {
            return Ok(None);
        };
        serde_json::from_slice(value.value())
            .map(Some)
            .map_err(|source| {
                tracing::warn!(trace_id = %id, error = %source, "STORAGE json decode failed");
                metrics::record_malformed_record();
                StoreError::MalformedRecord {
                    id: id.to_string(),
                    source,
                }
            })
    }

    /// Trace with the smallest ID.
    pub fn first(&self) -> Result<Option<TraceRecord>, StoreError> {
        tracing::debug!("STORAGE fetching first trace");
        let table = self.table()?;
        first_decodable(table.iter().map_err(read_error)?)
    }

    /// Trace with the largest ID.
    pub fn last(&self) -> Result<Option<TraceRecord>, StoreError> {
        tracing::debug!("STORAGE fetching last trace");
        let table = self.table()?;
        first_decodable(table.iter().map_err(read_error)?.rev())
    }

    /// Nearest stored trace with an ID strictly greater than `id`.
    ///
    /// `id` need not exist; any string works as a position in the key space.
    pub fn next(&self, id: &str) -> Result<Option<TraceRecord>, StoreError> {
        tracing::debug!(from = %id, "STORAGE fetching next trace");
        let table = self.table()?;
        let range = table
            .range::<&str>((Bound::Excluded(id), Bound::Unbounded))
            .map_err(read_error)?;
        first_decodable(range)
    }

    /// Nearest stored trace with an ID strictly smaller than `id`.
    pub fn prev(&self, id: &str) -> Result<Option<TraceRecord>, StoreError> {
        tracing::debug!(from = %id, "STORAGE fetching previous trace");
        let table = self.table()?;
        let range = table
            .range::<&str>((Bound::Unbounded, Bound::Excluded(id)))
            .map_err(read_error)?;
        first_decodable(range.rev())
    }

    /// Up to `max` traces, most recent first, with the total count taken from
    /// the same snapshot.
    pub fn latest(&self, max: usize) -> Result<LatestTraces, StoreError> {
        tracing::debug!(max, "STORAGE fetching last traces");
        let table = self.table()?;
        let total = table.len().map_err(read_error)?;

        let mut traces = Vec::with_capacity(max.min(total as usize));
        if max > 0 {
            for entry in table.iter().map_err(read_error)?.rev() {
                let (key, value) = entry.map_err(read_error)?;
                if let Some(trace) = decode_entry(key.value(), value.value()) {
                    traces.push(trace);
                    if traces.len() >= max {
                        break;
                    }
                }
            }
        }

        Ok(LatestTraces { traces, total })
    }

    /// Every decodable trace in ascending ID order.
    pub fn all(&self) -> Result<Vec<TraceRecord>, StoreError> {
        tracing::debug!("STORAGE fetching all traces");
        let table = self.table()?;
        let mut traces = Vec::new();
        for entry in table.iter().map_err(read_error)? {
            let (key, value) = entry.map_err(read_error)?;
            if let Some(trace) = decode_entry(key.value(), value.value()) {
                traces.push(trace);
            }
        }
        Ok(traces)
    }

    /// Release the database handle.
    pub fn close(self) {
        tracing::info!("STORAGE closing database");
        drop(self.db);
    }

    /// Hold the engine's write lock until the transaction is dropped.
    #[cfg(test)]
    pub(crate) fn lock_writes(&self) -> redb::WriteTransaction {
        self.db.begin_write().unwrap()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(write_error)?;
        {
            let mut table = txn.open_table(TRACES).map_err(write_error)?;
            table.insert(key, value).map_err(write_error)?;
        }
        txn.commit().map_err(write_error)
    }
}

impl std::fmt::Debug for TraceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStore").field("mode", &self.mode).finish()
    }
}

type Entry<'a> = Result<(AccessGuard<'a, &'static str>, AccessGuard<'a, &'static [u8]>), StorageError>;

/// First entry of `entries` that decodes; malformed values are skipped.
fn first_decodable<'a, I>(entries: I) -> Result<Option<TraceRecord>, StoreError>
where
    I: Iterator<Item = Entry<'a>>,
{
    for entry in entries {
        let (key, value) = entry.map_err(read_error)?;
        if let Some(trace) = decode_entry(key.value(), value.value()) {
            return Ok(Some(trace));
        }
    }
    Ok(None)
}

fn decode_entry(key: &str, value: &[u8]) -> Option<TraceRecord> {
    match serde_json::from_slice(value) {
        Ok(trace) => Some(trace),
        Err(e) => {
            tracing::warn!(trace_id = %key, error = %e, "STORAGE json decode failed, skipping trace");
            metrics::record_malformed_record();
            None
        }
    }
}
