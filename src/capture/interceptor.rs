//! Response interception.
//!
//! [`ResponseInterceptor`] sits between a handler and the real response
//! writer. It forwards every byte unchanged and keeps its own copy of what was
//! written, plus the status and byte count, for the trace.
//!
//! # State Machine
//! ```text
//! NotStarted ──set_status──▶ Headers ──write_body──▶ Body ──finalize──▶ Completed
//!      │                        │                      │
//!      └────────────────────────┴──────────────────────┴──▶ Aborted / TimedOut
//!                                 (CloseSignal, any task)
//! ```
//!
//! State, status and size live in atomics shared with [`CloseSignal`], so a
//! close notification or deadline firing on another task never races a write.
//! The first terminal transition wins; later ones are ignored.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;

use crate::storage::record::DEFAULT_HTTP_STATUS;

/// Progress of one intercepted response.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    NotStarted = 0,
    Headers = 1,
    Body = 2,
    Completed = 3,
    /// Connection closed by the client before completion.
    Aborted = 4,
    /// Deadline elapsed before completion.
    TimedOut = 5,
}

impl From<u8> for CaptureState {
    fn from(val: u8) -> Self {
        match val {
            1 => CaptureState::Headers,
            2 => CaptureState::Body,
            3 => CaptureState::Completed,
            4 => CaptureState::Aborted,
            5 => CaptureState::TimedOut,
            _ => CaptureState::NotStarted,
        }
    }
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureState::Completed | CaptureState::Aborted | CaptureState::TimedOut
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::NotStarted => "not started",
            CaptureState::Headers => "writing headers",
            CaptureState::Body => "writing body",
            CaptureState::Completed => "completed",
            CaptureState::Aborted => "aborted",
            CaptureState::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`ResponseInterceptor`].
#[derive(Debug, Error)]
pub enum InterceptError {
    /// Operation not allowed in the current state. Nothing was forwarded.
    #[error("cannot {operation} while response is {state}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    /// The underlying writer failed; the error is passed through unchanged.
    #[error("response write failed: {0}")]
    Forward(#[source] io::Error),
}

/// The real response writer behind an interceptor.
pub trait ResponseSink {
    fn write_header(&mut self, status: StatusCode) -> io::Result<()>;

    /// Write `buf`, returning how many bytes were accepted.
    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Sink for transports that move the bytes themselves (e.g. a streamed body
/// whose frames are yielded unchanged); it accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ResponseSink for Passthrough {
    fn write_header(&mut self, _status: StatusCode) -> io::Result<()> {
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

#[derive(Debug)]
struct Progress {
    state: AtomicU8,
    status: AtomicU16,
    size: AtomicU64,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CaptureState::NotStarted as u8),
            status: AtomicU16::new(DEFAULT_HTTP_STATUS),
            size: AtomicU64::new(0),
        }
    }

    fn state(&self) -> CaptureState {
        CaptureState::from(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` if the current state is in `from`. Returns the state
    /// observed when the move was refused.
    fn advance(&self, from: &[CaptureState], to: CaptureState) -> Result<(), CaptureState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = CaptureState::from(current);
            if !from.contains(&state) {
                return Err(state);
            }
            if state == to {
                return Ok(());
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Enter a terminal state unless one was already reached.
    fn terminate(&self, to: CaptureState) -> bool {
        self.advance(
            &[
                CaptureState::NotStarted,
                CaptureState::Headers,
                CaptureState::Body,
            ],
            to,
        )
        .is_ok()
    }
}

/// Handle to an interceptor's shared progress, usable from any task.
///
/// Transport close notifications and deadline timers hold one of these.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    progress: Arc<Progress>,
}

impl CloseSignal {
    /// The connection closed before completion. Returns whether this call won.
    pub fn abort(&self) -> bool {
        self.progress.terminate(CaptureState::Aborted)
    }

    /// The deadline elapsed before completion. Returns whether this call won.
    pub fn time_out(&self) -> bool {
        self.progress.terminate(CaptureState::TimedOut)
    }

    pub fn state(&self) -> CaptureState {
        self.progress.state()
    }

    pub fn http_status(&self) -> u16 {
        self.progress.status.load(Ordering::Acquire)
    }

    pub fn size(&self) -> u64 {
        self.progress.size.load(Ordering::Acquire)
    }
}

/// What an interceptor observed, handed over once it is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub state: CaptureState,
    pub http_status: u16,
    pub size: u64,
    pub egress: Vec<u8>,
}

/// Wraps the response writer of one request.
#[derive(Debug)]
pub struct ResponseInterceptor<S> {
    sink: S,
    path: String,
    progress: Arc<Progress>,
    captured: Vec<u8>,
    capture_limit: usize,
}

impl<S: ResponseSink> ResponseInterceptor<S> {
    pub fn new(sink: S, path: impl Into<String>) -> Self {
        Self {
            sink,
            path: path.into(),
            progress: Arc::new(Progress::new()),
            captured: Vec::new(),
            capture_limit: usize::MAX,
        }
    }

    /// Copy at most `limit` body bytes. Bytes past the limit are still
    /// forwarded and counted.
    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    pub fn close_signal(&self) -> CloseSignal {
        CloseSignal {
            progress: self.progress.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Record the status and forward the header write.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), InterceptError> {
        self.progress
            .advance(
                &[CaptureState::NotStarted, CaptureState::Headers],
                CaptureState::Headers,
            )
            .map_err(|state| InterceptError::InvalidState {
                operation: "set status",
                state,
            })?;

        self.progress
            .status
            .store(status.as_u16(), Ordering::Release);
        self.sink
            .write_header(status)
            .map_err(InterceptError::Forward)
    }

    /// Copy `buf` for the trace, then forward it unchanged.
    ///
    /// The forwarded count (or the writer's error) is returned as is. Bytes
    /// copied before a failed forward stay in the capture.
    pub fn write_body(&mut self, buf: &[u8]) -> Result<usize, InterceptError> {
        self.progress
            .advance(&[CaptureState::Headers, CaptureState::Body], CaptureState::Body)
            .map_err(|state| InterceptError::InvalidState {
                operation: "write body",
                state,
            })?;

        let mark = self.captured.len();
        let room = self.capture_limit.saturating_sub(mark);
        let copied = buf.len().min(room);
        self.captured.extend_from_slice(&buf[..copied]);

        match self.sink.write_body(buf) {
            Ok(written) => {
                self.captured.truncate(mark + copied.min(written));
                self.progress
                    .size
                    .fetch_add(written as u64, Ordering::AcqRel);
                Ok(written)
            }
            Err(e) => {
                tracing::debug!(path = %self.path, error = %e, "Could not forward response bytes");
                Err(InterceptError::Forward(e))
            }
        }
    }

    /// Mark normal completion. Returns the terminal state that actually won.
    ///
    /// Only a response whose status was set can complete; finalizing one that
    /// already reached a terminal state is a no-op.
    pub fn finalize(&self) -> Result<CaptureState, InterceptError> {
        match self
            .progress
            .advance(&[CaptureState::Headers, CaptureState::Body], CaptureState::Completed)
        {
            Ok(()) => Ok(CaptureState::Completed),
            Err(CaptureState::NotStarted) => Err(InterceptError::InvalidState {
                operation: "finalize",
                state: CaptureState::NotStarted,
            }),
            Err(state) => {
                tracing::debug!(path = %self.path, state = %state, "Response already finalized");
                Ok(state)
            }
        }
    }

    pub fn state(&self) -> CaptureState {
        self.progress.state()
    }

    pub fn http_status(&self) -> u16 {
        self.progress.status.load(Ordering::Acquire)
    }

    pub fn size(&self) -> u64 {
        self.progress.size.load(Ordering::Acquire)
    }

    /// Bytes copied so far.
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    /// Release the sink and the observations.
    pub fn into_parts(self) -> (S, CapturedResponse) {
        let captured = CapturedResponse {
            state: self.progress.state(),
            http_status: self.http_status(),
            size: self.size(),
            egress: self.captured,
        };
        (self.sink, captured)
    }
}
