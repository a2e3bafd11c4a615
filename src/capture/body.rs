//! Response body wrapper feeding a [`ResponseInterceptor`].
//!
//! Frames are yielded exactly as the inner body produced them; the
//! interceptor only sees a reference to each data frame. The transport's
//! close notification is the body being dropped before end of stream, which
//! hyper does when the client goes away.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::BoxError;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::time::Sleep;

use crate::capture::interceptor::{
    CaptureState, CapturedResponse, Passthrough, ResponseInterceptor,
};

type FinishHook = Box<dyn FnOnce(CapturedResponse) + Send + 'static>;

/// Body wrapper that observes a response while streaming it through.
pub struct CaptureBody {
    inner: Body,
    interceptor: Option<ResponseInterceptor<Passthrough>>,
    deadline: Option<Pin<Box<Sleep>>>,
    on_finish: Option<FinishHook>,
}

impl CaptureBody {
    /// Wrap `inner`. The interceptor should already have its status set.
    pub fn new(inner: Body, interceptor: ResponseInterceptor<Passthrough>) -> Self {
        Self {
            inner,
            interceptor: Some(interceptor),
            deadline: None,
            on_finish: None,
        }
    }

    /// End the stream with an error if it is still pending after `after`.
    pub fn with_deadline(mut self, after: Duration) -> Self {
        self.deadline = Some(Box::pin(tokio::time::sleep(after)));
        self
    }

    /// Called exactly once with the observations, whatever the outcome.
    pub fn on_finish<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(CapturedResponse) + Send + 'static,
    {
        self.on_finish = Some(Box::new(hook));
        self
    }

    fn finish(&mut self, outcome: CaptureState) {
        let Some(interceptor) = self.interceptor.take() else {
            return;
        };

        match outcome {
            CaptureState::Completed => {
                if let Err(e) = interceptor.finalize() {
                    tracing::debug!(path = %interceptor.path(), error = %e, "Response ended without a status");
                    interceptor.close_signal().abort();
                }
            }
            CaptureState::TimedOut => {
                interceptor.close_signal().time_out();
            }
            _ => {
                interceptor.close_signal().abort();
            }
        }

        let (_, captured) = interceptor.into_parts();
        tracing::debug!(
            state = %captured.state,
            size = captured.size,
            "Response capture finished"
        );
        if let Some(hook) = self.on_finish.take() {
            hook(captured);
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(interceptor)) = (frame.data_ref(), this.interceptor.as_mut()) {
                    if let Err(e) = interceptor.write_body(data) {
                        tracing::debug!(path = %interceptor.path(), error = %e, "Frame not captured");
                    }
                }
                if this.inner.is_end_stream() {
                    this.finish(CaptureState::Completed);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(CaptureState::Aborted);
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.finish(CaptureState::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some(deadline) = this.deadline.as_mut() {
                    if deadline.as_mut().poll(cx).is_ready() {
                        this.finish(CaptureState::TimedOut);
                        this.deadline = None;
                        let err = io::Error::new(io::ErrorKind::TimedOut, "response deadline elapsed");
                        return Poll::Ready(Some(Err(err.into())));
                    }
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        let outcome = if self.inner.is_end_stream() {
            CaptureState::Completed
        } else {
            CaptureState::Aborted
        };
        self.finish(outcome);
    }
}
