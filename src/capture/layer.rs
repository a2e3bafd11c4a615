//! Capture middleware.
//!
//! Per request: allocate a trace, record method/URI and (optionally) the
//! request body, run the inner service, then stream the response through a
//! [`CaptureBody`]. When the body finishes the trace is finalized and handed to
//! the [`TraceWriter`]; the request task never waits on persistence.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use http_body_util::LengthLimitError;

use crate::capture::body::CaptureBody;
use crate::capture::interceptor::{
    CaptureState, CapturedResponse, Passthrough, ResponseInterceptor,
};
use crate::config::CaptureConfig;
use crate::observability::metrics;
use crate::storage::{TracePayload, TraceRecord, TraceStore, TraceWriter};

/// State required by [`capture_middleware`].
#[derive(Clone)]
pub struct CaptureContext {
    pub store: Arc<TraceStore>,
    pub writer: TraceWriter,
    pub config: CaptureConfig,
}

impl CaptureContext {
    pub fn new(store: Arc<TraceStore>, writer: TraceWriter, config: CaptureConfig) -> Self {
        Self {
            store,
            writer,
            config,
        }
    }
}

pub async fn capture_middleware(
    State(ctx): State<CaptureContext>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !ctx.config.enabled {
        return next.run(request).await;
    }

    let mut trace = ctx.store.create_trace();
    trace.http_method = request.method().to_string();
    trace.uri = request.uri().to_string();
    let path = request.uri().path().to_string();

    let request = if ctx.config.capture_ingress {
        let (parts, body) = request.into_parts();
        match axum::body::to_bytes(body, ctx.config.max_ingress_bytes).await {
            Ok(bytes) => {
                trace.ingress = Some(TracePayload::new(bytes.to_vec()));
                Request::from_parts(parts, Body::from(bytes))
            }
            Err(e) if exceeds_limit(&e) => {
                tracing::warn!(trace_id = %trace.id, path = %path, limit = ctx.config.max_ingress_bytes, "Request body over capture limit");
                metrics::record_trace_dropped("ingress_rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large to capture")
                    .into_response();
            }
            Err(e) => {
                tracing::warn!(trace_id = %trace.id, path = %path, error = %e, "Could not read request body");
                metrics::record_trace_dropped("ingress_unreadable");
                return (StatusCode::BAD_REQUEST, "Cannot read request body").into_response();
            }
        }
    } else {
        request
    };

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();

    let mut interceptor = ResponseInterceptor::new(Passthrough, path)
        .with_capture_limit(ctx.config.max_egress_bytes);
    if let Err(e) = interceptor.set_status(parts.status) {
        tracing::debug!(trace_id = %trace.id, error = %e, "Status not captured");
    }

    let writer = ctx.writer.clone();
    let keep_incomplete = ctx.config.keep_incomplete;
    let mut body = CaptureBody::new(body, interceptor)
        .on_finish(move |captured| finish_trace(trace, captured, &writer, keep_incomplete));
    if ctx.config.response_deadline_secs > 0 {
        body = body.with_deadline(Duration::from_secs(ctx.config.response_deadline_secs));
    }

    Response::from_parts(parts, Body::new(body))
}

/// Whether buffering stopped because the body hit the size limit.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Fill the trace from the interceptor's observations and enqueue it.
fn finish_trace(
    mut trace: TraceRecord,
    captured: CapturedResponse,
    writer: &TraceWriter,
    keep_incomplete: bool,
) {
    trace.http_status = captured.http_status;
    trace.length = captured.size;
    trace.egress = Some(TracePayload::new(captured.egress));
    trace.finish(Utc::now());

    if captured.state != CaptureState::Completed && !keep_incomplete {
        tracing::debug!(trace_id = %trace.id, state = %captured.state, "Discarding incomplete trace");
        metrics::record_trace_dropped("incomplete");
        return;
    }

    if let Err(e) = writer.submit(trace) {
        tracing::warn!(error = %e, "Trace not queued for storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::{get, post}, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(ctx: CaptureContext) -> Router {
        Router::new()
            .route("/echo", post(|body: String| async move { (StatusCode::CREATED, body) }))
            .layer(middleware::from_fn_with_state(ctx, capture_middleware))
    }

    fn context(config: CaptureConfig) -> (CaptureContext, crate::storage::TraceQueue) {
        let store = Arc::new(TraceStore::in_memory().unwrap());
        let (writer, queue) = TraceWriter::new(8);
        (CaptureContext::new(store, writer, config), queue)
    }

    #[tokio::test]
    async fn test_exchange_is_captured() {
        let (ctx, queue) = context(CaptureConfig::default());
        let store = ctx.store.clone();
        let app = app(ctx);

        let response = app
            .oneshot(
                Request::post("/echo?x=1")
                    .body(Body::from("ping"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ping");

        // The router (and its writer clone) is gone; drain what was queued.
        queue.run(store.clone(), Duration::from_secs(5)).await;

        let trace = store.last().unwrap().unwrap();
        assert_eq!(trace.http_method, "POST");
        assert_eq!(trace.uri, "/echo?x=1");
        assert_eq!(trace.http_status, 201);
        assert_eq!(trace.length, 4);
        assert_eq!(trace.ingress, Some(TracePayload::new(b"ping".to_vec())));
        assert_eq!(trace.egress, Some(TracePayload::new(b"ping".to_vec())));
        assert!(trace.end.is_some());
    }

    #[tokio::test]
    async fn test_disabled_capture_passes_through() {
        let config = CaptureConfig {
            enabled: false,
            ..CaptureConfig::default()
        };
        let (ctx, queue) = context(config);
        let store = ctx.store.clone();

        let response = app(ctx)
            .oneshot(Request::post("/echo").body(Body::from("x")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        drop(response);

        queue.run(store.clone(), Duration::from_secs(5)).await;
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_ingress_is_rejected() {
        let config = CaptureConfig {
            max_ingress_bytes: 2,
            ..CaptureConfig::default()
        };
        let (ctx, _queue) = context(config);

        let response = app(ctx)
            .oneshot(Request::post("/echo").body(Body::from("too long")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Request body too large to capture");
    }

    /// A request body whose connection fails mid-read.
    struct Broken;

    impl http_body::Body for Broken {
        type Data = bytes::Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
            std::task::Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))))
        }
    }

    #[tokio::test]
    async fn test_unreadable_ingress_is_bad_request() {
        let (ctx, queue) = context(CaptureConfig::default());
        let store = ctx.store.clone();

        let response = app(ctx)
            .oneshot(Request::post("/echo").body(Body::new(Broken)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Cannot read request body");

        queue.run(store.clone(), Duration::from_secs(5)).await;
        assert_eq!(store.count().unwrap(), 0);
    }

    /// A response body that never yields.
    struct Stalled;

    impl http_body::Body for Stalled {
        type Data = bytes::Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_abandoned_response_is_discarded() {
        let (ctx, queue) = context(CaptureConfig::default());
        let store = ctx.store.clone();

        let app = Router::new()
            .route("/slow", get(|| async { Body::new(Stalled) }))
            .layer(middleware::from_fn_with_state(ctx, capture_middleware));

        let response = app
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        drop(response);

        queue.run(store.clone(), Duration::from_secs(5)).await;
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_response_kept_when_configured() {
        let config = CaptureConfig {
            keep_incomplete: true,
            ..CaptureConfig::default()
        };
        let (ctx, queue) = context(config);
        let store = ctx.store.clone();

        let app = Router::new()
            .route("/slow", get(|| async { Body::new(Stalled) }))
            .layer(middleware::from_fn_with_state(ctx, capture_middleware));

        let response = app
            .oneshot(Request::get("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        drop(response);

        queue.run(store.clone(), Duration::from_secs(5)).await;
        let trace = store.last().unwrap().unwrap();
        assert_eq!(trace.uri, "/slow");
        assert_eq!(trace.length, 0);
    }
}
