use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::inspect::display::{self, DisplayOutcome};
use crate::render::TraceView;
use crate::storage::TraceStore;

/// State shared by the inspection handlers.
#[derive(Clone)]
pub struct InspectState {
    pub store: Arc<TraceStore>,
    pub route_prefix: String,
    pub latest_max: usize,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub max: Option<usize>,
}

const HTML: &str = "text/html; charset=utf-8";
const JSON: &str = "application/json";

pub async fn get_latest(
    State(state): State<InspectState>,
    Query(query): Query<LatestQuery>,
) -> Response {
    let max = query.max.unwrap_or(state.latest_max).min(state.latest_max);
    let mut body = String::new();
    let outcome = display::display_latest(&state.store, &mut body, &state.route_prefix, max);
    respond(outcome, body, HTML)
}

pub async fn get_first(State(state): State<InspectState>) -> Response {
    let mut body = String::new();
    let outcome = display::display_first(&state.store, &mut body, &state.route_prefix);
    respond(outcome, body, JSON)
}

pub async fn get_last(State(state): State<InspectState>) -> Response {
    let mut body = String::new();
    let outcome = display::display_last(&state.store, &mut body, &state.route_prefix);
    respond(outcome, body, JSON)
}

pub async fn get_next(State(state): State<InspectState>, Path(id): Path<String>) -> Response {
    let mut body = String::new();
    let outcome = display::display_next(&state.store, &mut body, &state.route_prefix, &id);
    respond(outcome, body, JSON)
}

pub async fn get_prev(State(state): State<InspectState>, Path(id): Path<String>) -> Response {
    let mut body = String::new();
    let outcome = display::display_prev(&state.store, &mut body, &state.route_prefix, &id);
    respond(outcome, body, JSON)
}

pub async fn get_trace(State(state): State<InspectState>, Path(id): Path<String>) -> Response {
    let mut body = String::new();
    let outcome = display::display_trace(&state.store, &mut body, &state.route_prefix, &id);
    respond(outcome, body, HTML)
}

/// Every stored trace, oldest first.
pub async fn get_all(State(state): State<InspectState>) -> Response {
    match state.store.all() {
        Ok(traces) => {
            let views: Vec<TraceView<'_>> = traces.iter().map(TraceView::from).collect();
            Json(views).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Cannot list all traces");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HTML)],
                display::UNREADABLE,
            )
                .into_response()
        }
    }
}

/// Map a display outcome to a response. Markers are always HTML.
fn respond(
    outcome: Result<DisplayOutcome, std::fmt::Error>,
    body: String,
    content_type: &'static str,
) -> Response {
    let (status, content_type) = match outcome {
        Ok(DisplayOutcome::Rendered) => (StatusCode::OK, content_type),
        Ok(DisplayOutcome::NotFound) => (StatusCode::NOT_FOUND, HTML),
        Ok(DisplayOutcome::Unreadable) => (StatusCode::INTERNAL_SERVER_ERROR, HTML),
        Err(e) => {
            tracing::error!(error = %e, "Cannot write inspection response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}
