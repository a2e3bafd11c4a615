//! Inspection surface for captured traffic.
//!
//! # Data Flow
//! ```text
//! GET {prefix}                  → display_latest  (HTML listing)
//! GET {prefix}/first | /last    → display_first / display_last (JSON)
//! GET {prefix}/{id}             → display_trace   (HTML)
//! GET {prefix}/{id}/next|/prev  → display_next / display_prev (JSON)
//! GET {prefix}/all              → every trace (JSON array)
//! ```
//!
//! # Design Decisions
//! - Reads go straight to the store; redb read transactions are snapshots
//!   and never block the writer
//! - Not-found and unreadable outcomes are rendered markers with 404 / 500

pub mod display;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::config::InspectConfig;
use crate::storage::TraceStore;
use self::handlers::*;

pub use display::DisplayOutcome;
pub use handlers::InspectState;

pub fn setup_inspect_router(config: &InspectConfig, store: Arc<TraceStore>) -> Router {
    let prefix = config.route_prefix.as_str();
    let state = InspectState {
        store,
        route_prefix: config.route_prefix.clone(),
        latest_max: config.latest_max,
    };

    Router::new()
        .route(prefix, get(get_latest))
        .route(&format!("{prefix}/all"), get(get_all))
        .route(&format!("{prefix}/first"), get(get_first))
        .route(&format!("{prefix}/last"), get(get_last))
        .route(&format!("{prefix}/{{id}}"), get(get_trace))
        .route(&format!("{prefix}/{{id}}/next"), get(get_next))
        .route(&format!("{prefix}/{{id}}/prev"), get(get_prev))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn seeded() -> (Arc<TraceStore>, Vec<String>) {
        let store = Arc::new(TraceStore::in_memory().unwrap());
        let mut ids = Vec::new();
        for path in ["/a", "/b"] {
            let mut trace = store.create_trace();
            trace.http_method = "GET".into();
            trace.uri = path.into();
            store.store_trace(&trace).unwrap();
            ids.push(trace.id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_routes() {
        let (store, ids) = seeded();
        let app = setup_inspect_router(&InspectConfig::default(), store);

        let (status, body) = get_body(app.clone(), "/traffic").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with("<p>2/2 traces</p>"));

        let (status, body) = get_body(app.clone(), "/traffic/first").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(&ids[0]));

        let (_, body) = get_body(app.clone(), &format!("/traffic/{}/next", ids[0])).await;
        assert!(body.contains(&ids[1]));

        let (status, body) = get_body(app.clone(), &format!("/traffic/{}/next", ids[1])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, display::NOT_FOUND);

        let (status, body) = get_body(app.clone(), &format!("/traffic/{}", ids[1])).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<p>URI : /b</p>"));

        let (status, body) = get_body(app, "/traffic/all").await;
        assert_eq!(status, StatusCode::OK);
        let all: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_max_is_capped() {
        let (store, _) = seeded();
        let config = InspectConfig {
            latest_max: 1,
            ..InspectConfig::default()
        };
        let app = setup_inspect_router(&config, store);

        let (_, body) = get_body(app, "/traffic?max=50").await;
        assert!(body.ends_with("<p>1/2 traces</p>"));
    }
}
