// src/server.rs
//! On-demand HTTP surface for triggering runs and reading the lock state.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::ReconcileError;
use crate::lock::RECONCILIATION_JOB;
use crate::run::{ReconciliationRun, RunParams, RunReport, RunTrigger};
use crate::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub run: Arc<ReconciliationRun>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("Malformed request body: {0}")]
    BadBody(#[from] serde_json::Error),
    #[error("Lock state unavailable: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            AppError::Reconcile(ReconcileError::LockContention { .. }) => StatusCode::CONFLICT,
            AppError::Reconcile(ReconcileError::InvalidRequest(_)) | AppError::BadBody(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Reconcile(ReconcileError::Configuration(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status_code.is_server_error() {
            error!("Error occurred: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (
            status_code,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub job: &'static str,
    pub is_held: bool,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn router(state: AppState) -> Router {
    let reconciliation_routes = Router::new()
        .route("/run", post(handle_run))
        .route("/lock", get(handle_lock_status));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api/reconciliation", reconciliation_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body is optional; every field defaults.
async fn handle_run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RunReport>, AppError> {
    let params: RunParams = if body.iter().all(u8::is_ascii_whitespace) {
        RunParams::default()
    } else {
        serde_json::from_slice(&body)?
    };
    info!(?params, "Handling /api/reconciliation/run");
    let report = state.run.execute(params, RunTrigger::Api).await?;
    Ok(Json(report))
}

async fn handle_lock_status(State(state): State<AppState>) -> Result<Json<LockStatus>, AppError> {
    let holder = state.run.lock().holder(RECONCILIATION_JOB).await?;
    Ok(Json(LockStatus {
        job: RECONCILIATION_JOB,
        is_held: holder.is_some(),
        locked_by: holder.as_ref().and_then(|row| row.locked_by.clone()),
        locked_at: holder.as_ref().and_then(|row| row.locked_at),
        expires_at: holder.as_ref().and_then(|row| row.expires_at),
    }))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": state.clock.now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::DistributedLock;
    use crate::model::SlotState;
    use crate::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(fx: &Fixture) -> Router {
        router(AppState {
            run: Arc::new(fx.run()),
            clock: Arc::new(fx.clock.clone()),
        })
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let fx = Fixture::new();
        let (status, body) = call(app(&fx), Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["timestamp"], "2024-03-10T12:00:00+00:00");
    }

    #[tokio::test]
    async fn run_returns_report() {
        let fx = Fixture::new();
        fx.publish(TEAM_A)
            .slot(1, TEAM_A, 101, "2024-03-04", SlotState::Work, None)
            .slot(2, TEAM_A, 102, "2024-03-05", SlotState::Work, None);

        let (status, body) = call(
            app(&fx),
            Method::POST,
            "/api/reconciliation/run",
            r#"{"referenceDate":"2024-03-04","intervaloDias":2,"teamId":10}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["stats"]["created"], 2);
        assert_eq!(body["stats"]["updated"], 0);
        assert_eq!(body["warnings"], json!([]));
        assert!(body["runId"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(body.get("startedAt").is_some() && body.get("finishedAt").is_some());
        assert_eq!(fx.store.absences().len(), 2);
    }

    #[tokio::test]
    async fn empty_body_runs_today_with_defaults() {
        let fx = Fixture::new();
        fx.publish(TEAM_A)
            .slot(1, TEAM_A, 101, "2024-03-10", SlotState::Work, None);

        let (status, body) = call(app(&fx), Method::POST, "/api/reconciliation/run", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["created"], 1);
    }

    #[tokio::test]
    async fn bad_requests_are_400() {
        let fx = Fixture::new();
        for body in [r#"{"intervaloDias":0}"#, r#"{"referenceDate":"yesterday"}"#, "{"] {
            let (status, json) =
                call(app(&fx), Method::POST, "/api/reconciliation/run", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(json["success"], false);
        }
    }

    #[tokio::test]
    async fn concurrent_run_is_409_and_lock_is_visible() {
        let fx = Fixture::new();
        let other = DistributedLock::new(Arc::new(fx.store.clone()), Arc::new(fx.clock.clone()));
        assert!(
            other
                .acquire(
                    RECONCILIATION_JOB,
                    std::time::Duration::from_secs(600),
                    "other-host:7:abc"
                )
                .await
        );

        let (status, lock) =
            call(app(&fx), Method::GET, "/api/reconciliation/lock", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lock["isHeld"], true);
        assert_eq!(lock["lockedBy"], "other-host:7:abc");
        assert_eq!(lock["expiresAt"], "2024-03-10T12:10:00Z");

        let (status, body) = call(app(&fx), Method::POST, "/api/reconciliation/run", "{}").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("already running"));
    }

    #[tokio::test]
    async fn lock_status_when_free() {
        let fx = Fixture::new();
        let (status, lock) =
            call(app(&fx), Method::GET, "/api/reconciliation/lock", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lock["isHeld"], false);
        assert_eq!(lock["lockedBy"], Value::Null);
    }
}
