//! JSON API consumed by agents and operators.

use crate::error::SchedulerError;
use crate::service::{AssignRequest, Scheduler};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use scanfleet_core::{AssignResponse, OutputUpload, ProtocolError};
use scanfleet_store::Db;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::InvalidState(_) => StatusCode::CONFLICT,
            SchedulerError::Protocol(_) | SchedulerError::Json(_) => StatusCode::BAD_REQUEST,
            _ => {
                error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Clone)]
struct AppState {
    scheduler: Arc<Scheduler>,
}

#[derive(Debug, Default, Deserialize)]
struct AssignParams {
    queue: Option<String>,
    /// Comma separated capability tags.
    caps: Option<String>,
    group_size: Option<usize>,
}

impl From<AssignParams> for AssignRequest {
    fn from(p: AssignParams) -> Self {
        let caps = p
            .caps
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        AssignRequest { queue: p.queue.filter(|q| !q.is_empty()), group_size: p.group_size, caps }
    }
}

pub fn router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/api/v1/scheduler/job/assign", get(assign))
        .route("/api/v1/scheduler/job/output", post(output))
        .route("/api/v1/scheduler/job/{id}/reconcile", post(reconcile))
        .route("/api/v1/scheduler/job/{id}/repeat", post(repeat))
        .route("/api/v1/scheduler/job/{id}", delete(job_delete))
        .route("/api/v1/scheduler/heatmap", get(heatmap))
        .with_state(AppState { scheduler })
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, scheduler: Arc<Scheduler>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "scheduler api listening");
    axum::serve(listener, router(scheduler)).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Run blocking store work off the async runtime on a fresh connection.
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Scheduler, &mut Db) -> crate::Result<T> + Send + 'static,
{
    let scheduler = state.scheduler.clone();
    tokio::task::spawn_blocking(move || {
        let mut db = scheduler.connect()?;
        f(&scheduler, &mut db)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?
    .map_err(ApiError::from)
}

async fn assign(State(state): State<AppState>, Query(params): Query<AssignParams>) -> ApiResult<Json<Value>> {
    let req = AssignRequest::from(params);
    let assignment = blocking(&state, move |s, db| s.assign(db, &req)).await?;
    let response = match assignment {
        Some(a) => AssignResponse::Work(a),
        None => AssignResponse::NoWork,
    };
    Ok(Json(response.into_value()))
}

async fn output(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let upload: OutputUpload =
        serde_json::from_slice(&body).map_err(|e| ApiError::from(SchedulerError::Protocol(ProtocolError::Json(e))))?;
    blocking(&state, move |s, db| s.receive_output(db, &upload)).await?;
    Ok(Json(json!({})))
}

async fn reconcile(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    blocking(&state, move |s, db| s.reconcile(db, &id)).await?;
    Ok(Json(json!({})))
}

async fn repeat(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let count = blocking(&state, move |s, db| s.repeat(db, &id)).await?;
    Ok(Json(json!({ "count": count })))
}

async fn job_delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    blocking(&state, move |s, db| s.job_delete(db, &id)).await?;
    Ok(Json(json!({})))
}

async fn heatmap(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = blocking(&state, |s, db| s.heatmap_check(db)).await?;
    Ok(Json(json!(snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::HeatmapPolicy;
    use crate::service::SchedulerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use scanfleet_core::Assignment;
    use scanfleet_store::NewQueue;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> (Arc<Scheduler>, Router) {
        let scheduler = Arc::new(
            Scheduler::new(SchedulerConfig {
                db: dir.join("fleet.db"),
                output_dir: dir.join("output"),
                heatmap: HeatmapPolicy::default(),
                exclusions: Vec::new(),
            })
            .unwrap(),
        );
        let mut db = scheduler.connect().unwrap();
        let queue = NewQueue {
            name: "dummy".into(),
            config: r#"{"module":"dummy","args":"--arg"}"#.into(),
            group_size: 2,
            priority: 0,
            active: true,
            reqs: vec!["net".into()],
        };
        scheduler.queue_create(&mut db, &queue).unwrap();
        scheduler.queue_enqueue(&mut db, "dummy", &["10.0.0.1".to_string(), "10.0.0.2".to_string()]).unwrap();
        (scheduler.clone(), router(scheduler))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn assign_then_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, app) = app(dir.path());

        let (status, body) = call(&app, Method::GET, "/api/v1/scheduler/job/assign", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, body) = call(&app, Method::GET, "/api/v1/scheduler/job/assign?caps=net,other", None).await;
        assert_eq!(status, StatusCode::OK);
        let assignment = Assignment::from_value(body).unwrap();
        assert_eq!(assignment.targets.len(), 2);
        assert_eq!(assignment.config.get_str("args"), Some("--arg"));

        let upload = serde_json::to_value(OutputUpload::from_archive(&assignment.id, 0, b"zip")).unwrap();
        let (status, _) = call(&app, Method::POST, "/api/v1/scheduler/job/output", Some(upload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::POST, "/api/v1/scheduler/job/output", Some(upload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["status"], 409);

        let db = scheduler.connect().unwrap();
        assert_eq!(scheduler.job_get(&db, &assignment.id).unwrap().retval, Some(0));

        let (status, body) = call(&app, Method::GET, "/api/v1/scheduler/heatmap", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_and_unknown_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let (_scheduler, app) = app(dir.path());

        let (status, _) = call(&app, Method::POST, "/api/v1/scheduler/job/output", Some(json!({"id": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let bad_b64 = json!({"id": "x", "retval": 0, "output": "%%%"});
        let (status, _) = call(&app, Method::POST, "/api/v1/scheduler/job/output", Some(bad_b64)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let unknown = json!({"id": "4f1e0000-0000-0000-0000-000000000000", "retval": 0, "output": ""});
        let (status, _) = call(&app, Method::POST, "/api/v1/scheduler/job/output", Some(unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_admin_routes() {
        let dir = tempfile::tempdir().unwrap();
        let (_scheduler, app) = app(dir.path());

        let (_, body) = call(&app, Method::GET, "/api/v1/scheduler/job/assign?queue=dummy", None).await;
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::POST, &format!("/api/v1/scheduler/job/{id}/repeat"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        let (status, _) = call(&app, Method::POST, &format!("/api/v1/scheduler/job/{id}/reconcile"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, &format!("/api/v1/scheduler/job/{id}/reconcile"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/scheduler/job/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/scheduler/job/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::POST, "/api/v1/scheduler/job/missing/repeat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
