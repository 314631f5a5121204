//! HTTP submission endpoint.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use streamq_core::app::{Enqueuer, TaskRequest};
use streamq_core::domain::{QueueError, TaskId};
use streamq_core::ports::Queue;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn Queue>,
    pub enqueuer: Arc<Enqueuer>,
}

impl AppState {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self {
            enqueuer: Arc::new(Enqueuer::new(Arc::clone(&queue))),
            queue,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Epoch milliseconds; absent or past means "now".
    #[serde(default)]
    pub run_at_ms: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: TaskId,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("task {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Queue(QueueError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/tasks/:id", get(get_task))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    if body.task_type.trim().is_empty() {
        return Err(ApiError::BadRequest("`type` must not be empty".to_string()));
    }
    let run_at = body.run_at_ms.map(parse_run_at).transpose()?;

    let id = state
        .enqueuer
        .submit(TaskRequest {
            task_type: body.task_type,
            payload: body.payload,
            max_attempts: body.max_attempts,
            run_at,
        })
        .await?;
    Ok(Json(EnqueueResponse { id }))
}

fn parse_run_at(ms: i64) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ApiError::BadRequest(format!("run_at_ms {ms} is out of range")))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let task = state
        .queue
        .get(&TaskId::new(id.clone()))
        .await?
        .ok_or(ApiError::NotFound(id))?;
    Ok(Json(task).into_response())
}

/// Serve until `shutdown` resolves; in-flight requests are drained.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use streamq_core::config::QueueConfig;
    use streamq_core::domain::{Task, TaskStatus};
    use streamq_core::impls::InMemoryStore;
    use streamq_core::ports::Bootstrap;
    use tower::ServiceExt;

    async fn setup() -> (Arc<InMemoryStore>, Router) {
        let store = Arc::new(InMemoryStore::new(QueueConfig::default()));
        store.ensure_group().await.unwrap();
        let app = create_router(AppState::new(store.clone()));
        (store, app)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/enqueue")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn enqueue_returns_the_task_id() {
        let (store, app) = setup().await;
        let response = app
            .oneshot(post_json(
                r#"{"type":"demo.fail","payload":{"k":"v"},"max_attempts":3}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let id = TaskId::new(body["id"].as_str().unwrap());
        let saved = store.get(&id).await.unwrap().unwrap();
        assert_eq!(saved.task_type, "demo.fail");
        assert_eq!(saved.max_attempts, 3);
        assert_eq!(saved.payload["k"], "v");
    }

    #[tokio::test]
    async fn future_run_at_is_delayed() {
        let (store, app) = setup().await;
        let run_at = Utc::now().timestamp_millis() + 60_000;
        let response = app
            .oneshot(post_json(&format!(r#"{{"type":"later","run_at_ms":{run_at}}}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let id = TaskId::new(body["id"].as_str().unwrap());
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, TaskStatus::Delayed);
        assert!(store.live_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let (_store, app) = setup().await;
        let response = app.oneshot(post_json("{not json")).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn empty_type_is_rejected() {
        let (_store, app) = setup().await;
        let response = app.oneshot(post_json(r#"{"type":"  "}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn store_outage_is_503() {
        let (store, app) = setup().await;
        store.set_unavailable(true);
        let response = app.oneshot(post_json(r#"{"type":"t"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn get_task_returns_the_record_or_404() {
        let (store, app) = setup().await;
        store.enqueue(Task::new("t").with_id("known")).await.unwrap();

        let found = app
            .clone()
            .oneshot(Request::get("/tasks/known").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(found.status(), StatusCode::OK);
        let body = body_json(found).await;
        assert_eq!(body["type"], "t");
        assert_eq!(body["status"], "queued");

        let missing = app
            .oneshot(Request::get("/tasks/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
