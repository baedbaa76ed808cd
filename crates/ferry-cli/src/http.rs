//! HTTP surface: `GET /`, `POST /enqueue` and `GET /health`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use ferry_core::{FerryError, JobId, JobStore, Producer};

/// Upper bound on the store ping behind `/health`.
pub const HEALTH_PING_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct AppState {
    pub producer: Producer,
    pub store: Arc<dyn JobStore>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub task_name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: JobId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/enqueue", post(enqueue))
        .route("/health", get(health))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "ferry API is running" }))
}

async fn enqueue(State(state): State<AppState>, Json(req): Json<EnqueueRequest>) -> Response {
    match state.producer.enqueue(&req.task_name, req.payload).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let store = match tokio::time::timeout(HEALTH_PING_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => "up",
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "health: store ping failed");
            "down"
        }
        Err(_) => {
            tracing::warn!("health: store ping timed out");
            "down"
        }
    };
    Json(json!({ "status": "ok", "store": store }))
}

fn error_response(err: FerryError) -> Response {
    match err {
        FerryError::InvalidTaskName { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_task_name", err.to_string())
        }
        FerryError::StoreUnavailable(_) => {
            tracing::error!(error = %err, "enqueue: store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
        }
        other => {
            tracing::error!(error = %other, "enqueue failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use ferry_core::app::QueueCounts;
    use ferry_core::domain::{JobFailure, JobState, LeaseToken, WorkerId};
    use ferry_core::ports::ClaimedJob;
    use ferry_core::{InMemoryStore, JobRecord};
    use tower::ServiceExt;

    /// Store whose every call fails as if the server were gone.
    struct DownStore;

    fn down<T>() -> ferry_core::Result<T> {
        Err(FerryError::store_unavailable("connection refused"))
    }

    #[async_trait]
    impl JobStore for DownStore {
        async fn submit(&self, _job: JobRecord) -> ferry_core::Result<()> {
            down()
        }
        async fn claim(&self, _worker_id: WorkerId) -> ferry_core::Result<Option<ClaimedJob>> {
            down()
        }
        async fn complete(&self, _id: JobId, _t: LeaseToken, _r: Value) -> ferry_core::Result<()> {
            down()
        }
        async fn fail(
            &self,
            _id: JobId,
            _t: LeaseToken,
            _f: JobFailure,
            _retry_after: Option<Duration>,
        ) -> ferry_core::Result<JobState> {
            down()
        }
        async fn heartbeat(
            &self,
            _id: JobId,
            _t: LeaseToken,
        ) -> ferry_core::Result<DateTime<Utc>> {
            down()
        }
        async fn get(&self, _id: JobId) -> ferry_core::Result<Option<JobRecord>> {
            down()
        }
        async fn reap_expired(&self) -> ferry_core::Result<Vec<JobId>> {
            down()
        }
        async fn counts(&self) -> ferry_core::Result<QueueCounts> {
            down()
        }
        async fn ping(&self) -> ferry_core::Result<()> {
            down()
        }
    }

    fn state_with(store: Arc<dyn JobStore>) -> AppState {
        AppState {
            producer: Producer::new(Arc::clone(&store), 3),
            store,
        }
    }

    fn memory_state() -> AppState {
        state_with(Arc::new(InMemoryStore::new(Duration::from_secs(30))))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn enqueue_returns_202_and_a_job_id() {
        let state = memory_state();
        let store = Arc::clone(&state.store);
        let response = router(state)
            .oneshot(post_json("/enqueue", json!({"task_name": "echo", "payload": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: EnqueueResponse = serde_json::from_value(body_json(response).await).unwrap();
        let job = store.get(body.job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.payload, json!("hi"));
    }

    #[tokio::test]
    async fn payload_is_optional() {
        let response = router(memory_state())
            .oneshot(post_json("/enqueue", json!({"task_name": "background_task"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_task_name_is_400() {
        let response = router(memory_state())
            .oneshot(post_json("/enqueue", json!({"task_name": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_task_name");
    }

    #[tokio::test]
    async fn missing_task_name_is_422() {
        let response = router(memory_state())
            .oneshot(post_json("/enqueue", json!({"payload": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn store_outage_is_503() {
        let response = router(state_with(Arc::new(DownStore)))
            .oneshot(post_json("/enqueue", json!({"task_name": "echo"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "store_unavailable");
    }

    #[tokio::test]
    async fn root_answers_with_a_banner() {
        let response = router(memory_state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"message": "ferry API is running"}));
    }

    #[tokio::test]
    async fn health_reports_store_status() {
        let get = || Request::builder().uri("/health").body(Body::empty()).unwrap();

        let up = router(memory_state()).oneshot(get()).await.unwrap();
        assert_eq!(up.status(), StatusCode::OK);
        assert_eq!(body_json(up).await, json!({"status": "ok", "store": "up"}));

        let down = router(state_with(Arc::new(DownStore))).oneshot(get()).await.unwrap();
        assert_eq!(down.status(), StatusCode::OK);
        assert_eq!(body_json(down).await, json!({"status": "ok", "store": "down"}));
    }
}
