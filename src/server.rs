//! HTTP surface
//!
//! Hands execution requests to the queue and returns results in the shape the
//! surrounding application expects. Everything beyond that (auth, storage of
//! submissions) lives outside this service.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

use crate::languages::Language;
use crate::queue::{ExecutionQueue, TaskMetadata};
use crate::result::ExecutionRequest;
use crate::runner::Runner;

const USER_ID_HEADER: &str = "x-user-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub queue: ExecutionQueue,
    pub runner: Runner,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(execute))
        .route("/api/queue/status", get(queue_status))
        .route("/api/health", get(health))
        .route("/api/languages", get(languages))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecutionRequest>,
) -> Response {
    let mut metadata = TaskMetadata::new(request.language.clone());
    if let Some(user) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()) {
        metadata = metadata.with_user(user);
    }

    let runner = state.runner.clone();
    let pending = state.queue.enqueue(
        move || async move {
            Ok(runner
                .run(
                    &request.language,
                    &request.source_code,
                    &request.stdin,
                    request.options,
                )
                .await)
        },
        metadata,
    );

    match pending.await {
        Ok(result) => Json(result).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": state.queue.status(),
        "stats": state.queue.stats(),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.runner.check_health().await;
    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn languages() -> impl IntoResponse {
    let list: Vec<_> = Language::ALL
        .iter()
        .map(|lang| json!({ "id": lang.id(), "name": lang.descriptor().name }))
        .collect();
    Json(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use serde_json::Value;

    async fn spawn_app(max_concurrent: usize) -> (String, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let state = AppState {
            queue: ExecutionQueue::new(max_concurrent),
            runner: Runner::local(LocalExecutor::new(root.path())),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));
        (format!("http://{}", addr), root)
    }

    #[tokio::test]
    async fn test_execute_unsupported_language() {
        let (base, _root) = spawn_app(2).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/api/execute", base))
            .header(USER_ID_HEADER, "user-7")
            .json(&json!({ "language": "cobol", "source_code": "DISPLAY 'HI'." }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["success"], false);
        assert_eq!(body["status"]["description"], "Unsupported Language");
        assert_eq!(body["mode"], "local");
        assert!(body["token"].is_null());

        let status: Value = client
            .get(format!("{}/api/queue/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["stats"]["totalProcessed"], 1);
        assert_eq!(status["stats"]["completed"], 1);
        assert_eq!(status["status"]["maxConcurrent"], 2);
    }

    #[tokio::test]
    async fn test_health_and_languages() {
        let (base, _root) = spawn_app(1).await;
        let client = reqwest::Client::new();

        let health = client
            .get(format!("{}/api/health", base))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        let health: Value = health.json().await.unwrap();
        assert_eq!(health["healthy"], true);

        let langs: Vec<Value> = client
            .get(format!("{}/api/languages", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(langs.len(), Language::ALL.len());
        assert!(langs.iter().any(|l| l["name"] == "python" && l["id"] == 71));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (base, _root) = spawn_app(1).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/execute", base))
            .json(&json!({ "source_code": "print(1)" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
