//! HTTP route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use crate::calc;
use crate::config::Config;
use crate::task::{ExpressionId, TaskQueue};

use super::expression_store::{ExpressionStore, StoreError};
use super::types::*;

/// Longest long-poll a worker may request.
const MAX_POLL_WAIT: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Expressions, tasks and the ready queue
    pub store: Arc<ExpressionStore>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let queue = Arc::new(TaskQueue::new(config.scheduler.queue_capacity));
        let store = Arc::new(ExpressionStore::new(
            queue,
            config.service_times,
            config.scheduler.clone(),
        ));
        Arc::new(Self { config, store })
    }
}

/// Build the coordinator router.
pub fn router(state: Arc<AppState>) -> Router {
    let index = ServeFile::new(state.config.static_dir.join("index.html"));

    Router::new()
        .route_service("/", index)
        .route("/api/health", get(health))
        .route("/api/v1/calculate", axum::routing::post(calculate))
        .route("/api/v1/expressions", get(list_expressions))
        .route("/api/v1/expressions/:id", get(get_expression))
        .route("/api/v1/expressions/:id/tasks", get(get_expression_tasks))
        .route("/internal/task", get(poll_task).post(submit_task_result))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config.clone());
    Arc::clone(&state.store).start_lease_sweeper();

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn store_error(e: StoreError) -> (StatusCode, String) {
    let status = match &e {
        StoreError::ExpressionNotFound(_) | StoreError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
    };
    (status, e.to_string())
}

fn parse_expression_id(raw: &str) -> Result<ExpressionId, (StatusCode, String)> {
    raw.parse::<u64>()
        .map(ExpressionId::new)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid expression id: {}", raw)))
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, (StatusCode, String)> {
    serde_json::from_slice(body)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid request: {}", e)))
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_len: state.store.queue().len(),
    })
}

/// Accept an expression for evaluation.
async fn calculate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<CalculateResponse>), (StatusCode, String)> {
    let req: CalculateRequest = decode_body(&body)?;

    let ast = calc::parse(&req.expression).map_err(|e| {
        tracing::debug!("Rejected expression {:?}: {}", req.expression, e);
        (StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid expression: {}", e))
    })?;

    let id = state
        .store
        .create_expression(&req.expression, &ast)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(CalculateResponse { id })))
}

/// List all expressions.
async fn list_expressions(State(state): State<Arc<AppState>>) -> Json<ExpressionListResponse> {
    Json(ExpressionListResponse {
        expressions: state.store.list_expressions().await,
    })
}

/// Get one expression.
async fn get_expression(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExpressionResponse>, (StatusCode, String)> {
    let id = parse_expression_id(&id)?;
    let expression = state.store.get_expression(id).await.map_err(store_error)?;
    Ok(Json(ExpressionResponse { expression }))
}

/// Get the tasks of one expression.
async fn get_expression_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskListResponse>, (StatusCode, String)> {
    let id = parse_expression_id(&id)?;
    let tasks = state.store.expression_tasks(id).await.map_err(store_error)?;
    Ok(Json(TaskListResponse { tasks }))
}

/// Worker poll: hand out the next ready task.
async fn poll_task(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskPollQuery>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let wait = query
        .wait_ms
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
        .min(MAX_POLL_WAIT);

    state
        .store
        .claim_next_task(wait)
        .await
        .map(|task| Json(TaskResponse { task }))
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No tasks available".to_string()))
}

/// Worker push: record a task result.
async fn submit_task_result(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    let req: TaskResultRequest = decode_body(&body)?;
    state
        .store
        .record_task_result(req.id, req.result)
        .await
        .map_err(store_error)?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(Config::for_testing(0)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post(app: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();
        send(app, request).await
    }

    async fn calculate(app: &Router, expression: &str) -> (StatusCode, Value) {
        post(app, "/api/v1/calculate", json!({ "expression": expression }).to_string()).await
    }

    /// Act as a worker over HTTP until the queue is empty.
    async fn work_all(app: &Router) {
        loop {
            let (status, body) = get(app, "/internal/task").await;
            if status == StatusCode::NOT_FOUND {
                break;
            }
            assert_eq!(status, StatusCode::OK);
            let task: TaskResponse = serde_json::from_value(body).unwrap();
            let result = json!({ "id": task.task.id, "result": task.task.compute() });
            let (status, _) = post(app, "/internal/task", result.to_string()).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn calculate_returns_increasing_ids() {
        let app = app();
        let mut last = 0;
        for expression in ["2 + 3", "2 * 3 + 4 / 2", "(2 + 3) * 4", "7"] {
            let (status, body) = calculate(&app, expression).await;
            assert_eq!(status, StatusCode::CREATED);
            let id = body["id"].as_u64().unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn invalid_expression_is_rejected_without_record() {
        let app = app();
        for expression in ["2 + a", "", "(2 + 3", "2 +"] {
            let (status, _) = calculate(&app, expression).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{:?}", expression);
        }
        let (_, body) = get(&app, "/api/v1/expressions").await;
        assert_eq!(body["expressions"], json!([]));
    }

    #[tokio::test]
    async fn long_flat_sum_is_accepted() {
        let app = app();
        let sum = vec!["1"; 300].join("+");
        let (status, body) = calculate(&app, &sum).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_u64().unwrap();

        let (_, body) = get(&app, &format!("/api/v1/expressions/{}/tasks", id)).await;
        assert_eq!(body["tasks"].as_array().unwrap().len(), 299);

        let too_long = vec!["1"; calc::MAX_OPERATIONS + 2].join("+");
        let (status, _) = calculate(&app, &too_long).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn malformed_bodies_are_unprocessable() {
        let app = app();
        let (status, _) = post(&app, "/api/v1/calculate", "not json").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = post(&app, "/api/v1/calculate", json!({"expr": "1+1"}).to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = post(&app, "/internal/task", json!({"id": "one"}).to_string()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn expression_lookup_statuses() {
        let app = app();
        let (_, body) = calculate(&app, "2 + 3").await;
        let id = body["id"].as_u64().unwrap();

        let (status, body) = get(&app, &format!("/api/v1/expressions/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expression"]["status"], "pending");
        assert_eq!(body["expression"]["expression"], "2 + 3");
        assert!(body["expression"].get("result").is_none());

        let (status, _) = get(&app, "/api/v1/expressions/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&app, "/api/v1/expressions/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(&app, "/api/v1/expressions/abc/tasks").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn worker_protocol_completes_expressions() {
        let app = app();
        let (_, a) = calculate(&app, "2 * 3 + 4 / 2").await;
        let (_, b) = calculate(&app, "(2 + 3) * 4").await;
        let (_, c) = calculate(&app, "5 / (3 - 3)").await;

        let (_, body) = get(&app, &format!("/api/v1/expressions/{}/tasks", a["id"])).await;
        assert_eq!(body["tasks"].as_array().unwrap().len(), 3);

        work_all(&app).await;

        for (created, expected) in [(a, 8.0), (b, 20.0), (c, 0.0)] {
            let (_, body) = get(&app, &format!("/api/v1/expressions/{}", created["id"])).await;
            assert_eq!(body["expression"]["status"], "completed");
            assert_eq!(body["expression"]["result"].as_f64(), Some(expected));
        }

        let (_, body) = get(&app, "/api/v1/expressions").await;
        assert_eq!(body["expressions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn poll_marks_expression_computing() {
        let app = app();
        let (_, created) = calculate(&app, "1 + 1").await;

        let (status, body) = get(&app, "/internal/task").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["operation"], "+");
        assert_eq!(body["task"]["arg1"].as_f64(), Some(1.0));

        let (_, body) = get(&app, &format!("/api/v1/expressions/{}", created["id"])).await;
        assert_eq!(body["expression"]["status"], "computing");

        // The in-flight task is not handed out twice
        let (status, _) = get(&app, "/internal/task").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn task_result_errors() {
        let app = app();
        let (status, _) = post(&app, "/internal/task", json!({"id": 77, "result": 1.0}).to_string()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, created) = calculate(&app, "(1 + 2) * 3").await;
        let (_, body) = get(&app, &format!("/api/v1/expressions/{}", created["id"])).await;
        let root = body["expression"]["root_task_id"].clone();
        let (status, _) = post(&app, "/internal/task", json!({"id": root, "result": 9.0}).to_string()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn queue_full_is_service_unavailable() {
        let mut config = Config::for_testing(0);
        config.scheduler.queue_capacity = 1;
        let app = router(AppState::new(config));

        let (status, _) = calculate(&app, "1 + 1").await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = calculate(&app, "2 + 2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn long_poll_returns_not_found_after_wait() {
        let app = app();
        let started = std::time::Instant::now();
        let (status, _) = get(&app, "/internal/task?wait_ms=50").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn health_reports_queue_length() {
        let app = app();
        calculate(&app, "(1 + 2) * (3 + 4)").await;
        let (status, body) = get(&app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue_len"], 2);
    }

    #[tokio::test]
    async fn serves_dashboard_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>calc</html>").unwrap();
        let mut config = Config::for_testing(0);
        config.static_dir = dir.path().to_path_buf();
        let app = router(AppState::new(config));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"<html>calc</html>");
    }
}
