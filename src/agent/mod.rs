//! Worker agent: pulls tasks from the coordinator, computes them and reports
//! the results.
//!
//! ## Worker loop
//! 1. Poll the coordinator for a ready task
//! 2. Nothing available: pause `poll_interval` and poll again
//! 3. Compute the operation, then pause for the task's `operation_time`
//! 4. Report the result, retrying transient failures after `retry_backoff`
//!
//! A loop never exits on a failed request; it runs for the process lifetime.

pub mod client;
pub mod error;

pub use client::{Coordinator, HttpCoordinator};
pub use error::{TransportError, TransportErrorKind};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::task::TaskPayload;

/// Shared reference to a coordinator implementation.
pub type CoordinatorRef = Arc<dyn Coordinator>;

/// A pool of worker loops sharing one coordinator connection.
pub struct Agent {
    config: AgentConfig,
    coordinator: CoordinatorRef,
}

impl Agent {
    pub fn new(config: AgentConfig, coordinator: CoordinatorRef) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    /// Agent talking to the coordinator at `config.orchestrator_url`.
    pub fn from_config(config: AgentConfig) -> Self {
        let coordinator = Arc::new(HttpCoordinator::new(config.orchestrator_url.clone()));
        Self::new(config, coordinator)
    }

    /// Spawn `computing_power` worker loops.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.config.computing_power.max(1))
            .map(|worker| {
                let config = self.config.clone();
                let coordinator = Arc::clone(&self.coordinator);
                tokio::spawn(async move { worker_loop(worker, config, coordinator).await })
            })
            .collect()
    }

    /// Run the workers until the process is stopped.
    pub async fn run(&self) {
        futures::future::join_all(self.spawn_workers()).await;
    }
}

async fn worker_loop(worker: usize, config: AgentConfig, coordinator: CoordinatorRef) {
    tracing::info!("Worker {} started", worker);
    loop {
        match coordinator.fetch_task(config.poll_wait).await {
            Ok(Some(task)) => execute(worker, &config, coordinator.as_ref(), task).await,
            Ok(None) => tokio::time::sleep(config.poll_interval).await,
            Err(e) => {
                tracing::warn!("Worker {}: error getting task: {}", worker, e);
                tokio::time::sleep(config.retry_backoff).await;
            }
        }
    }
}

async fn execute(worker: usize, config: &AgentConfig, coordinator: &dyn Coordinator, task: TaskPayload) {
    let result = task.compute();
    tracing::debug!(
        "Worker {}: task {} = {} {} {} -> {}",
        worker,
        task.id,
        task.arg1,
        task.operation,
        task.arg2,
        result
    );
    tokio::time::sleep(Duration::from_millis(task.operation_time)).await;

    loop {
        match coordinator.submit_result(task.id, result).await {
            Ok(()) => return,
            Err(e) if e.is_transient() => {
                tracing::warn!("Worker {}: error sending result of task {}: {}", worker, task.id, e);
                tokio::time::sleep(config.retry_backoff).await;
            }
            Err(e) => {
                tracing::warn!(
                    "Worker {}: coordinator rejected result of task {}: {}",
                    worker,
                    task.id,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{router, AppState, ExpressionStatus, ExpressionStore, StoreError};
    use crate::calc::parse;
    use crate::config::Config;
    use crate::task::{ExpressionId, TaskId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-process coordinator backed directly by a store.
    struct LocalCoordinator {
        store: Arc<ExpressionStore>,
        fetch_failures: AtomicUsize,
        submit_failures: AtomicUsize,
        reject_submits: bool,
        submits: AtomicUsize,
    }

    impl LocalCoordinator {
        fn new(store: Arc<ExpressionStore>) -> Self {
            Self {
                store,
                fetch_failures: AtomicUsize::new(0),
                submit_failures: AtomicUsize::new(0),
                reject_submits: false,
                submits: AtomicUsize::new(0),
            }
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl Coordinator for LocalCoordinator {
        async fn fetch_task(&self, wait: Duration) -> Result<Option<TaskPayload>, TransportError> {
            if take_failure(&self.fetch_failures) {
                return Err(TransportError::network("connection refused".to_string()));
            }
            Ok(self.store.claim_next_task(wait).await)
        }

        async fn submit_result(&self, id: TaskId, result: f64) -> Result<(), TransportError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.reject_submits {
                return Err(TransportError::status(409, "conflict".to_string()));
            }
            if take_failure(&self.submit_failures) {
                return Err(TransportError::status(503, "unavailable".to_string()));
            }
            match self.store.record_task_result(id, result).await {
                Ok(()) => Ok(()),
                Err(StoreError::TaskNotFound(_)) => Err(TransportError::status(404, String::new())),
                Err(e) => Err(TransportError::status(409, e.to_string())),
            }
        }
    }

    fn test_config() -> Config {
        let mut config = Config::for_testing(5);
        config.agent.computing_power = 3;
        config
    }

    async fn submit(store: &ExpressionStore, source: &str) -> ExpressionId {
        store.create_expression(source, &parse(source).unwrap()).await.unwrap()
    }

    async fn wait_for_completion(store: &ExpressionStore, id: ExpressionId) -> f64 {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let expression = store.get_expression(id).await.unwrap();
                if expression.status == ExpressionStatus::Completed {
                    return expression.result.unwrap();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expression did not complete in time")
    }

    fn abort_all(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn workers_evaluate_expressions() {
        let config = test_config();
        let state = AppState::new(config.clone());
        let coordinator = Arc::new(LocalCoordinator::new(Arc::clone(&state.store)));
        let agent = Agent::new(config.agent.clone(), coordinator);
        let handles = agent.spawn_workers();
        assert_eq!(handles.len(), 3);

        let cases = [
            ("2 + 3", 5.0),
            ("2 * 3 + 4 / 2", 8.0),
            ("(2 + 3) * 4", 20.0),
            ("7 / 0", 0.0),
            ("-(1 + 2) * (3 - 10) / 7", 3.0),
        ];
        let mut ids = Vec::new();
        for (source, expected) in cases {
            ids.push((submit(&state.store, source).await, expected));
        }
        for (id, expected) in ids {
            assert_eq!(wait_for_completion(&state.store, id).await, expected);
        }
        abort_all(handles);
    }

    #[tokio::test]
    async fn transport_failures_are_retried() {
        let config = test_config();
        let state = AppState::new(config.clone());
        let coordinator = Arc::new(LocalCoordinator::new(Arc::clone(&state.store)));
        coordinator.fetch_failures.store(3, Ordering::SeqCst);
        coordinator.submit_failures.store(2, Ordering::SeqCst);

        let agent = Agent::new(config.agent.clone(), coordinator.clone());
        let handles = agent.spawn_workers();

        let id = submit(&state.store, "(1 + 2) * (3 + 4)").await;
        assert_eq!(wait_for_completion(&state.store, id).await, 21.0);
        // Three tasks plus the two retried submissions
        assert_eq!(coordinator.submits.load(Ordering::SeqCst), 5);
        abort_all(handles);
    }

    #[tokio::test]
    async fn rejected_result_is_not_retried() {
        let mut config = test_config();
        config.agent.computing_power = 1;
        let state = AppState::new(config.clone());
        let mut coordinator = LocalCoordinator::new(Arc::clone(&state.store));
        coordinator.reject_submits = true;
        let coordinator = Arc::new(coordinator);

        let agent = Agent::new(config.agent.clone(), coordinator.clone());
        let handles = agent.spawn_workers();

        let id = submit(&state.store, "1 + 1").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(coordinator.submits.load(Ordering::SeqCst), 1);
        assert_eq!(
            state.store.get_expression(id).await.unwrap().status,
            ExpressionStatus::Computing
        );
        abort_all(handles);
    }

    #[tokio::test]
    async fn end_to_end_over_http() {
        let mut config = test_config();
        config.agent.poll_wait = Duration::from_millis(200);
        let state = AppState::new(config.clone());
        Arc::clone(&state.store).start_lease_sweeper();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let app = router(Arc::clone(&state));
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        config.agent.orchestrator_url = base_url.clone();
        let agent = Agent::from_config(config.agent.clone());
        let handles = agent.spawn_workers();

        let client = reqwest::Client::new();
        let mut ids = Vec::new();
        for (source, expected) in [("2 * 3 + 4 / 2", 8.0), ("((1.5 + 2.5) * 3 - 2) / 5", 2.0)] {
            let resp = client
                .post(format!("{}/api/v1/calculate", base_url))
                .json(&serde_json::json!({ "expression": source }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
            let body: serde_json::Value = resp.json().await.unwrap();
            ids.push((body["id"].as_u64().unwrap(), expected));
        }

        for (id, expected) in ids {
            let result = tokio::time::timeout(Duration::from_secs(10), async {
                loop {
                    let body: serde_json::Value = client
                        .get(format!("{}/api/v1/expressions/{}", base_url, id))
                        .send()
                        .await
                        .unwrap()
                        .json()
                        .await
                        .unwrap();
                    if body["expression"]["status"] == "completed" {
                        return body["expression"]["result"].as_f64().unwrap();
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await
            .expect("expression did not complete in time");
            assert_eq!(result, expected);
        }

        abort_all(handles);
        server.abort();
    }

    #[tokio::test]
    async fn http_client_reports_unreachable_coordinator_as_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let coordinator = HttpCoordinator::new(format!("http://{}/", addr));
        assert_eq!(coordinator.base_url(), format!("http://{}", addr));
        let err = coordinator.fetch_task(Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Network);
        assert!(err.is_transient());
    }
}
