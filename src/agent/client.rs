//! Coordinator client used by worker loops.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::error::TransportError;
use crate::api::{TaskResponse, TaskResultRequest};
use crate::task::{TaskId, TaskPayload};
use crate::util::normalize_base_url;

/// Per-request timeout on top of any long-poll wait.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The pull/push endpoint a worker talks to.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Ask for a ready task. `Ok(None)` means none is available.
    async fn fetch_task(&self, wait: Duration) -> Result<Option<TaskPayload>, TransportError>;

    /// Report the result of a task.
    async fn submit_result(&self, id: TaskId, result: f64) -> Result<(), TransportError>;
}

/// Coordinator reached over HTTP.
#[derive(Clone)]
pub struct HttpCoordinator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn fetch_task(&self, wait: Duration) -> Result<Option<TaskPayload>, TransportError> {
        let mut url = format!("{}/internal/task", self.base_url);
        if !wait.is_zero() {
            url.push_str(&format!("?wait_ms={}", wait.as_millis()));
        }

        let resp = self
            .client
            .get(&url)
            .timeout(wait + REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::status(status.as_u16(), text));
        }

        let body: TaskResponse = resp.json().await?;
        Ok(Some(body.task))
    }

    async fn submit_result(&self, id: TaskId, result: f64) -> Result<(), TransportError> {
        let url = format!("{}/internal/task", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&TaskResultRequest { id, result })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::status(status.as_u16(), text));
        }
        Ok(())
    }
}
