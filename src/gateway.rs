//! Caller-facing boundary of the pipeline.
//!
//! The gateway validates requests, resolves defaults, creates tasks and hands
//! them to the engine in the background. Everything it returns is a
//! [`TaskView`]; callers never see internal task snapshots.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backend::{BackendError, ValidationReport};
use crate::config::{ModelProvider, ModelRegistry, PipelineConfig};
use crate::pipeline::{EngineError, PipelineEngine, RetryBackoff};
use crate::task::{SharedTaskStore, Stage, StoreError, TaskId, TaskRequest, TaskView};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("{0}")]
    InvalidState(String),

    #[error("Submitted document failed validation with {} error(s)", .0.errors.len())]
    FeedbackRejected(ValidationReport),

    #[error("Back-end error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => GatewayError::NotFound(id),
            StoreError::Terminal(_)
            | StoreError::InvalidTransition { .. }
            | StoreError::VersionConflict { .. } => GatewayError::InvalidState(err.to_string()),
            StoreError::Internal(_) => GatewayError::Store(err),
        }
    }
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(e) => e.into(),
            EngineError::Backend(e) => GatewayError::Backend(e),
            EngineError::FeedbackRejected(report) => GatewayError::FeedbackRejected(report),
        }
    }
}

/// A generation request as received from a caller. Unset fields take the
/// configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i64>,
    #[serde(default)]
    pub use_augmentation: Option<bool>,
    #[serde(default)]
    pub retry_backoff: Option<RetryBackoff>,
}

impl SubmitRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Task counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    /// Automated phase still running.
    pub pending: usize,
    pub awaiting_review: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A selectable provider.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: ModelProvider,
    pub name: String,
    pub model: String,
}

pub struct TaskGateway {
    store: SharedTaskStore,
    engine: Arc<PipelineEngine>,
    defaults: PipelineConfig,
    models: ModelRegistry,
}

impl TaskGateway {
    pub fn new(
        store: SharedTaskStore,
        engine: Arc<PipelineEngine>,
        defaults: PipelineConfig,
        models: ModelRegistry,
    ) -> Self {
        Self {
            store,
            engine,
            defaults,
            models,
        }
    }

    fn resolve(&self, request: SubmitRequest) -> Result<TaskRequest, GatewayError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::InvalidRequest("prompt must not be empty".to_string()));
        }

        let provider = match request.provider.as_deref() {
            Some(selector) => selector
                .parse::<ModelProvider>()
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?,
            None => ModelProvider::default(),
        };
        if !self.models.contains(provider) {
            return Err(GatewayError::InvalidRequest(format!(
                "no model configured for provider {}",
                provider
            )));
        }

        let max_retries = match request.max_retries {
            None => self.defaults.max_retries,
            Some(n) if n < 0 => {
                return Err(GatewayError::InvalidRequest(
                    "max_retries must be zero or positive".to_string(),
                ))
            }
            Some(n) if n > i64::from(self.defaults.max_retries_limit) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "max_retries must be at most {}",
                    self.defaults.max_retries_limit
                )))
            }
            Some(n) => n as u32,
        };

        let retry_backoff = match request.retry_backoff {
            None => self.defaults.retry_backoff,
            Some(backoff) if backoff.longest_delay() > self.defaults.max_retry_delay() => {
                return Err(GatewayError::InvalidRequest(format!(
                    "retry_backoff delays must be at most {} ms",
                    self.defaults.max_retry_delay_ms
                )))
            }
            Some(backoff) => backoff,
        };

        Ok(TaskRequest {
            prompt: prompt.to_string(),
            provider,
            max_retries,
            use_augmentation: request
                .use_augmentation
                .unwrap_or(self.defaults.use_augmentation),
            retry_backoff,
        })
    }

    /// Validate and enqueue a request. Returns as soon as the task exists.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, GatewayError> {
        let request = self.resolve(request)?;
        let provider = request.provider;
        let task = self.store.create(request).await?;
        tracing::info!(task_id = %task.id, provider = %provider, "Accepted generation request");
        self.engine.spawn(task.id);
        Ok(task.id)
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskView, GatewayError> {
        Ok(self.store.get(id).await?.view())
    }

    /// Complete a task waiting for review with the reviewer's document.
    pub async fn submit_feedback(
        &self,
        id: TaskId,
        document: Value,
        note: Option<String>,
    ) -> Result<TaskView, GatewayError> {
        if document.is_null() {
            return Err(GatewayError::InvalidRequest("document is required".to_string()));
        }
        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        match self.engine.resume(id, document, note).await {
            Ok(task) => Ok(task.view()),
            Err(e) => {
                tracing::info!(task_id = %id, "Feedback refused: {}", e);
                Err(e.into())
            }
        }
    }

    /// Every task, most recent first.
    pub async fn list(&self) -> Result<Vec<TaskView>, GatewayError> {
        let tasks = self.store.list().await?;
        Ok(tasks.iter().map(|t| t.view()).collect())
    }

    pub async fn stats(&self) -> Result<TaskStats, GatewayError> {
        let tasks = self.store.list().await?;
        let mut stats = TaskStats {
            total: tasks.len(),
            ..TaskStats::default()
        };
        for task in &tasks {
            match task.stage {
                Stage::AwaitingHuman => stats.awaiting_review += 1,
                Stage::Completed => stats.completed += 1,
                Stage::Failed => stats.failed += 1,
                _ => stats.pending += 1,
            }
        }
        Ok(stats)
    }

    /// Retention hook: forget a task.
    pub async fn delete(&self, id: TaskId) -> Result<(), GatewayError> {
        self.store.delete(id).await?;
        Ok(())
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.models
            .iter()
            .map(|(provider, spec)| ModelInfo {
                id: provider,
                name: spec.display_name.clone(),
                model: spec.model_id.clone(),
            })
            .collect()
    }
}
