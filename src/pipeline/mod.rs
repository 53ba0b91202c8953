//! Generation pipeline state machine.
//!
//! Each task walks the stages below, one transition function per stage:
//!
//! ```text
//! Queued -> [Augmenting] -> Generating -> Validating -> Completed
//!                              ^  |           |   ^
//!                              +--+           v   |
//!                                           Fixing
//!                 (budget spent) -> AwaitingHuman -> Completed (feedback)
//! ```
//!
//! A transition reads a task snapshot, calls at most one back-end, and
//! returns the next snapshot. The engine commits it with
//! [`compare_and_swap`], so a concurrent writer (feedback, retention) wins
//! and the engine simply reloads. `AwaitingHuman` and the terminal stages
//! end the run; only [`PipelineEngine::resume`] moves a task on from
//! `AwaitingHuman`.

mod backoff;

pub use backoff::RetryBackoff;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::backend::{
    with_timeout, AugmentedContext, BackendError, Backends, CorrectionRequest, GenerationRequest,
    ValidationIssue, ValidationReport,
};
use crate::config::PipelineConfig;
use crate::task::{compare_and_swap, SharedTaskStore, Stage, StoreError, Task, TaskId};

/// What to do with a document submitted by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPolicy {
    /// Accept it as authoritative.
    #[default]
    Trust,
    /// Run the validator first and refuse invalid documents.
    Revalidate,
}

/// Engine knobs that are not part of a task's request.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub backend_timeout: Duration,
    pub feedback_policy: FeedbackPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(120),
            feedback_policy: FeedbackPolicy::Trust,
        }
    }
}

impl From<&PipelineConfig> for EngineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            backend_timeout: config.backend_timeout(),
            feedback_policy: config.feedback_policy,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Submitted document failed validation with {} error(s)", .0.errors.len())]
    FeedbackRejected(ValidationReport),
}

/// Drives tasks through the pipeline.
pub struct PipelineEngine {
    store: SharedTaskStore,
    backends: Backends,
    options: EngineOptions,
}

impl PipelineEngine {
    pub fn new(store: SharedTaskStore, backends: Backends, options: EngineOptions) -> Self {
        Self {
            store,
            backends,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Start the automated phase of `id` in the background.
    pub fn spawn(self: &Arc<Self>, id: TaskId) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.drive(id).await })
    }

    /// Run `id` until it rests, marking it failed if the run panics.
    pub async fn drive(&self, id: TaskId) {
        if let Err(panic) = AssertUnwindSafe(self.run(id)).catch_unwind().await {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(task_id = %id, "Pipeline panicked: {}", reason);
            self.mark_failed(id, format!("Internal error: pipeline panicked ({})", reason))
                .await;
        }
    }

    /// Run `id` until it reaches `AwaitingHuman` or a terminal stage.
    pub async fn run(&self, id: TaskId) {
        let mut task = match self.store.get(id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %id, "Cannot start pipeline: {}", e);
                return;
            }
        };

        loop {
            let Some(next) = self.transition(&task).await else {
                tracing::debug!(task_id = %id, stage = %task.stage, "Pipeline at rest");
                return;
            };

            match self.store.update(id, compare_and_swap(next)).await {
                Ok(committed) => {
                    if committed.stage != task.stage {
                        tracing::info!(
                            task_id = %id,
                            from = %task.stage,
                            to = %committed.stage,
                            retry_count = committed.retry_count,
                            "Task advanced"
                        );
                    }
                    task = committed;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(task_id = %id, "Task changed underneath the pipeline, reloading");
                    task = match self.store.get(id).await {
                        Ok(task) => task,
                        Err(e) => {
                            tracing::warn!(task_id = %id, "Task vanished: {}", e);
                            return;
                        }
                    };
                }
                Err(e @ (StoreError::Terminal(_) | StoreError::NotFound(_))) => {
                    tracing::info!(task_id = %id, "Pipeline stopped: {}", e);
                    return;
                }
                Err(e) => {
                    tracing::error!(task_id = %id, "Store rejected transition: {}", e);
                    self.mark_failed(id, format!("Internal error: {}", e)).await;
                    return;
                }
            }
        }
    }

    /// Next snapshot for `task`, or `None` when the engine has nothing to do.
    async fn transition(&self, task: &Task) -> Option<Task> {
        match task.stage {
            Stage::Queued => Some(self.on_queued(task)),
            Stage::Augmenting => Some(self.on_augmenting(task).await),
            Stage::Generating => Some(self.on_generating(task).await),
            Stage::Validating => Some(self.on_validating(task).await),
            Stage::Fixing => Some(self.on_fixing(task).await),
            Stage::AwaitingHuman | Stage::Completed | Stage::Failed => None,
        }
    }

    fn on_queued(&self, task: &Task) -> Task {
        if task.request.use_augmentation {
            task.advance(Stage::Augmenting)
        } else {
            task.advance(Stage::Generating)
        }
    }

    async fn on_augmenting(&self, task: &Task) -> Task {
        let call = self.backends.augmenter.augment(&task.request.prompt);
        let context = match with_timeout("augmenter", self.options.backend_timeout, call).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(task_id = %task.id, "Augmentation failed, continuing without context: {}", e);
                AugmentedContext::default()
            }
        };

        let mut next = task.advance(Stage::Generating);
        next.context = Some(context);
        next
    }

    async fn on_generating(&self, task: &Task) -> Task {
        self.pause_before_retry(task, task.retry_count).await;

        let request = GenerationRequest {
            prompt: task.request.prompt.clone(),
            provider: task.request.provider,
            context: task.context.clone(),
        };
        let call = self.backends.generator.generate(&request);
        match with_timeout("generator", self.options.backend_timeout, call).await {
            Ok(document) => {
                let mut next = task.advance(Stage::Validating);
                next.document = Some(document);
                next
            }
            Err(e) => self.absorb_failure(task, Stage::Generating, e),
        }
    }

    async fn on_validating(&self, task: &Task) -> Task {
        let Some(document) = task.document.as_ref() else {
            let report = ValidationReport::invalid(vec![ValidationIssue::new(
                "root",
                "no document to validate",
            )]);
            return self.after_validation(task, report);
        };

        let call = self.backends.validator.validate(document);
        match with_timeout("validator", self.options.backend_timeout, call).await {
            Ok(report) => self.after_validation(task, report),
            Err(e) => {
                // Any earlier report describes the document before the last fix.
                let mut next = self.absorb_failure(task, Stage::Validating, e);
                next.validation = None;
                next
            }
        }
    }

    fn after_validation(&self, task: &Task, report: ValidationReport) -> Task {
        let next_stage = if report.valid {
            Stage::Completed
        } else if task.has_retries_left() {
            Stage::Fixing
        } else {
            tracing::warn!(
                task_id = %task.id,
                errors = report.errors.len(),
                "Retry budget spent, waiting for review"
            );
            Stage::AwaitingHuman
        };

        let mut next = task.advance(next_stage);
        next.validation = Some(report);
        next
    }

    async fn on_fixing(&self, task: &Task) -> Task {
        if !task.has_retries_left() {
            return task.advance(Stage::AwaitingHuman);
        }

        let attempt = task.retry_count + 1;
        self.pause_before_retry(task, attempt).await;

        let request = CorrectionRequest {
            document: task.document.clone().unwrap_or(Value::Null),
            errors: task
                .validation
                .as_ref()
                .map(|v| v.errors.clone())
                .unwrap_or_default(),
            provider: task.request.provider,
        };
        let call = self.backends.corrector.correct(&request);
        match with_timeout("corrector", self.options.backend_timeout, call).await {
            Ok(document) => {
                let mut next = task.advance(Stage::Validating);
                next.retry_count = attempt;
                next.document = Some(document);
                next
            }
            Err(e) => {
                let mut charged = task.clone();
                charged.retry_count = attempt;
                if !e.is_retryable() {
                    return self.failed(&charged, &e);
                }
                tracing::warn!(task_id = %task.id, attempt, "Correction failed: {}", e);
                let stage = if charged.has_retries_left() {
                    Stage::Fixing
                } else {
                    Stage::AwaitingHuman
                };
                let mut next = charged.advance(stage);
                next.last_backend_error = Some(e.to_string());
                next
            }
        }
    }

    /// Charge an infrastructure failure against the retry budget.
    fn absorb_failure(&self, task: &Task, retry_stage: Stage, error: BackendError) -> Task {
        if !error.is_retryable() {
            return self.failed(task, &error);
        }

        if task.has_retries_left() {
            tracing::warn!(
                task_id = %task.id,
                stage = %task.stage,
                attempt = task.retry_count + 1,
                "Back-end failure, retrying: {}",
                error
            );
            let mut next = task.advance(retry_stage);
            next.retry_count += 1;
            next.last_backend_error = Some(error.to_string());
            next
        } else {
            tracing::warn!(
                task_id = %task.id,
                stage = %task.stage,
                "Back-end failure with no retries left, waiting for review: {}",
                error
            );
            let mut next = task.advance(Stage::AwaitingHuman);
            next.last_backend_error = Some(error.to_string());
            next
        }
    }

    fn failed(&self, task: &Task, error: &BackendError) -> Task {
        tracing::error!(task_id = %task.id, stage = %task.stage, "Task failed: {}", error);
        let mut next = task.advance(Stage::Failed);
        next.error = Some(error.to_string());
        next
    }

    async fn pause_before_retry(&self, task: &Task, attempt: u32) {
        let delay = task.request.retry_backoff.delay_for(attempt);
        if !delay.is_zero() {
            tracing::debug!(task_id = %task.id, attempt, "Waiting {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Force a non-terminal task into `Failed`.
    async fn mark_failed(&self, id: TaskId, reason: String) {
        let result = self
            .store
            .update(
                id,
                Box::new(move |current: &Task| -> Result<Task, StoreError> {
                    let mut next = current.advance(Stage::Failed);
                    next.error = Some(reason);
                    Ok(next)
                }),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(task_id = %id, "Could not mark task failed: {}", e);
        }
    }

    /// Finish a task waiting for review with a reviewer's document.
    pub async fn resume(
        &self,
        id: TaskId,
        document: Value,
        note: Option<String>,
    ) -> Result<Task, EngineError> {
        let current = self.store.get(id).await?;
        ensure_awaiting_human(&current)?;

        let report = match self.options.feedback_policy {
            FeedbackPolicy::Trust => None,
            FeedbackPolicy::Revalidate => {
                let call = self.backends.validator.validate(&document);
                let report = with_timeout("validator", self.options.backend_timeout, call).await?;
                if !report.valid {
                    tracing::info!(
                        task_id = %id,
                        errors = report.errors.len(),
                        "Rejected reviewer document"
                    );
                    return Err(EngineError::FeedbackRejected(report));
                }
                Some(report)
            }
        };

        let task = self
            .store
            .update(
                id,
                Box::new(move |current: &Task| -> Result<Task, StoreError> {
                    ensure_awaiting_human(current)?;
                    let mut next = current.advance(Stage::Completed);
                    next.document = Some(document);
                    next.human_note = note;
                    next.human_reviewed = true;
                    if report.is_some() {
                        next.validation = report;
                    }
                    Ok(next)
                }),
            )
            .await?;

        tracing::info!(task_id = %id, "Task completed by reviewer");
        Ok(task)
    }
}

fn ensure_awaiting_human(task: &Task) -> Result<(), StoreError> {
    if task.is_terminal() {
        return Err(StoreError::Terminal(task.id));
    }
    if task.stage != Stage::AwaitingHuman {
        return Err(StoreError::InvalidTransition {
            id: task.id,
            actual: task.stage,
            expected: Stage::AwaitingHuman,
        });
    }
    Ok(())
}
