//! Task types and the read-only view handed to callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{AugmentedContext, ValidationIssue, ValidationReport};
use crate::config::ModelProvider;
use crate::pipeline::RetryBackoff;

/// Opaque task identifier. Random v4, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The request a task was created from. Immutable after creation; all
/// defaults are already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    pub provider: ModelProvider,
    pub max_retries: u32,
    pub use_augmentation: bool,
    pub retry_backoff: RetryBackoff,
}

/// Status exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Internal pipeline stage of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Created, engine not yet started.
    Queued,
    Augmenting,
    Generating,
    Validating,
    Fixing,
    /// Automation gave up; waiting for a reviewer's document.
    AwaitingHuman,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    pub fn status(self) -> TaskStatus {
        match self {
            Stage::Completed => TaskStatus::Completed,
            Stage::Failed => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Augmenting => "augmenting",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Fixing => "fixing",
            Self::AwaitingHuman => "awaiting_human",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One recorded stage change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// A dashboard generation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub request: TaskRequest,
    pub stage: Stage,
    /// Current best candidate document.
    pub document: Option<serde_json::Value>,
    /// Outcome of the most recent validation.
    pub validation: Option<ValidationReport>,
    /// Context fetched once by the augmenter, reused by every retry.
    pub context: Option<AugmentedContext>,
    /// Automated retry attempts consumed; never exceeds `request.max_retries`.
    pub retry_count: u32,
    /// Terminal failure description. Set only in `Stage::Failed`.
    pub error: Option<String>,
    /// Most recent infrastructure failure absorbed by the retry loop.
    pub last_backend_error: Option<String>,
    /// Free-text note attached to an accepted review.
    pub human_note: Option<String>,
    /// The current document was supplied by a reviewer.
    pub human_reviewed: bool,
    /// Bumped by the store on every applied mutation.
    pub version: u64,
    pub history: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, request: TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            request,
            stage: Stage::Queued,
            document: None,
            validation: None,
            context: None,
            retry_count: 0,
            error: None,
            last_backend_error: None,
            human_note: None,
            human_reviewed: false,
            version: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.stage.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn requires_human_intervention(&self) -> bool {
        self.stage == Stage::AwaitingHuman
    }

    /// Whether another automated attempt fits in the retry budget.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.request.max_retries
    }

    /// Copy of this snapshot moved to `to`, with the move recorded.
    pub fn advance(&self, to: Stage) -> Task {
        let mut next = self.clone();
        if self.stage != to {
            next.history.push(Transition {
                from: self.stage,
                to,
                at: Utc::now(),
            });
        }
        next.stage = to;
        next
    }

    /// Number of recorded moves from `from` to `to`.
    pub fn transitions_between(&self, from: Stage, to: Stage) -> usize {
        self.history
            .iter()
            .filter(|t| t.from == from && t.to == to)
            .count()
    }

    /// Number of recorded entries into `stage`.
    pub fn entries_into(&self, stage: Stage) -> usize {
        self.history.iter().filter(|t| t.to == stage).count()
    }

    pub fn view(&self) -> TaskView {
        let validation_passed = if self.human_reviewed {
            Some(true)
        } else {
            self.validation.as_ref().map(|v| v.valid)
        };
        let validation_errors = match (&self.validation, self.human_reviewed) {
            (Some(report), false) if !report.valid => report.errors.clone(),
            _ => Vec::new(),
        };

        TaskView {
            task_id: self.id,
            status: self.status(),
            stage: self.stage,
            document: self.document.clone(),
            validation_passed,
            requires_human_intervention: self.requires_human_intervention(),
            retry_count: self.retry_count,
            max_retries: self.request.max_retries,
            error_message: self.error.clone(),
            last_error: self.last_backend_error.clone(),
            validation_errors,
            human_note: self.human_note.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only snapshot of a task as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
    pub requires_human_intervention: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(max_retries: u32) -> TaskRequest {
        TaskRequest {
            prompt: "cpu usage".to_string(),
            provider: ModelProvider::Gpt4o,
            max_retries,
            use_augmentation: false,
            retry_backoff: RetryBackoff::None,
        }
    }

    #[test]
    fn test_status_is_derived_from_stage() {
        let task = Task::new(TaskId::new(), request(3));
        assert_eq!(task.status(), TaskStatus::Pending);

        let waiting = task.advance(Stage::AwaitingHuman);
        assert_eq!(waiting.status(), TaskStatus::Pending);
        assert!(waiting.requires_human_intervention());

        let failed = task.advance(Stage::Failed);
        assert_eq!(failed.status(), TaskStatus::Failed);
        assert!(!failed.requires_human_intervention());
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_advance_records_history_without_self_loops() {
        let task = Task::new(TaskId::new(), request(1));
        let next = task.advance(Stage::Generating).advance(Stage::Generating);
        assert_eq!(next.history.len(), 1);
        assert_eq!(next.transitions_between(Stage::Queued, Stage::Generating), 1);
        assert!(task.history.is_empty());
    }

    #[test]
    fn test_view_surfaces_errors_only_while_invalid() {
        let mut task = Task::new(TaskId::new(), request(0)).advance(Stage::AwaitingHuman);
        task.validation = Some(ValidationReport::invalid(vec![ValidationIssue::new(
            "root",
            "\"title\" is a required property",
        )]));
        let view = task.view();
        assert_eq!(view.validation_passed, Some(false));
        assert_eq!(view.validation_errors.len(), 1);

        task.human_reviewed = true;
        let view = task.view();
        assert_eq!(view.validation_passed, Some(true));
        assert!(view.validation_errors.is_empty());
    }

    #[test]
    fn test_task_id_round_trips_through_str() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }
}
