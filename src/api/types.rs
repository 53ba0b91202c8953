//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::{ModelInfo, SubmitRequest};
use crate::pipeline::RetryBackoff;
use crate::task::{TaskId, TaskStatus};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of `POST /api/dashboards/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateDashboardRequest {
    /// Missing means empty, which the gateway rejects.
    #[serde(default)]
    pub prompt: String,

    /// Provider selector, e.g. "gpt-4o".
    #[serde(default, alias = "model_provider")]
    pub provider: Option<String>,

    #[serde(default)]
    pub max_retries: Option<i64>,

    #[serde(default, alias = "use_rag")]
    pub use_augmentation: Option<bool>,

    #[serde(default)]
    pub retry_backoff: Option<RetryBackoff>,
}

impl From<GenerateDashboardRequest> for SubmitRequest {
    fn from(req: GenerateDashboardRequest) -> Self {
        SubmitRequest {
            prompt: req.prompt,
            provider: req.provider,
            max_retries: req.max_retries,
            use_augmentation: req.use_augmentation,
            retry_backoff: req.retry_backoff,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateDashboardResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Body of `POST /api/tasks/:id/feedback`.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Missing means null, which the gateway rejects.
    #[serde(default, alias = "corrected_json")]
    pub document: Value,

    #[serde(default, alias = "feedback")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}
