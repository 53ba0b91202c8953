//! Pluggable back-ends of the generation pipeline.
//!
//! The engine only sees the four capability traits below. Concrete
//! implementations live in the submodules:
//!
//! - [`SchemaValidator`] checks documents against the Grafana dashboard schema
//! - [`LlmGenerator`] and [`LlmCorrector`] talk to a chat-completion model
//! - [`KeywordAugmenter`] retrieves prompt context from a built-in knowledge base
//!
//! Back-end failures ([`BackendError`]) are infrastructure problems and are
//! kept apart from "the document is invalid", which is a normal
//! [`ValidationReport`].

mod augmenter;
mod corrector;
mod generator;
mod schema;
mod validator;

#[cfg(test)]
pub(crate) mod fakes;

pub use augmenter::KeywordAugmenter;
pub use corrector::{error_patterns, LlmCorrector};
pub use generator::{extract_json, LlmGenerator};
pub use schema::{grafana_dashboard_schema, PANEL_TYPES};
pub use validator::SchemaValidator;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{ModelProvider, ModelRegistry};
use crate::llm::{LlmClient, LlmError, LlmErrorKind};

// ─────────────────────────────────────────────────────────────────────────────
// Data exchanged with back-ends
// ─────────────────────────────────────────────────────────────────────────────

/// One structural problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer into the document, or `root`.
    pub location: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// A named block of retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub name: String,
    pub content: Value,
}

/// Supplemental context fetched once per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AugmentedContext {
    pub sections: Vec<ContextSection>,
}

impl AugmentedContext {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, content: Value) {
        let name = name.into();
        if let Some(existing) = self.sections.iter_mut().find(|s| s.name == name) {
            existing.content = content;
        } else {
            self.sections.push(ContextSection { name, content });
        }
    }

    /// Markdown rendering used inside prompts.
    pub fn format_for_prompt(&self) -> String {
        if self.is_empty() {
            return "No additional context available.".to_string();
        }

        let mut lines = Vec::new();
        for section in &self.sections {
            lines.push(format!("## {}", title_case(&section.name)));
            match &section.content {
                Value::Object(entries) => {
                    for (key, value) in entries {
                        match value {
                            Value::Object(inner) => {
                                lines.push(format!("\n### {}", title_case(key)));
                                for (k, v) in inner {
                                    lines.push(format!("- {}: {}", title_case(k), render_scalar(v)));
                                }
                            }
                            other => {
                                lines.push(format!("- {}: {}", title_case(key), render_scalar(other)))
                            }
                        }
                    }
                }
                other => lines.push(render_scalar(other)),
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

fn title_case(key: &str) -> String {
    key.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_scalar).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Input of a generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub provider: ModelProvider,
    pub context: Option<AugmentedContext>,
}

/// Input of a correction attempt.
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub document: Value,
    pub errors: Vec<ValidationIssue>,
    pub provider: ModelProvider,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Infrastructure failure of a back-end call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("{backend} timed out after {}ms", after.as_millis())]
    Timeout {
        backend: &'static str,
        after: Duration,
    },

    #[error("Back-end unavailable: {0}")]
    Unavailable(String),

    #[error("Back-end returned unusable output: {0}")]
    InvalidOutput(String),

    #[error("Back-end misconfigured: {0}")]
    Misconfigured(String),
}

impl BackendError {
    /// Whether another attempt can succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Misconfigured(_))
    }
}

impl From<LlmError> for BackendError {
    fn from(err: LlmError) -> Self {
        match err.kind {
            LlmErrorKind::ClientError => BackendError::Misconfigured(err.to_string()),
            LlmErrorKind::Parse => BackendError::InvalidOutput(err.to_string()),
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::Network => {
                BackendError::Unavailable(err.to_string())
            }
        }
    }
}

/// Run a back-end call, turning an elapsed deadline into [`BackendError::Timeout`].
pub async fn with_timeout<T, F>(backend: &'static str, limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            backend,
            after: limit,
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Produces a candidate document from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError>;
}

/// Checks a document against structural constraints.
#[async_trait]
pub trait Validator: Send + Sync {
    /// `Ok` with an invalid report means the document is wrong, `Err` means
    /// the check itself could not run.
    async fn validate(&self, document: &Value) -> Result<ValidationReport, BackendError>;
}

/// Revises a document given its validation errors.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, request: &CorrectionRequest) -> Result<Value, BackendError>;
}

/// Fetches supplemental context for a prompt.
#[async_trait]
pub trait ContextAugmenter: Send + Sync {
    async fn augment(&self, prompt: &str) -> Result<AugmentedContext, BackendError>;
}

/// The back-end set used by one engine.
#[derive(Clone)]
pub struct Backends {
    pub generator: Arc<dyn Generator>,
    pub validator: Arc<dyn Validator>,
    pub corrector: Arc<dyn Corrector>,
    pub augmenter: Arc<dyn ContextAugmenter>,
}

impl Backends {
    /// Production wiring: LLM generation and correction, schema validation,
    /// keyword augmentation.
    pub fn llm(client: Arc<dyn LlmClient>, models: ModelRegistry) -> Result<Self, BackendError> {
        Ok(Self {
            generator: Arc::new(LlmGenerator::new(Arc::clone(&client), models.clone())),
            validator: Arc::new(SchemaValidator::grafana()?),
            corrector: Arc::new(LlmCorrector::new(client, models)),
            augmenter: Arc::new(KeywordAugmenter::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_formatting() {
        let mut context = AugmentedContext::default();
        context.push(
            "metrics_examples",
            json!({"cpu_usage": "rate(node_cpu_seconds_total[5m])"}),
        );
        context.push(
            "general_dashboard_examples",
            json!({"system_monitoring": {"description": "Host metrics", "panels": ["CPU Usage", "Memory Usage"]}}),
        );

        let text = context.format_for_prompt();
        assert!(text.contains("## Metrics Examples"));
        assert!(text.contains("- Cpu Usage: rate(node_cpu_seconds_total[5m])"));
        assert!(text.contains("### System Monitoring"));
        assert!(text.contains("- Panels: CPU Usage, Memory Usage"));
    }

    #[test]
    fn test_empty_context_formatting() {
        assert_eq!(
            AugmentedContext::default().format_for_prompt(),
            "No additional context available."
        );
    }

    #[test]
    fn test_llm_error_mapping() {
        let err: BackendError = LlmError::client_error(401, "bad key".to_string()).into();
        assert!(!err.is_retryable());

        let err: BackendError = LlmError::server_error(502, "bad gateway".to_string()).into();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(err.is_retryable());

        let err: BackendError = LlmError::parse_error("truncated".to_string()).into();
        assert!(matches!(err, BackendError::InvalidOutput(_)));
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<(), BackendError> = with_timeout("generator", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(BackendError::Timeout {
                backend: "generator",
                ..
            })
        ));
    }
}
