//! LLM-backed dashboard corrector.

use std::sync::Arc;

use async_trait::async_trait;

use super::generator::complete_json;
use super::{BackendError, CorrectionRequest, Corrector, ValidationIssue};
use crate::config::ModelRegistry;
use crate::llm::{ChatMessage, LlmClient};

const FIX_SYSTEM_PROMPT: &str = "You are an expert in fixing Grafana dashboard JSON configurations.
You will be given a JSON configuration that has validation errors, along with error descriptions.

Your task is to fix these errors and return the corrected JSON configuration.

IMPORTANT:
1. Fix all validation errors
2. Only output the fixed JSON with no additional text or explanation
3. Ensure all required fields are present and have the correct types
4. Maintain as much of the original structure and intent as possible

Example of a valid panel structure:
{
  \"id\": 1,
  \"type\": \"graph\",
  \"title\": \"Panel Title\",
  \"gridPos\": {\"h\": 8, \"w\": 12, \"x\": 0, \"y\": 0}
}
";

/// First double-quoted fragment of a validator message.
fn quoted(message: &str) -> Option<&str> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    Some(&message[start..start + len])
}

/// Rewrite validator messages into short fix instructions.
pub fn error_patterns(errors: &[ValidationIssue]) -> Vec<String> {
    errors
        .iter()
        .map(|error| {
            let at = &error.location;
            let message = &error.message;
            if message.contains("is a required property") {
                match quoted(message) {
                    Some(property) => {
                        format!("Missing required property '{}' at path '{}'", property, at)
                    }
                    None => format!("Missing required property at path '{}': {}", at, message),
                }
            } else if let Some((_, expected)) = message.split_once("is not of type ") {
                format!(
                    "Type error at '{}': expected {}",
                    at,
                    expected.trim().trim_matches('"')
                )
            } else if message.contains("is not valid under any of the given schemas") {
                format!("Invalid value at '{}': doesn't match any valid schema", at)
            } else if let Some((_, allowed)) = message.split_once("is not one of ") {
                format!("Invalid value at '{}': must be one of {}", at, allowed.trim())
            } else {
                format!("Validation error at '{}': {}", at, message)
            }
        })
        .collect()
}

/// Repairs invalid dashboards with a chat-completion model.
pub struct LlmCorrector {
    client: Arc<dyn LlmClient>,
    models: ModelRegistry,
}

impl LlmCorrector {
    pub fn new(client: Arc<dyn LlmClient>, models: ModelRegistry) -> Self {
        Self { client, models }
    }

    fn messages(&self, request: &CorrectionRequest) -> Result<Vec<ChatMessage>, BackendError> {
        let document = serde_json::to_string_pretty(&request.document)
            .map_err(|e| BackendError::InvalidOutput(format!("cannot serialize document: {}", e)))?;
        let patterns = error_patterns(&request.errors).join("\n");
        let user = format!(
            "Here's a Grafana dashboard JSON with validation errors:\n\n{}\n\n\
             The following errors were found:\n{}\n\n\
             Please provide the fixed JSON that resolves these errors.\n",
            document, patterns
        );
        Ok(vec![ChatMessage::system(FIX_SYSTEM_PROMPT), ChatMessage::user(user)])
    }
}

#[async_trait]
impl Corrector for LlmCorrector {
    async fn correct(&self, request: &CorrectionRequest) -> Result<serde_json::Value, BackendError> {
        tracing::info!(
            provider = %request.provider,
            errors = request.errors.len(),
            "Correcting dashboard"
        );
        let messages = self.messages(request)?;
        complete_json(self.client.as_ref(), &self.models, request.provider, &messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fakes::ScriptedLlm;
    use crate::config::ModelProvider;
    use crate::llm::LlmError;
    use serde_json::json;

    #[test]
    fn test_error_patterns() {
        let patterns = error_patterns(&[
            ValidationIssue::new("root", "\"title\" is a required property"),
            ValidationIssue::new("/panels/0/id", "\"one\" is not of type \"integer\""),
            ValidationIssue::new("/panels/0/datasource", "42 is not valid under any of the given schemas"),
            ValidationIssue::new("/panels/1/type", "\"sparkline\" is not one of [\"graph\",\"stat\"]"),
            ValidationIssue::new("/time", "Additional properties are not allowed"),
        ]);
        assert_eq!(patterns[0], "Missing required property 'title' at path 'root'");
        assert_eq!(patterns[1], "Type error at '/panels/0/id': expected integer");
        assert_eq!(
            patterns[2],
            "Invalid value at '/panels/0/datasource': doesn't match any valid schema"
        );
        assert!(patterns[3].starts_with("Invalid value at '/panels/1/type': must be one of"));
        assert_eq!(
            patterns[4],
            "Validation error at '/time': Additional properties are not allowed"
        );
    }

    #[tokio::test]
    async fn test_correct_sends_document_and_patterns() {
        let llm = Arc::new(ScriptedLlm::replying(vec![Ok(
            "{\"title\": \"fixed\", \"panels\": []}".to_string(),
        )]));
        let corrector = LlmCorrector::new(llm.clone(), ModelRegistry::default());
        let request = CorrectionRequest {
            document: json!({"panels": []}),
            errors: vec![ValidationIssue::new("root", "\"title\" is a required property")],
            provider: ModelProvider::Gpt4o,
        };

        let fixed = corrector.correct(&request).await.unwrap();
        assert_eq!(fixed["title"], "fixed");

        let calls = llm.calls();
        assert_eq!(calls[0].model, "openai/gpt-4o");
        let user = &calls[0].messages[1].content;
        assert!(user.contains("\"panels\": []"));
        assert!(user.contains("Missing required property 'title'"));
    }

    #[tokio::test]
    async fn test_transport_failures_become_backend_errors() {
        let llm = Arc::new(ScriptedLlm::replying(vec![Err(LlmError::network_error(
            "connection reset".to_string(),
        ))]));
        let corrector = LlmCorrector::new(llm, ModelRegistry::default());
        let request = CorrectionRequest {
            document: json!({}),
            errors: Vec::new(),
            provider: ModelProvider::Gpt4o,
        };
        let err = corrector.correct(&request).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
