//! LLM-backed dashboard generator.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::schema::PANEL_TYPES;
use super::{BackendError, GenerationRequest, Generator};
use crate::config::{ModelProvider, ModelRegistry};
use crate::llm::{ChatMessage, LlmClient};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap()
});

const PANEL_EXAMPLE: &str = r#"{
  "id": 1,
  "type": "graph",
  "title": "Panel Title",
  "gridPos": {
    "h": 8,
    "w": 12,
    "x": 0,
    "y": 0
  }
}"#;

fn generation_system_prompt() -> String {
    format!(
        "You are an expert in creating Grafana dashboards.\n\
         Your task is to generate a valid JSON configuration for a Grafana dashboard based on the user's description.\n\n\
         The generated JSON should follow these guidelines:\n\
         1. Include all required fields: panels, title\n\
         2. Each panel should have id, type, title, and proper gridPos\n\
         3. Panel type must be one of: {}\n\
         4. Use appropriate data sources and query expressions\n\
         5. Include reasonable visualization options\n\
         6. Ensure the dashboard is well-organized and visually effective\n\n\
         IMPORTANT: You must output ONLY the valid JSON object with no additional text or explanations.\n\n\
         Example of a valid panel structure:\n{}\n",
        PANEL_TYPES.join(", "),
        PANEL_EXAMPLE
    )
}

fn augmented_prompt(prompt: &str, context: &str) -> String {
    format!(
        "I am generating a Grafana dashboard for the following description:\n\n\
         {prompt}\n\n\
         I have some additional context that might be helpful:\n\n\
         {context}\n\n\
         Using the context above, please generate a complete, valid JSON configuration for a Grafana dashboard based on the description.\n\n\
         Make sure your response follows these guidelines:\n\
         1. Include all required fields for the dashboard (title, panels, etc.)\n\
         2. Each panel must have the required fields (id, type, title, gridPos)\n\
         3. Use appropriate panel types for the visualizations based on the data being displayed\n\
         4. Configure proper data sources and queries that match the requirements\n\
         5. Set reasonable visualization options and thresholds if applicable\n\
         6. Organize panels in a logical layout with appropriate gridPos values\n\
         7. Add descriptive titles and appropriate units for all visualizations\n\n\
         Your response should be ONLY the valid JSON object with no additional text or explanations.\n"
    )
}

/// Pull the JSON object out of a model reply, tolerating Markdown fences and
/// surrounding chatter.
pub fn extract_json(text: &str) -> Result<Value, BackendError> {
    let trimmed = text.trim();
    let body = match FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    };

    let parsed = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(first) => {
            // Fall back to the outermost braces.
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str(&body[s..=e])
                    .map_err(|e| BackendError::InvalidOutput(format!("response is not JSON: {}", e)))?,
                _ => {
                    return Err(BackendError::InvalidOutput(format!(
                        "response is not JSON: {}",
                        first
                    )))
                }
            }
        }
    };

    if !parsed.is_object() {
        return Err(BackendError::InvalidOutput(
            "response is JSON but not an object".to_string(),
        ));
    }
    Ok(parsed)
}

/// Send `messages` to the model registered for `provider` and parse the reply.
pub(super) async fn complete_json(
    client: &dyn LlmClient,
    models: &ModelRegistry,
    provider: ModelProvider,
    messages: &[ChatMessage],
) -> Result<Value, BackendError> {
    let spec = models.get(provider).ok_or_else(|| {
        BackendError::Misconfigured(format!("no model registered for provider {}", provider))
    })?;

    let response = client
        .chat_completion(&spec.model_id, messages, &spec.options)
        .await?;

    if let Some(usage) = &response.usage {
        tracing::debug!(
            model = %spec.model_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Model call finished"
        );
    }

    let content = response
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| BackendError::InvalidOutput("empty model response".to_string()))?;
    extract_json(&content)
}

/// Generates dashboards with a chat-completion model.
pub struct LlmGenerator {
    client: Arc<dyn LlmClient>,
    models: ModelRegistry,
    system_prompt: String,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn LlmClient>, models: ModelRegistry) -> Self {
        Self {
            client,
            models,
            system_prompt: generation_system_prompt(),
        }
    }

    fn messages(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        let user = match &request.context {
            Some(context) if !context.is_empty() => {
                augmented_prompt(&request.prompt, &context.format_for_prompt())
            }
            _ => request.prompt.clone(),
        };
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(user),
        ]
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError> {
        tracing::info!(provider = %request.provider, "Generating dashboard");
        let messages = self.messages(request);
        complete_json(self.client.as_ref(), &self.models, request.provider, &messages).await
    }
}
