//! Chat-completion transport for OpenRouter and other OpenAI-compatible endpoints.
//!
//! Each call is retried on transient transport failures (429, 5xx, dropped
//! connections) according to the client's [`RetryConfig`]. The pipeline's own
//! retry budget sits above this and only sees what survives these retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage};

const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

pub struct OpenRouterClient {
    http: Client,
    api_key: String,
    endpoint: String,
    retry: RetryConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self::with_retry_config(api_key, RetryConfig::default())
    }

    pub fn with_retry_config(api_key: String, retry: RetryConfig) -> Self {
        Self {
            http: Client::new(),
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            retry,
        }
    }

    /// Send requests to `endpoint` instead of OpenRouter.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, body: &CompletionBody<'_>) -> Result<ChatResponse, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "dashforge")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network_error(format!("reading response body: {}", e)))?;

        if !status.is_success() {
            return Err(status_error(status, text, retry_after));
        }

        decode_completion(&text, body.model)
    }

    async fn send(&self, body: &CompletionBody<'_>) -> Result<ChatResponse, LlmError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let error = match self.send_once(body).await {
                Ok(reply) => {
                    if attempt > 0 {
                        tracing::info!(
                            model = body.model,
                            retries = attempt,
                            elapsed = ?started.elapsed(),
                            "completion recovered after transport retries"
                        );
                    }
                    return Ok(reply);
                }
                Err(error) => error,
            };

            let budget_left = self.retry.max_retry_duration.saturating_sub(started.elapsed());
            let delay = error.suggested_delay(attempt).min(budget_left);
            let give_up = attempt >= self.retry.max_retries
                || !self.retry.should_retry(&error)
                || delay.is_zero();

            if give_up {
                tracing::warn!(
                    model = body.model,
                    retries = attempt,
                    kind = %error.kind,
                    "completion failed: {}",
                    error.message
                );
                return Err(error);
            }

            attempt += 1;
            tracing::debug!(
                model = body.model,
                attempt,
                kind = %error.kind,
                ?delay,
                "transient completion failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let body = CompletionBody {
            model,
            messages,
            options,
        };
        tracing::debug!(model, messages = messages.len(), "requesting completion");
        self.send(&body).await
    }
}

fn transport_error(err: reqwest::Error) -> LlmError {
    let what = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "could not connect"
    } else {
        "request failed"
    };
    LlmError::network_error(format!("{}: {}", what, err))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> LlmError {
    let code = status.as_u16();
    match classify_http_status(code) {
        LlmErrorKind::RateLimited => LlmError::rate_limited(body, retry_after),
        LlmErrorKind::ClientError => LlmError::client_error(code, body),
        _ => LlmError::server_error(code, body),
    }
}

fn decode_completion(text: &str, requested_model: &str) -> Result<ChatResponse, LlmError> {
    let reply: CompletionReply = serde_json::from_str(text)
        .map_err(|e| LlmError::parse_error(format!("malformed completion ({}): {}", e, text)))?;

    let Some(choice) = reply.choices.into_iter().next() else {
        return Err(LlmError::parse_error("completion had no choices".to_string()));
    };

    Ok(ChatResponse {
        content: choice.message.content,
        finish_reason: choice.finish_reason,
        usage: reply
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        model: Some(reply.model.unwrap_or_else(|| requested_model.to_string())),
    })
}

/// Request body. Sampling options are flattened in and omitted when unset.
#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    options: &'a ChatOptions,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<ReplyChoice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
