//! Scripted back-ends for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    AugmentedContext, Backends, BackendError, ContextAugmenter, CorrectionRequest, Corrector,
    GenerationRequest, Generator, ValidationIssue, ValidationReport, Validator,
};
use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError};

/// Queue of canned results, with a fallback once it runs dry.
struct Script<T> {
    queue: Mutex<VecDeque<Result<T, BackendError>>>,
    fallback: Result<T, BackendError>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(queue: Vec<Result<T, BackendError>>, fallback: Result<T, BackendError>) -> Self {
        Self {
            queue: Mutex::new(queue.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Result<T, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn dashboard(title: &str) -> Value {
    json!({
        "title": title,
        "panels": [{
            "id": 1,
            "type": "stat",
            "title": "Requests",
            "gridPos": {"h": 4, "w": 6, "x": 0, "y": 0}
        }]
    })
}

pub fn invalid_report() -> ValidationReport {
    ValidationReport::invalid(vec![ValidationIssue::new(
        "/panels/0",
        "\"gridPos\" is a required property",
    )])
}

pub struct ScriptedGenerator {
    script: Script<Value>,
    delay: Option<Duration>,
    contexts: Mutex<Vec<Option<AugmentedContext>>>,
}

impl ScriptedGenerator {
    pub fn sequence(queue: Vec<Result<Value, BackendError>>, fallback: Result<Value, BackendError>) -> Self {
        Self {
            script: Script::new(queue, fallback),
            delay: None,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(document: Value) -> Self {
        Self::sequence(Vec::new(), Ok(document))
    }

    pub fn failing(error: BackendError) -> Self {
        Self::sequence(Vec::new(), Err(error))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls started, including ones cut short by a timeout.
    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    /// Context passed to each call, in order.
    pub fn contexts(&self) -> Vec<Option<AugmentedContext>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, BackendError> {
        self.contexts.lock().unwrap().push(request.context.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.next()
    }
}

/// Generator that panics, for exercising task-level panic isolation.
pub struct PanickingGenerator;

#[async_trait]
impl Generator for PanickingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Value, BackendError> {
        panic!("generator exploded")
    }
}

pub struct ScriptedValidator {
    script: Script<ValidationReport>,
}

impl ScriptedValidator {
    pub fn sequence(
        queue: Vec<Result<ValidationReport, BackendError>>,
        fallback: Result<ValidationReport, BackendError>,
    ) -> Self {
        Self {
            script: Script::new(queue, fallback),
        }
    }

    pub fn always_valid() -> Self {
        Self::sequence(Vec::new(), Ok(ValidationReport::valid()))
    }

    pub fn always_invalid() -> Self {
        Self::sequence(Vec::new(), Ok(invalid_report()))
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, _document: &Value) -> Result<ValidationReport, BackendError> {
        self.script.next()
    }
}

pub struct ScriptedCorrector {
    script: Script<Value>,
}

impl ScriptedCorrector {
    pub fn sequence(queue: Vec<Result<Value, BackendError>>, fallback: Result<Value, BackendError>) -> Self {
        Self {
            script: Script::new(queue, fallback),
        }
    }

    pub fn always(document: Value) -> Self {
        Self::sequence(Vec::new(), Ok(document))
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }
}

#[async_trait]
impl Corrector for ScriptedCorrector {
    async fn correct(&self, _request: &CorrectionRequest) -> Result<Value, BackendError> {
        self.script.next()
    }
}

pub struct ScriptedAugmenter {
    script: Script<AugmentedContext>,
}

impl ScriptedAugmenter {
    pub fn returning(context: AugmentedContext) -> Self {
        Self {
            script: Script::new(Vec::new(), Ok(context)),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Script::new(
                Vec::new(),
                Err(BackendError::Unavailable("knowledge base offline".to_string())),
            ),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }
}

#[async_trait]
impl ContextAugmenter for ScriptedAugmenter {
    async fn augment(&self, _prompt: &str) -> Result<AugmentedContext, BackendError> {
        self.script.next()
    }
}

/// Shared handles to the fakes behind a [`Backends`] bundle.
pub struct FakeBackends {
    pub generator: Arc<ScriptedGenerator>,
    pub validator: Arc<ScriptedValidator>,
    pub corrector: Arc<ScriptedCorrector>,
    pub augmenter: Arc<ScriptedAugmenter>,
}

impl FakeBackends {
    pub fn new(
        generator: ScriptedGenerator,
        validator: ScriptedValidator,
        corrector: ScriptedCorrector,
        augmenter: ScriptedAugmenter,
    ) -> Self {
        Self {
            generator: Arc::new(generator),
            validator: Arc::new(validator),
            corrector: Arc::new(corrector),
            augmenter: Arc::new(augmenter),
        }
    }

    /// Everything succeeds on the first attempt.
    pub fn happy() -> Self {
        Self::new(
            ScriptedGenerator::always(dashboard("Happy path")),
            ScriptedValidator::always_valid(),
            ScriptedCorrector::always(dashboard("Corrected")),
            ScriptedAugmenter::returning(AugmentedContext::default()),
        )
    }

    pub fn backends(&self) -> Backends {
        Backends {
            generator: self.generator.clone(),
            validator: self.validator.clone(),
            corrector: self.corrector.clone(),
            augmenter: self.augmenter.clone(),
        }
    }
}

/// One request seen by [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: ChatOptions,
}

/// Chat client replaying canned replies.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn replying(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            options: options.clone(),
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::server_error(503, "script exhausted".to_string())))?;
        Ok(ChatResponse {
            content: Some(reply),
            finish_reason: Some("stop".to_string()),
            usage: None,
            model: Some(model.to_string()),
        })
    }
}
