//! Generation backend contract
//!
//! The revision controller only talks to `GenerationBackend`. `ProviderBackend`
//! adapts any `LlmProvider` to it; hosts with their own generation pipeline
//! implement the trait directly.

use super::provider::{
    CompletionRequest, LlmProvider, Message, MessageRole, ProviderError, StreamChunk,
    StreamHandler,
};
use crate::turn::Author;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// A prior turn handed to the backend as context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub author: Author,
    pub name: Option<String>,
    pub text: String,
}

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Revision instruction
    pub instruction: String,

    /// Stream the response instead of waiting for one batch
    pub streaming: bool,

    /// Turns preceding the revised one, oldest first
    pub history: Vec<ContextMessage>,
}

/// Backend result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub reasoning: Option<String>,
}

/// Text generation backend
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationOutput, ProviderError>;
}

/// Source of the streaming-vs-batch decision
pub trait GenerationSettings: Send + Sync {
    fn streaming(&self) -> bool;
}

/// Lets the host flip streaming at runtime
impl GenerationSettings for AtomicBool {
    fn streaming(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Sampling parameters used by `ProviderBackend`
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// `GenerationBackend` over an `LlmProvider`
#[derive(Clone)]
pub struct ProviderBackend {
    provider: Arc<dyn LlmProvider>,
    params: SamplingParams,
    system_prompt: Option<String>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LlmProvider>, params: SamplingParams) -> Self {
        Self {
            provider,
            params,
            system_prompt: None,
        }
    }

    /// System / character prompt placed before the history
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<Message> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);

        if let Some(system) = &self.system_prompt {
            messages.push(Message::new(MessageRole::System, system.clone()));
        }

        for entry in &request.history {
            let role = match entry.author {
                Author::User => MessageRole::User,
                Author::Assistant => MessageRole::Assistant,
            };
            let content = match &entry.name {
                Some(name) => format!("{}: {}", name, entry.text),
                None => entry.text.clone(),
            };
            messages.push(Message::new(role, content));
        }

        messages.push(Message::new(MessageRole::User, request.instruction.clone()));
        messages
    }

    fn completion_request(&self, request: &GenerationRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.params.model.clone(),
            messages: self.build_messages(request),
            temperature: Some(self.params.temperature),
            max_tokens: Some(self.params.max_tokens),
            stop: None,
            stream: request.streaming,
        }
    }
}

/// Accumulates streamed content and reasoning
#[derive(Debug, Default)]
struct Collected {
    content: String,
    reasoning: String,
}

struct CollectingHandler {
    collected: Arc<Mutex<Collected>>,
}

#[async_trait::async_trait]
impl StreamHandler for CollectingHandler {
    async fn on_chunk(&self, chunk: &StreamChunk) -> Result<(), ProviderError> {
        let mut collected = self.collected.lock().await;
        for choice in &chunk.choices {
            if let Some(delta) = &choice.delta {
                if let Some(content) = &delta.content {
                    collected.content.push_str(content);
                }
                if let Some(reasoning) = &delta.reasoning_content {
                    collected.reasoning.push_str(reasoning);
                }
            }
        }
        Ok(())
    }

    async fn on_complete(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn on_error(&self, error: &ProviderError) {
        tracing::error!("Streaming error: {:?}", error);
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ProviderBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let completion = self.completion_request(request);
        tracing::debug!(
            provider = self.provider.name(),
            model = %completion.model,
            streaming = request.streaming,
            messages = completion.messages.len(),
            "Sending revision request"
        );

        if request.streaming {
            let collected = Arc::new(Mutex::new(Collected::default()));
            let handler: Arc<dyn StreamHandler> = Arc::new(CollectingHandler {
                collected: collected.clone(),
            });
            self.provider
                .complete_streaming(&completion, &handler)
                .await?;

            let mut collected = collected.lock().await;
            return Ok(GenerationOutput {
                text: std::mem::take(&mut collected.content),
                reasoning: non_empty(std::mem::take(&mut collected.reasoning)),
            });
        }

        let response = self.provider.complete(&completion).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Api {
                message: "Response contained no choices".to_string(),
                status_code: None,
            })?;

        Ok(GenerationOutput {
            text: choice.message.content,
            reasoning: choice.message.reasoning_content.and_then(non_empty),
        })
    }
}
