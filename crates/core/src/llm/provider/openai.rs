//! OpenAI-compatible Provider Implementation
//!
//! Supports:
//! - OpenAI API (Chat Completions)
//! - Compatible APIs (OpenRouter, Ollama, local text-generation servers)
//! - Server-sent event streaming

use super::*;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

/// OpenAI-compatible Provider
#[derive(Clone)]
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.config.name)
            .field("default_model", &self.config.default_model)
            .finish_non_exhaustive()
    }
}

/// One parsed server-sent event line
#[derive(Debug)]
enum SseEvent {
    Chunk(StreamChunk),
    Done,
}

impl OpenAiProvider {
    /// Create a new provider
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { config, client })
    }

    /// Get base URL for API calls
    fn get_base_url(&self) -> String {
        match &self.config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.config.provider_type.default_base_url().to_string(),
        }
    }

    /// Build authorization header
    fn get_auth_header(&self) -> String {
        format!("Bearer {}", self.config.api_key)
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": request.temperature.unwrap_or(0.7),
            "max_tokens": request.max_tokens,
            "stop": request.stop,
            "stream": stream,
        })
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", self.get_auth_header());
        }
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        builder
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Auth {
                message: "Invalid API key".to_string(),
            });
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited { retry_after: 60 });
        } else if status == StatusCode::BAD_REQUEST {
            let error: serde_json::Value = response
                .json()
                .await
                .unwrap_or_else(|_| serde_json::json!({}));
            let message = error["error"]["message"]
                .as_str()
                .unwrap_or("Invalid request")
                .to_string();
            return Err(ProviderError::InvalidRequest { message });
        } else if !status.is_success() {
            return Err(ProviderError::Api {
                message: format!("API returned status {}", status),
                status_code: Some(status.as_u16()),
            });
        }
        Ok(response)
    }

    fn parse_sse_line(line: &str) -> Option<SseEvent> {
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return Some(SseEvent::Done);
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => Some(SseEvent::Chunk(chunk)),
            Err(e) => {
                tracing::debug!("Skipping unparseable stream line: {}", e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        self.config.provider_type
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.get_base_url());

        let response = self
            .post(&url)
            .json(&Self::request_body(request, false))
            .send()
            .await
            .map_err(map_provider_error)?;

        let response: CompletionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Api {
                message: format!("Failed to parse response: {}", e),
                status_code: None,
            })?;

        Ok(response)
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        handler: &Arc<dyn StreamHandler>,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/chat/completions", self.get_base_url());

        let response = self
            .post(&url)
            .json(&Self::request_body(request, true))
            .send()
            .await
            .map_err(map_provider_error)?;

        let mut stream = match Self::check_status(response).await {
            Ok(response) => response.bytes_stream(),
            Err(e) => {
                handler.on_error(&e).await;
                return Err(e);
            }
        };

        // Lines may be split across network chunks
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Network { source: e })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                match Self::parse_sse_line(line.trim_end()) {
                    Some(SseEvent::Done) => {
                        handler.on_complete().await?;
                        return Ok(());
                    }
                    Some(SseEvent::Chunk(stream_chunk)) => handler.on_chunk(&stream_chunk).await?,
                    None => {}
                }
            }
        }

        if let Some(SseEvent::Chunk(stream_chunk)) = Self::parse_sse_line(buffer.trim_end()) {
            handler.on_chunk(&stream_chunk).await?;
        }
        handler.on_complete().await?;
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Create a basic OpenAI configuration
pub fn create_openai_config(name: &str, api_key: &str, default_model: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider_type: ProviderType::OpenAi,
        api_key: api_key.to_string(),
        base_url: None,
        organization: None,
        default_model: default_model.to_string(),
        timeout_ms: 60000,
    }
}

/// Create a configuration for a local OpenAI-compatible server
pub fn create_local_config(name: &str, base_url: &str, default_model: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider_type: ProviderType::Local,
        api_key: String::new(),
        base_url: Some(base_url.to_string()),
        organization: None,
        default_model: default_model.to_string(),
        timeout_ms: 120000,
    }
}
