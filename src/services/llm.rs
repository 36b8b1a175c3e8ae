use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{LlmError, SummaryModel};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Client for OpenRouter chat completions.
pub struct OpenRouterClient {
    http: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
            model: model.into(),
            endpoint: OPENROUTER_API_URL.to_string(),
        }
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl SummaryModel for OpenRouterClient {
    async fn summarize_chunk(
        &self,
        chunk: &str,
        chunk_index: usize,
        total_chunks: usize,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.3,
            max_tokens: 2000,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!("You write clear, professional summaries in {language}."),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Summarize part {} of {} of a longer document in {language}. \
                         The result is concatenated with the other parts, so start \
                         directly with the content.\n\n{chunk}",
                        chunk_index + 1,
                        total_chunks,
                    ),
                },
            ],
        };

        let started = std::time::Instant::now();
        let summary = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            summary = self.complete(&request) => summary?,
        };

        tracing::debug!(
            chunk = chunk_index + 1,
            total_chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunk summary generated"
        );
        Ok(summary)
    }
}
