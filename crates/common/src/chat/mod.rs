//! Chat completion abstraction
//!
//! Thin client for an external, OpenAI-compatible chat-completion
//! endpoint. Any backend failure (timeout, rate limit, invalid model)
//! surfaces as `GenerationFailed`, which handlers map to a recoverable
//! request failure.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Message role in a chat exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(AppError::Validation {
                message: format!("unknown role: {}", other),
                field: Some("role".to_string()),
            }),
        }
    }
}

/// One prompt message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Trait for answer generation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send assembled messages, return raw answer text
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP chat client for OpenAI-compatible endpoints
pub struct HttpChatModel {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

impl HttpChatModel {
    pub fn new(config: &crate::config::ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::GenerationFailed {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationFailed {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: CompletionResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::GenerationFailed {
                    message: format!("Failed to parse response: {}", e),
                })?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationFailed {
                message: "Empty completion response".to_string(),
            })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(200 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(messages).await {
                Ok(answer) => return Ok(answer),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Chat completion failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::GenerationFailed {
            message: "Unknown error after retries".to_string(),
        }))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted chat model for tests and the `mock` provider. Echoes a
/// canned answer and records the messages it saw.
#[derive(Default)]
pub struct MockChatModel {
    answer: String,
    seen: tokio::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            seen: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order
    pub async fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        self.seen.lock().await.push(messages.to_vec());
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create a chat model based on configuration
pub fn create_chat_model(config: &crate::config::ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpChatModel::new(config)?)),
        "mock" => Ok(Arc::new(MockChatModel::new(
            "This is a mock answer.".to_string(),
        ))),
        other => Err(AppError::Configuration {
            message: format!("Unknown chat provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant] {
            let parsed: Role = role.as_str().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn test_mock_chat_records_messages() {
        let model = MockChatModel::new("hello");
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("question")];
        let answer = model.generate(&messages).await.unwrap();
        assert_eq!(answer, "hello");

        let calls = model.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][1].content, "question");
    }

    #[test]
    fn test_message_serialization_uses_lowercase_roles() {
        let msg = ChatMessage::assistant("ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
