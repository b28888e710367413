//! Provider-agnostic chat types

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One chat-completion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider default when set
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Default::default()
        }
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: ChatUsage,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Unknown,
}

/// Token usage from a single API call
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Trait that all LLM providers implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "groq", "openai")
    fn provider_name(&self) -> &str;

    /// Model identifier (e.g. "llama-3.3-70b-versatile")
    fn model(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Sampling options for [`complete`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            temperature: None,
        }
    }

    pub fn temperature(temperature: f32) -> Self {
        Self {
            max_tokens: None,
            temperature: Some(temperature),
        }
    }
}

/// Single-shot completion: system prompt plus user messages, returns trimmed text
pub async fn complete(
    provider: &dyn LlmProvider,
    system: &str,
    user_messages: &[&str],
    opts: CompletionOptions,
) -> Result<String> {
    let request = ChatRequest {
        system: Some(system.to_string()),
        messages: user_messages.iter().map(|m| ChatMessage::user(*m)).collect(),
        max_tokens: opts.max_tokens,
        temperature: opts.temperature,
    };

    let response = provider.chat(&request).await?;
    Ok(response.text.trim().to_string())
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl StopReason {
    pub fn from_finish_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::EndTurn,
            Some("length") => Self::MaxTokens,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_role_display() {
        assert_eq!(ChatRole::User.to_string(), "user");
        assert_eq!(ChatRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_request_builder() {
        let req = ChatRequest::new("be brief")
            .user("hello")
            .user("history")
            .max_tokens(10)
            .temperature(0.7);
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[1], ChatMessage::user("history"));
        assert_eq!(req.max_tokens, Some(10));
        assert_eq!(req.temperature, Some(0.7));
    }

    #[test]
    fn test_stop_reason_from_finish_reason() {
        assert_eq!(StopReason::from_finish_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(StopReason::from_finish_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(StopReason::from_finish_reason(None), StopReason::Unknown);
    }

    #[test]
    fn test_chat_usage_default() {
        let usage = ChatUsage::default();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 0);
    }
}
