//! OpenAI chat-completions provider

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::types::{ChatRequest, ChatResponse, ChatUsage, LlmProvider, StopReason};

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    /// `base_url` is the API root without the `/v1` suffix, e.g. `https://api.openai.com`
    pub fn new(api_key: String, model: String, base_url: String, max_tokens: u32) -> Self {
        Self::with_timeout(
            api_key,
            model,
            base_url,
            max_tokens,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
        }
    }

    fn to_openai_messages(request: &ChatRequest) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            result.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        result.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        }));
        result
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Result<ChatResponse> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;

        let usage = resp.usage.map_or(ChatUsage::default(), |u| ChatUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            stop_reason: StopReason::from_finish_reason(choice.finish_reason.as_deref()),
            usage,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = OpenAiApiRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature,
            messages: Self::to_openai_messages(request),
        };

        debug!(
            "Chat request: model={}, messages={}, max_tokens={}",
            self.model,
            body.messages.len(),
            body.max_tokens
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Chat completion request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        Self::from_openai_response(api_response)
    }
}

// ── wire types ──

#[derive(Debug, Serialize)]
struct OpenAiApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
