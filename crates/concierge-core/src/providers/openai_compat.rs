//! OpenAI-compatible endpoints (Groq, Together, Ollama, LM Studio, ...)

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::openai::OpenAiProvider;
use super::types::{ChatRequest, ChatResponse, LlmProvider};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Wraps [`OpenAiProvider`] with a custom name
pub struct OpenAiCompatProvider {
    inner: OpenAiProvider,
    name: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(
        name: String,
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: OpenAiProvider::with_timeout(api_key, model, base_url, max_tokens, timeout),
            name,
        }
    }

    /// Groq with the default hosted endpoint
    pub fn groq(api_key: String, model: Option<String>, max_tokens: u32) -> Self {
        Self::new(
            "groq".to_string(),
            api_key,
            model.unwrap_or_else(|| GROQ_DEFAULT_MODEL.to_string()),
            GROQ_BASE_URL.to_string(),
            max_tokens,
            Duration::from_secs(super::openai::DEFAULT_TIMEOUT_SECS),
        )
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.inner.chat(request).await
    }
}
