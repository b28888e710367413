//! Question answering over the most recently uploaded PDF

use anyhow::Result;
use async_trait::async_trait;
use concierge_knowledge::DocumentLibrary;
use std::sync::Arc;
use tracing::debug;

use super::Agent;
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

pub const NO_PDF_REPLY: &str = "No PDF found. Please upload a document first.";
const SYSTEM_PROMPT: &str = "You are an AI assistant that answers questions based on summarized PDFs.";
const TOP_PASSAGES: usize = 3;
const ANSWER_MAX_TOKENS: u32 = 150;

pub struct PdfAgent {
    llm: Arc<dyn LlmProvider>,
    library: Arc<DocumentLibrary>,
}

impl PdfAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, library: Arc<DocumentLibrary>) -> Self {
        Self { llm, library }
    }
}

#[async_trait]
impl Agent for PdfAgent {
    fn label(&self) -> AgentLabel {
        AgentLabel::Pdf
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let Some(passages) = self.library.retrieve(request.query, TOP_PASSAGES).await? else {
            return Ok(AgentReply::from(NO_PDF_REPLY));
        };
        debug!("Answering from {} passages", passages.len());

        let context = passages.join("\n");
        let prompt = format!(
            "Based on the PDF content, answer this: {}. Context: {}",
            request.query, context
        );
        let text = complete(
            self.llm.as_ref(),
            SYSTEM_PROMPT,
            &[prompt.as_str()],
            CompletionOptions::max_tokens(ANSWER_MAX_TOKENS),
        )
        .await?;
        Ok(AgentReply::Text(text))
    }
}
