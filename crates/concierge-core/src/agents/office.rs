//! Spreadsheet and word-document QA for the office add-ins

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use super::Agent;
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

pub const NO_DATA_REPLY: &str = "No data provided.";
const MAX_SUMMARY_ROWS: usize = 10;

const EXCEL_PROMPT: &str = "You are an AI that processes Excel data and answers the user \
queries. In the result provide only the answer to the user question.";

const WORD_PROMPT: &str = "You are an AI that processes the content of a Microsoft Word \
document and answers the user queries. In the result provide only the answer to the user \
question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Excel,
    Word,
}

pub struct OfficeAgent {
    kind: OfficeKind,
    llm: Arc<dyn LlmProvider>,
}

impl OfficeAgent {
    pub fn excel(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            kind: OfficeKind::Excel,
            llm,
        }
    }

    pub fn word(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            kind: OfficeKind::Word,
            llm,
        }
    }

    fn prompt(&self, data: &str, request: &AgentRequest<'_>) -> String {
        match self.kind {
            OfficeKind::Excel => format!(
                "Data: {}. Query: {}. Chat History: {}.",
                summarize_rows(data),
                request.query,
                request.history
            ),
            OfficeKind::Word => format!(
                "Microsoft Word document content: {}. User Query: {}. Chat History: {}.",
                data, request.query, request.history
            ),
        }
    }
}

#[async_trait]
impl Agent for OfficeAgent {
    fn label(&self) -> AgentLabel {
        match self.kind {
            OfficeKind::Excel => AgentLabel::Excel,
            OfficeKind::Word => AgentLabel::Word,
        }
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let Some(data) = request.content.filter(|c| !c.trim().is_empty()) else {
            return Ok(AgentReply::from(NO_DATA_REPLY));
        };

        let system = match self.kind {
            OfficeKind::Excel => EXCEL_PROMPT,
            OfficeKind::Word => WORD_PROMPT,
        };
        let prompt = self.prompt(data, request);
        debug!("{:?} agent prompt is {} chars", self.kind, prompt.len());

        let text = complete(self.llm.as_ref(), system, &[prompt.as_str()], CompletionOptions::default()).await?;
        Ok(AgentReply::Text(text))
    }
}

/// Row-by-row summary of a JSON array of objects; anything else is passed
/// through unchanged
pub fn summarize_rows(data: &str) -> String {
    let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(data) else {
        return data.to_string();
    };
    if rows.is_empty() || !rows.iter().all(Value::is_object) {
        return data.to_string();
    }

    let mut summary = String::from("Summary of Excel Data:\n");
    for (i, row) in rows.iter().take(MAX_SUMMARY_ROWS).enumerate() {
        let _ = writeln!(summary, "Row {}:", i + 1);
        if let Value::Object(fields) = row {
            for (key, value) in fields {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(summary, "  {}: {}", key, value);
            }
        }
    }
    if rows.len() > MAX_SUMMARY_ROWS {
        let _ = write!(
            summary,
            "\n(Note: Only the first {} rows are summarized.)",
            MAX_SUMMARY_ROWS
        );
    }
    summary
}
