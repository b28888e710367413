//! Mail agent: read-and-reply or compose-and-send over a [`MailProvider`]
//!
//! Sending is irreversible. When a send fails halfway through a batch of
//! replies the error is returned and the replies already sent stay sent.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{normalize_choice, strip_code_fences, Agent};
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

pub const UNKNOWN_QUERY_REPLY: &str = "Unknown query type.";
pub const NO_EMAILS_REPLY: &str = "No emails found.";
pub const FALLBACK_RECIPIENT: &str = "recipient@example.com";
pub const FALLBACK_SUBJECT: &str = "No Subject";

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A mailbox the mail agent can read from and send through
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Ids of up to `limit` recent messages, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<String>>;

    async fn get_message(&self, id: &str) -> Result<MailMessage>;

    async fn send(&self, mail: &OutgoingMail) -> Result<()>;

    /// Reply to `original`; by default a fresh `Re:` message to the sender
    async fn reply(&self, original: &MailMessage, body: &str) -> Result<()> {
        self.send(&OutgoingMail {
            to: original.from.clone(),
            subject: reply_subject(&original.subject),
            body: body.to_string(),
        })
        .await
    }
}

pub fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MailAction {
    Read,
    Send,
}

pub struct MailAgent {
    label: AgentLabel,
    provider: Arc<dyn MailProvider>,
    llm: Arc<dyn LlmProvider>,
    /// Messages from this address are never answered
    own_address: Option<String>,
}

impl MailAgent {
    pub fn new(label: AgentLabel, provider: Arc<dyn MailProvider>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            label,
            provider,
            llm,
            own_address: None,
        }
    }

    pub fn with_own_address(mut self, address: impl Into<String>) -> Self {
        self.own_address = Some(address.into()).filter(|a: &String| !a.is_empty());
        self
    }

    async fn classify(&self, query: &str) -> Result<Option<MailAction>> {
        let prompt = format!(
            "Query: {}. Identify if the query is related to one of the following actions: \
             read → If the query is about reading emails, \
             send → If the query is about sending an email. \
             Respond with only one word from the list: read or send. Do not provide explanations.",
            query
        );
        let raw = complete(
            self.llm.as_ref(),
            "You are an AI assistant that determines which email action to perform.",
            &[prompt.as_str()],
            CompletionOptions::max_tokens(10),
        )
        .await?;

        Ok(match normalize_choice(&raw).as_str() {
            "read" => Some(MailAction::Read),
            "send" => Some(MailAction::Send),
            _ => None,
        })
    }

    fn is_own(&self, sender: &str) -> bool {
        self.own_address
            .as_deref()
            .is_some_and(|own| sender.to_lowercase().contains(&own.to_lowercase()))
    }

    async fn read_and_reply(&self) -> Result<String> {
        let ids = self.provider.list_recent(RECENT_LIMIT).await?;
        if ids.is_empty() {
            return Ok(NO_EMAILS_REPLY.to_string());
        }

        let mut replies = 0;
        for id in &ids {
            let message = self.provider.get_message(id).await?;
            if self.is_own(&message.from) {
                debug!("Skipping own message {}", message.id);
                continue;
            }

            let prompt = format!(
                "Email received: {}. Generate a polite and professional reply.",
                message.body
            );
            let body = complete(
                self.llm.as_ref(),
                "You are an AI email assistant that generates appropriate replies.",
                &[prompt.as_str()],
                CompletionOptions::max_tokens(4000),
            )
            .await?;

            self.provider.reply(&message, &body).await?;
            replies += 1;
            info!(
                "Replied to {} via {}",
                message.from,
                self.provider.provider_name()
            );
        }

        Ok(format!(
            "Processed {} emails and sent {} replies.",
            ids.len(),
            replies
        ))
    }

    async fn compose_and_send(&self, query: &str) -> Result<String> {
        let (to, subject) = self.extract_details(query).await?;

        let prompt = format!(
            "Query: {}\nGenerate a detailed, professional and polite email body.",
            query
        );
        let body = complete(
            self.llm.as_ref(),
            "You are an AI assistant that generates email bodies based on user queries. \
             Write a professional and polite email body based on the given query.",
            &[prompt.as_str()],
            CompletionOptions::max_tokens(500),
        )
        .await?;

        self.provider
            .send(&OutgoingMail {
                to: to.clone(),
                subject,
                body,
            })
            .await?;
        info!("Sent email to {} via {}", to, self.provider.provider_name());
        Ok(format!("Email sent to {}.", to))
    }

    async fn extract_details(&self, query: &str) -> Result<(String, String)> {
        let prompt = format!(
            "Query: {}\nExtract and return the following fields:\n\
             - 'to' (recipient email)\n\
             - 'subject'\n\
             Respond with raw JSON only. Do not use markdown or explanations.",
            query
        );
        let raw = complete(
            self.llm.as_ref(),
            "You are an AI assistant that extracts email details from user queries. \
             Extract the recipient email address and the subject of the email.",
            &[prompt.as_str()],
            CompletionOptions::max_tokens(200),
        )
        .await?;

        Ok(parse_details(&raw))
    }
}

/// `(to, subject)` from the extraction reply, with fallbacks for anything missing
fn parse_details(raw: &str) -> (String, String) {
    let parsed: Option<Value> = serde_json::from_str(&strip_code_fences(raw)).ok();
    if parsed.is_none() {
        warn!("Could not parse email details from {:?}", raw);
    }
    let field = |name: &str, fallback: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    (field("to", FALLBACK_RECIPIENT), field("subject", FALLBACK_SUBJECT))
}

#[async_trait]
impl Agent for MailAgent {
    fn label(&self) -> AgentLabel {
        self.label
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let text = match self.classify(request.query).await? {
            Some(MailAction::Read) => self.read_and_reply().await?,
            Some(MailAction::Send) => self.compose_and_send(request.query).await?,
            None => UNKNOWN_QUERY_REPLY.to_string(),
        };
        Ok(AgentReply::Text(text))
    }
}
