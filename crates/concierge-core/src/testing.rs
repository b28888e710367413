//! Scripted doubles for orchestrator and agent tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::agents::Agent;
use crate::providers::{ChatRequest, ChatResponse, ChatUsage, LlmProvider, StopReason};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

/// Replays queued replies (or failures) and records every request
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.script.lock().unwrap().push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Concatenated user content of request `i`
    pub fn user_content(&self, i: usize) -> String {
        self.requests.lock().unwrap()[i]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(ChatResponse {
                text,
                stop_reason: StopReason::EndTurn,
                usage: ChatUsage::default(),
            }),
            Some(Err(message)) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("script exhausted")),
        }
    }
}

/// Replies `<label>(<query>|<history>)` and records calls
pub struct EchoAgent {
    label: AgentLabel,
    calls: Mutex<Vec<(String, String, Option<String>)>>,
    fail_on: Option<String>,
}

impl EchoAgent {
    pub fn new(label: AgentLabel) -> Self {
        Self {
            label,
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Fail whenever the query chunk equals `query`
    pub fn failing_on(label: AgentLabel, query: &str) -> Self {
        Self {
            fail_on: Some(query.to_string()),
            ..Self::new(label)
        }
    }

    pub fn calls(&self) -> Vec<(String, String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn label(&self) -> AgentLabel {
        self.label
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        self.calls.lock().unwrap().push((
            request.query.to_string(),
            request.history.to_string(),
            request.content.map(str::to_string),
        ));
        if self.fail_on.as_deref() == Some(request.query) {
            return Err(anyhow!("agent exploded"));
        }
        Ok(AgentReply::Text(format!(
            "{}({}|{})",
            self.label, request.query, request.history
        )))
    }
}
