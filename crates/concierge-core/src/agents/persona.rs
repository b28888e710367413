//! Single-call conversational agents distinguished only by persona

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::Agent;
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

const GENERAL_PROMPT: &str = "You are an AI assistant providing general advice with emotional \
intelligence, trained on a diverse range of data. Use emoji and respond like a human with \
friendly and short responses.";

const SOCIAL_MEDIA_PROMPT: &str = "You are an AI assistant for social media planning, branding \
and content strategy, with an emotional intelligence model trained on a diverse range of \
trending, up-to-date social media data. Respond like a human with friendly and short responses.";

const CALENDAR_PROMPT: &str = "You are an AI assistant that manages meeting schedules and \
organizes events. Help the user plan, reschedule and summarize their calendar with clear, \
short and friendly responses.";

const PERSONA_TEMPERATURE: f32 = 0.7;

/// Sends `[query, history]` to the LLM under a fixed system prompt
pub struct PersonaAgent {
    label: AgentLabel,
    system_prompt: &'static str,
    llm: Arc<dyn LlmProvider>,
}

impl PersonaAgent {
    pub fn general(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            label: AgentLabel::General,
            system_prompt: GENERAL_PROMPT,
            llm,
        }
    }

    pub fn social_media(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            label: AgentLabel::SocialMedia,
            system_prompt: SOCIAL_MEDIA_PROMPT,
            llm,
        }
    }

    pub fn calendar(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            label: AgentLabel::Calendar,
            system_prompt: CALENDAR_PROMPT,
            llm,
        }
    }
}

#[async_trait]
impl Agent for PersonaAgent {
    fn label(&self) -> AgentLabel {
        self.label
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let text = complete(
            self.llm.as_ref(),
            self.system_prompt,
            &[request.query, request.history],
            CompletionOptions::temperature(PERSONA_TEMPERATURE),
        )
        .await?;
        Ok(AgentReply::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn test_general_sends_query_then_history() {
        let llm = Arc::new(ScriptedProvider::new(["Hey there! 👋"]));
        let agent = PersonaAgent::general(llm.clone());

        let reply = agent
            .handle_query(&AgentRequest::new("hi", "Human: yo\nAI: hello"))
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::Text("Hey there! 👋".into()));

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.system.as_deref(), Some(GENERAL_PROMPT));
        assert_eq!(req.messages[0].content, "hi");
        assert_eq!(req.messages[1].content, "Human: yo\nAI: hello");
        assert_eq!(req.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_labels() {
        let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(Vec::<&str>::new()));
        assert_eq!(PersonaAgent::general(llm.clone()).label(), AgentLabel::General);
        assert_eq!(PersonaAgent::social_media(llm.clone()).label(), AgentLabel::SocialMedia);
        assert_eq!(PersonaAgent::calendar(llm).label(), AgentLabel::Calendar);
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let llm = Arc::new(ScriptedProvider::new(Vec::<&str>::new()));
        llm.push_failure("status 500");
        let agent = PersonaAgent::calendar(llm);
        assert!(agent.handle_query(&AgentRequest::new("q", "")).await.is_err());
    }
}
