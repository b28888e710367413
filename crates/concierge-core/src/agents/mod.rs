//! Agent variants and the label → agent table
//!
//! Each agent turns one (query chunk, history chunk) pair into a reply,
//! usually through a single LLM call. Agents return `Err` for failures; the
//! orchestrator renders those as error partials.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::types::{AgentLabel, AgentReply, AgentRequest};

pub mod mail;
pub mod office;
pub mod pdf;
pub mod persona;
pub mod project;
pub mod web;

pub use mail::{MailAgent, MailMessage, MailProvider, OutgoingMail};
pub use office::{OfficeAgent, OfficeKind};
pub use pdf::PdfAgent;
pub use persona::PersonaAgent;
pub use project::ProjectAgent;
pub use web::{WebAgent, WebConfig};

#[async_trait]
pub trait Agent: Send + Sync {
    fn label(&self) -> AgentLabel;

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply>;
}

/// Agents keyed by the label the classifier answers with
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentLabel, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the agent's own label, replacing any previous entry
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let label = agent.label();
        debug!("Registering agent: {}", label);
        self.agents.insert(label, agent);
    }

    pub fn with(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn get(&self, label: AgentLabel) -> Option<Arc<dyn Agent>> {
        self.agents.get(&label).cloned()
    }

    /// Registered labels in declaration order
    pub fn labels(&self) -> Vec<AgentLabel> {
        AgentLabel::ALL
            .into_iter()
            .filter(|label| self.agents.contains_key(label))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Normalise a one-word LLM answer: trim, lower-case, drop wrapping quotes
/// or backticks and a trailing period
pub fn normalize_choice(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let unwrapped = lowered.trim_matches(|c| matches!(c, '"' | '\'' | '`'));
    let unwrapped = unwrapped.strip_suffix('.').unwrap_or(unwrapped);
    unwrapped
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_string()
}

/// Remove markdown code fences (```json ... ```) around an LLM reply
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_close = without_open.strip_suffix("```").unwrap_or(without_open);
    without_close.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoAgent;

    #[test]
    fn test_registry_lookup_and_order() {
        let registry = AgentRegistry::new()
            .with(Arc::new(EchoAgent::new(AgentLabel::Word)))
            .with(Arc::new(EchoAgent::new(AgentLabel::General)));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(AgentLabel::General).is_some());
        assert!(registry.get(AgentLabel::Gmail).is_none());
        assert_eq!(registry.labels(), vec![AgentLabel::General, AgentLabel::Word]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent::new(AgentLabel::General)));
        registry.register(Arc::new(EchoAgent::new(AgentLabel::General)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_normalize_choice() {
        assert_eq!(normalize_choice("  General \n"), "general");
        assert_eq!(normalize_choice("\"web_agent\""), "web_agent");
        assert_eq!(normalize_choice("`pdf_agent`."), "pdf_agent");
        assert_eq!(normalize_choice("read."), "read");
        assert_eq!(normalize_choice("   "), "");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("{\"b\": 2}"), "{\"b\": 2}");
    }
}
