//! concierge-core - routing brain of the concierge backend
//!
//! This crate provides:
//! - Token-bounded chunking and the shared conversation memory
//! - LLM provider clients with retry and failover
//! - The agent set (chat personas, mail, office documents, PDF, web, projects)
//! - The orchestrator that classifies a query by majority vote and
//!   dispatches it to one agent

pub mod agents;
pub mod chunker;
pub mod memory;
pub mod orchestrator;
pub mod providers;
pub mod types;

#[cfg(test)]
mod testing;

pub use agents::{Agent, AgentRegistry, MailProvider};
pub use chunker::{Chunker, DEFAULT_TOKEN_LIMIT, MIN_TOKEN_LIMIT};
pub use memory::{ConversationMemory, MemoryEntry, MemoryRetention};
pub use orchestrator::{CycleError, CycleOutcome, Orchestrator, OrchestratorConfig, majority_vote};
pub use providers::{LlmProvider, ModelRouter, OpenAiCompatProvider, OpenAiProvider};
pub use types::{AgentLabel, AgentReply, AgentRequest, CycleRequest};
