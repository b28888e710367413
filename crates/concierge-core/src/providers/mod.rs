//! LLM provider abstraction
//!
//! Providers implement [`LlmProvider`]; [`ModelRouter`] composes several of
//! them with ordered failover. Every agent and the orchestrator's classifier
//! talk to a `dyn LlmProvider`, so tests can substitute scripted providers.

pub mod openai;
pub mod openai_compat;
pub mod router;
pub mod types;

pub use openai::OpenAiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::ModelRouter;
pub use types::{
    complete, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage, CompletionOptions,
    LlmProvider, StopReason,
};
