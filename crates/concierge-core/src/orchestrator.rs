//! Query routing: classify by majority vote, dispatch, recombine
//!
//! One cycle chunks the query and the history, asks the classifier for a
//! label once per (query chunk, history chunk) pair, picks the most frequent
//! label, then replays the same pairs against the chosen agent and joins the
//! partial replies with a single space. Pairs are processed sequentially in
//! query-major order, so a cycle costs `2 * q * h` external calls.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, AgentRegistry, normalize_choice};
use crate::chunker::{Chunker, DEFAULT_TOKEN_LIMIT};
use crate::memory::ConversationMemory;
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentRequest, CycleRequest};

const CLASSIFIER_INTRO: &str = "You are a smart AI assistant that engages in conversational \
discussions. Your goal is to understand user queries, recall past conversations, and route \
each query to the correct agent while maintaining the conversation flow. Always consider the \
user's past messages; if the user continues a previous topic, assume continuity.";

/// Cycle-level failure, carrying a stable kind for callers that branch on it
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Error: Empty query provided.")]
    EmptyQuery,

    #[error("Error: No valid response received from the classifier.")]
    NoDecision,

    #[error("Error: Agent not found: {0}")]
    UnrecognizedLabel(String),

    #[error("Error: Agent '{0}' is not configured.")]
    AgentUnavailable(AgentLabel),

    #[error("Error: Failed to tokenize input: {0}")]
    Tokenizer(#[source] anyhow::Error),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuery => "empty_query",
            Self::NoDecision => "no_decision",
            Self::UnrecognizedLabel(_) => "unrecognized_label",
            Self::AgentUnavailable(_) => "agent_unavailable",
            Self::Tokenizer(_) => "tokenizer",
        }
    }
}

/// Result of one successful cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub agent: AgentLabel,
    pub response: String,
    /// Number of (query, history) chunk pairs dispatched
    pub partials: usize,
    /// Partials that were agent errors rendered as `Error: ..`
    pub failed_partials: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub token_limit: usize,
    pub classifier_max_tokens: u32,
    /// Hold a cycle-wide lock so snapshot-then-record is atomic
    pub serialize_cycles: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            token_limit: DEFAULT_TOKEN_LIMIT,
            classifier_max_tokens: 10,
            serialize_cycles: false,
        }
    }
}

pub struct Orchestrator {
    classifier: Arc<dyn LlmProvider>,
    agents: AgentRegistry,
    chunker: Chunker,
    memory: Arc<ConversationMemory>,
    config: OrchestratorConfig,
    system_prompt: String,
    cycle_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn LlmProvider>,
        agents: AgentRegistry,
        chunker: Chunker,
        memory: Arc<ConversationMemory>,
        config: OrchestratorConfig,
    ) -> Self {
        info!(
            "Orchestrator ready with {} agents (token limit {}, serialized: {})",
            agents.len(),
            config.token_limit,
            config.serialize_cycles
        );
        Self {
            classifier,
            agents,
            chunker,
            memory,
            config,
            system_prompt: classifier_prompt(),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one full cycle. Memory gains exactly one turn on success and is
    /// left untouched on any `CycleError`.
    pub async fn route_query(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError> {
        let _serialized = if self.config.serialize_cycles {
            Some(self.cycle_lock.lock().await)
        } else {
            None
        };

        let query_chunks = self
            .chunker
            .chunk_with_limit(&request.query, self.config.token_limit)
            .map_err(CycleError::Tokenizer)?;
        if query_chunks.is_empty() {
            warn!("Rejecting empty query");
            return Err(CycleError::EmptyQuery);
        }

        let history = match &request.history {
            Some(history) => history.clone(),
            None => self.memory.snapshot().await,
        };
        let mut history_chunks = self
            .chunker
            .chunk_with_limit(&history, self.config.token_limit)
            .map_err(CycleError::Tokenizer)?;
        if history_chunks.is_empty() {
            history_chunks.push(String::new());
        }
        debug!(
            "Cycle over {} query chunks x {} history chunks",
            query_chunks.len(),
            history_chunks.len()
        );

        let label = self.classify(&query_chunks, &history_chunks).await?;
        let agent = self
            .agents
            .get(label)
            .ok_or(CycleError::AgentUnavailable(label))?;
        info!("Routing query to {} agent", label);

        let (partials, failed) = self
            .dispatch(agent.as_ref(), &query_chunks, &history_chunks, request.content.as_deref())
            .await;
        let response = partials.join(" ");

        self.memory.record(request.query.clone(), response.clone()).await;

        Ok(CycleOutcome {
            agent: label,
            response,
            partials: partials.len(),
            failed_partials: failed,
        })
    }

    async fn classify(
        &self,
        query_chunks: &[String],
        history_chunks: &[String],
    ) -> Result<AgentLabel, CycleError> {
        let mut candidates = Vec::with_capacity(query_chunks.len() * history_chunks.len());

        for query in query_chunks {
            for history in history_chunks {
                let prompt = format!(
                    "User Query: {} \nChat History: {} \nWhich agent should handle this query? \
                     Return only the agent name without any explanation.",
                    query, history
                );
                match complete(
                    self.classifier.as_ref(),
                    &self.system_prompt,
                    &[prompt.as_str()],
                    CompletionOptions::max_tokens(self.config.classifier_max_tokens),
                )
                .await
                {
                    Ok(raw) => {
                        let candidate = normalize_choice(&raw);
                        if candidate.is_empty() {
                            debug!("Classifier returned an empty reply");
                        } else {
                            candidates.push(candidate);
                        }
                    }
                    Err(e) => warn!("Classification call failed: {:#}", e),
                }
            }
        }

        let Some(decision) = majority_vote(&candidates) else {
            error!("No classification decision from {} calls", query_chunks.len() * history_chunks.len());
            return Err(CycleError::NoDecision);
        };
        debug!("Classifier votes {:?}, winner {}", candidates, decision);

        decision.parse::<AgentLabel>().map_err(|label| {
            error!("Classifier chose unknown agent {:?}", label);
            CycleError::UnrecognizedLabel(label)
        })
    }

    async fn dispatch(
        &self,
        agent: &dyn Agent,
        query_chunks: &[String],
        history_chunks: &[String],
        content: Option<&str>,
    ) -> (Vec<String>, usize) {
        let mut partials = Vec::with_capacity(query_chunks.len() * history_chunks.len());
        let mut failed = 0;

        for query in query_chunks {
            for history in history_chunks {
                let request = AgentRequest {
                    query,
                    history,
                    content,
                };
                match agent.handle_query(&request).await {
                    Ok(reply) => partials.push(reply.into_text()),
                    Err(e) => {
                        warn!("{} agent failed on a chunk: {:#}", agent.label(), e);
                        failed += 1;
                        partials.push(format!("Error: {}", e));
                    }
                }
            }
        }

        (partials, failed)
    }
}

/// Most frequent candidate; ties go to the one seen first
pub fn majority_vote(candidates: &[String]) -> Option<&str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for candidate in candidates {
        *counts.entry(candidate.as_str()).or_default() += 1;
    }
    let best = counts.values().copied().max()?;
    candidates
        .iter()
        .map(String::as_str)
        .find(|candidate| counts.get(candidate) == Some(&best))
}

fn classifier_prompt() -> String {
    let agents = AgentLabel::ALL
        .iter()
        .map(|label| format!("- '{}' → {}", label, label.role()))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nAvailable agents and their roles:\n{}", CLASSIFIER_INTRO, agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRetention;
    use crate::testing::{EchoAgent, ScriptedProvider};

    struct Fixture {
        classifier: Arc<ScriptedProvider>,
        general: Arc<EchoAgent>,
        memory: Arc<ConversationMemory>,
        orchestrator: Orchestrator,
    }

    fn fixture(token_limit: usize, general: EchoAgent) -> Fixture {
        let classifier = Arc::new(ScriptedProvider::new(Vec::<&str>::new()));
        let general = Arc::new(general);
        let memory = Arc::new(ConversationMemory::new(MemoryRetention::Unbounded));
        let registry = AgentRegistry::new()
            .with(general.clone())
            .with(Arc::new(EchoAgent::new(AgentLabel::Word)));
        let config = OrchestratorConfig {
            token_limit,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(
            classifier.clone(),
            registry,
            Chunker::new(DEFAULT_TOKEN_LIMIT).unwrap(),
            memory.clone(),
            config,
        );
        Fixture {
            classifier,
            general,
            memory,
            orchestrator,
        }
    }

    fn votes(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_majority_vote() {
        assert_eq!(majority_vote(&votes(&["a", "b", "a"])), Some("a"));
        assert_eq!(majority_vote(&votes(&["b", "a", "a"])), Some("a"));
        assert_eq!(majority_vote(&votes(&["a", "b"])), Some("a"));
        assert_eq!(majority_vote(&votes(&["b", "a"])), Some("b"));
        assert_eq!(majority_vote(&votes(&["c", "b", "a", "b", "a"])), Some("b"));
        assert_eq!(majority_vote(&[]), None);

        let tie = votes(&["x", "y", "y", "x"]);
        for _ in 0..20 {
            assert_eq!(majority_vote(&tie), Some("x"));
        }
    }

    #[test]
    fn test_classifier_prompt_lists_every_label() {
        let prompt = classifier_prompt();
        for label in AgentLabel::ALL {
            assert!(prompt.contains(&format!("'{}'", label)));
        }
        assert!(!prompt.contains("medical"));
    }

    #[tokio::test]
    async fn test_empty_query_makes_no_calls() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        for query in ["", "   \n\t "] {
            let err = f.orchestrator.route_query(&CycleRequest::new(query)).await.unwrap_err();
            assert!(matches!(err, CycleError::EmptyQuery));
            assert_eq!(err.to_string(), "Error: Empty query provided.");
        }
        assert_eq!(f.classifier.call_count(), 0);
        assert!(f.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_cross_product_dispatch() {
        let f = fixture(4, EchoAgent::new(AgentLabel::General));
        let query = "alpha beta gamma delta epsilon zeta";
        let history = "Human: earlier question\nAI: earlier answer";

        let chunker = Chunker::new(4).unwrap();
        let query_chunks = chunker.chunk(query).unwrap();
        let history_chunks = chunker.chunk(history).unwrap();
        assert!(query_chunks.len() >= 2);
        let pairs = query_chunks.len() * history_chunks.len();
        for _ in 0..pairs {
            f.classifier.push_reply("General");
        }

        let outcome = f
            .orchestrator
            .route_query(&CycleRequest::new(query).with_history(history))
            .await
            .unwrap();

        assert_eq!(f.classifier.call_count(), pairs);
        assert_eq!(f.classifier.requests()[0].max_tokens, Some(10));

        let expected_calls: Vec<(String, String)> = query_chunks
            .iter()
            .flat_map(|q| history_chunks.iter().map(move |h| (q.clone(), h.clone())))
            .collect();
        let calls: Vec<(String, String)> =
            f.general.calls().into_iter().map(|(q, h, _)| (q, h)).collect();
        assert_eq!(calls, expected_calls);

        let expected_response = expected_calls
            .iter()
            .map(|(q, h)| format!("general({}|{})", q, h))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(outcome.agent, AgentLabel::General);
        assert_eq!(outcome.response, expected_response);
        assert_eq!(outcome.partials, pairs);
        assert_eq!(outcome.failed_partials, 0);

        let entries = f.memory.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input, query);
        assert_eq!(entries[0].output, expected_response);
    }

    #[tokio::test]
    async fn test_limit_below_floor_is_tokenizer_error() {
        let f = fixture(2, EchoAgent::new(AgentLabel::General));
        let err = f.orchestrator.route_query(&CycleRequest::new("🎉 party")).await.unwrap_err();
        assert_eq!(err.kind(), "tokenizer");
        assert_eq!(f.classifier.call_count(), 0);
        assert!(f.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_history_comes_from_memory() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        f.memory.record("hi", "hello").await;
        f.classifier.push_reply("general");

        let outcome = f.orchestrator.route_query(&CycleRequest::new("and now?")).await.unwrap();
        assert_eq!(outcome.response, "general(and now?|Human: hi\nAI: hello)");
        assert!(f.classifier.user_content(0).contains("Chat History: Human: hi\nAI: hello \n"));
        assert_eq!(f.memory.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_history_uses_blank_chunk() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        f.classifier.push_reply("general");

        let outcome = f.orchestrator.route_query(&CycleRequest::new("hello")).await.unwrap();
        assert_eq!(outcome.response, "general(hello|)");
        assert_eq!(f.classifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_total_outage_is_no_decision() {
        let f = fixture(4, EchoAgent::new(AgentLabel::General));
        let query = "alpha beta gamma delta epsilon zeta";
        let pairs = Chunker::new(4).unwrap().chunk(query).unwrap().len();
        for _ in 0..pairs {
            f.classifier.push_failure("503 service unavailable");
        }

        let err = f.orchestrator.route_query(&CycleRequest::new(query)).await.unwrap_err();
        assert!(matches!(err, CycleError::NoDecision));
        assert_eq!(err.kind(), "no_decision");
        assert_eq!(f.classifier.call_count(), pairs);
        assert!(f.general.calls().is_empty());
        assert!(f.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_calls_are_skipped_in_vote() {
        let f = fixture(4, EchoAgent::new(AgentLabel::General));
        let query = "alpha beta gamma delta epsilon zeta";
        let pairs = Chunker::new(4).unwrap().chunk(query).unwrap().len();
        f.classifier.push_failure("timeout");
        for _ in 1..pairs {
            f.classifier.push_reply("'general'");
        }

        let outcome = f.orchestrator.route_query(&CycleRequest::new(query)).await.unwrap();
        assert_eq!(outcome.agent, AgentLabel::General);
        assert_eq!(outcome.partials, pairs);
    }

    #[tokio::test]
    async fn test_unrecognized_label() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        f.classifier.push_reply("banana");

        let err = f.orchestrator.route_query(&CycleRequest::new("hello")).await.unwrap_err();
        match err {
            CycleError::UnrecognizedLabel(label) => assert_eq!(label, "banana"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.general.calls().is_empty());
        assert!(f.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregistered_agent_is_unavailable() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        f.classifier.push_reply("gmail");

        let err = f.orchestrator.route_query(&CycleRequest::new("read my mail")).await.unwrap_err();
        assert!(matches!(err, CycleError::AgentUnavailable(AgentLabel::Gmail)));
        assert_eq!(err.kind(), "agent_unavailable");
        assert!(f.memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_agent_failure_becomes_error_partial() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::failing_on(AgentLabel::General, "boom"));
        f.classifier.push_reply("general");

        let outcome = f.orchestrator.route_query(&CycleRequest::new("boom")).await.unwrap();
        assert_eq!(outcome.response, "Error: agent exploded");
        assert_eq!(outcome.failed_partials, 1);
        assert_eq!(f.memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_content_reaches_agent() {
        let f = fixture(DEFAULT_TOKEN_LIMIT, EchoAgent::new(AgentLabel::General));
        f.classifier.push_reply("general");

        f.orchestrator
            .route_query(&CycleRequest::new("summarize").with_content("doc body"))
            .await
            .unwrap();
        assert_eq!(f.general.calls()[0].2.as_deref(), Some("doc body"));
    }

    #[tokio::test]
    async fn test_replay_is_byte_identical() {
        let query = "alpha beta gamma delta epsilon zeta";
        let mut responses = Vec::new();
        for _ in 0..2 {
            let f = fixture(4, EchoAgent::new(AgentLabel::General));
            let pairs = Chunker::new(4).unwrap().chunk(query).unwrap().len();
            for i in 0..pairs {
                f.classifier.push_reply(if i % 2 == 0 { "general" } else { "ms_word_agent" });
            }
            let outcome = f.orchestrator.route_query(&CycleRequest::new(query)).await.unwrap();
            responses.push(outcome.response);
        }
        assert_eq!(responses[0], responses[1]);
    }

    #[tokio::test]
    async fn test_serialized_cycles_record_every_turn() {
        let classifier = Arc::new(ScriptedProvider::new(["general", "general", "general"]));
        let memory = Arc::new(ConversationMemory::default());
        let orchestrator = Arc::new(Orchestrator::new(
            classifier,
            AgentRegistry::new().with(Arc::new(EchoAgent::new(AgentLabel::General))),
            Chunker::new(DEFAULT_TOKEN_LIMIT).unwrap(),
            memory.clone(),
            OrchestratorConfig {
                serialize_cycles: true,
                ..Default::default()
            },
        ));

        let handles: Vec<_> = ["one", "two", "three"]
            .into_iter()
            .map(|q| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.route_query(&CycleRequest::new(q)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(memory.len().await, 3);
    }
}
