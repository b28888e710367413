//! Conversation memory shared across cycles
//!
//! One owned instance lives behind an `Arc` held by both the orchestrator and
//! the gateway. Entries are appended once per completed cycle and never
//! edited; the retention policy decides whether old turns are dropped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryRetention {
    #[default]
    Unbounded,
    /// Keep only the newest `n` turns
    Window(usize),
}

impl MemoryRetention {
    /// `0` means unbounded
    pub fn from_max_turns(max_turns: usize) -> Self {
        match max_turns {
            0 => Self::Unbounded,
            n => Self::Window(n),
        }
    }

    /// Inverse of `from_max_turns`
    pub fn max_turns(&self) -> usize {
        match self {
            Self::Unbounded => 0,
            Self::Window(n) => *n,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConversationMemory {
    entries: RwLock<VecDeque<MemoryEntry>>,
    retention: MemoryRetention,
}

impl ConversationMemory {
    pub fn new(retention: MemoryRetention) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            retention,
        }
    }

    pub fn retention(&self) -> MemoryRetention {
        self.retention
    }

    pub async fn record(&self, input: impl Into<String>, output: impl Into<String>) {
        let mut entries = self.entries.write().await;
        entries.push_back(MemoryEntry {
            input: input.into(),
            output: output.into(),
        });
        if let MemoryRetention::Window(n) = self.retention {
            while entries.len() > n {
                entries.pop_front();
            }
        }
        debug!("Memory now holds {} turns", entries.len());
    }

    /// All turns flattened as `Human: ..\nAI: ..`, one turn per line pair
    pub async fn snapshot(&self) -> String {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|e| format!("Human: {}\nAI: {}", e.input, e.output))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
