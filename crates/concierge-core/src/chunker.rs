//! Token-bounded text chunking
//!
//! Text is encoded with the `cl100k_base` BPE and cut into consecutive,
//! non-overlapping windows of at most `limit` tokens. A window that would end
//! inside a multi-byte character is shortened to the nearest boundary that
//! decodes cleanly, so joining the chunks always reproduces the input.
//! Windows never grow past the limit: when no clean boundary fits, chunking
//! fails instead. Boundaries ignore sentences and words.

use anyhow::{Result, anyhow, bail};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Default budget, below the provider's 5000-token request ceiling
pub const DEFAULT_TOKEN_LIMIT: usize = 4000;

/// Smallest accepted limit. A UTF-8 character is at most four bytes and
/// every byte has its own token, so any single character fits one window.
pub const MIN_TOKEN_LIMIT: usize = 4;

#[derive(Clone)]
pub struct Chunker {
    bpe: Arc<CoreBPE>,
    limit: usize,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("encoding", &"cl100k_base")
            .field("limit", &self.limit)
            .finish()
    }
}

impl Chunker {
    pub fn new(limit: usize) -> Result<Self> {
        check_limit(limit)?;
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self {
            bpe: Arc::new(bpe),
            limit,
        })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split with the configured limit
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        self.chunk_with_limit(text, self.limit)
    }

    /// Empty or whitespace-only input yields no chunks
    pub fn chunk_with_limit(&self, text: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .windows(text, limit)?
            .into_iter()
            .map(|(_, chunk)| chunk)
            .collect())
    }

    /// Chunks paired with the number of tokens in their window
    fn windows(&self, text: &str, limit: usize) -> Result<Vec<(usize, String)>> {
        check_limit(limit)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.bpe.encode_ordinary(text);
        let mut windows = Vec::with_capacity(tokens.len() / limit + 1);
        let mut start = 0;

        while start < tokens.len() {
            let max_end = (start + limit).min(tokens.len());
            let (end, chunk) = (start + 1..=max_end)
                .rev()
                .find_map(|end| {
                    self.bpe
                        .decode(tokens[start..end].to_vec())
                        .ok()
                        .map(|chunk| (end, chunk))
                })
                .ok_or_else(|| {
                    anyhow!(
                        "no character boundary within {} tokens at token {}",
                        limit,
                        start
                    )
                })?;
            windows.push((end - start, chunk));
            start = end;
        }

        debug!(
            "Chunked {} tokens into {} chunks (limit {})",
            tokens.len(),
            windows.len(),
            limit
        );
        Ok(windows)
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit < MIN_TOKEN_LIMIT {
        bail!(
            "chunk token limit must be at least {}, got {}",
            MIN_TOKEN_LIMIT,
            limit
        );
    }
    Ok(())
}
