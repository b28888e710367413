//! Uploaded-document library
//!
//! Extracts text from uploaded PDFs, splits it into overlapping passages and
//! indexes them under `pdf:<file_id>`. The most recent upload is the one
//! document QA answers from; the passages of the upload it replaces are
//! dropped from the index.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::index::{IndexedText, SearchIndex};

pub const PASSAGE_CHARS: usize = 500;
pub const PASSAGE_OVERLAP: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("No text could be extracted from the document")]
    EmptyDocument,
    #[error("Failed to read PDF: {0}")]
    Extract(String),
    #[error(transparent)]
    Index(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub file_id: String,
    pub passages: usize,
}

pub struct DocumentLibrary {
    index: Arc<SearchIndex>,
    latest: RwLock<Option<String>>,
}

impl DocumentLibrary {
    pub fn new(index: Arc<SearchIndex>) -> Self {
        Self {
            index,
            latest: RwLock::new(None),
        }
    }

    /// Extract and index an uploaded PDF
    pub async fn upload_pdf(&self, bytes: Vec<u8>) -> Result<UploadedDocument, LibraryError> {
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| LibraryError::Extract(format!("extraction task failed: {}", e)))?
            .map_err(|e| LibraryError::Extract(e.to_string()))?;

        self.ingest_text(&text).await
    }

    /// Index already-extracted text as a new document
    pub async fn ingest_text(&self, text: &str) -> Result<UploadedDocument, LibraryError> {
        let passages = split_passages(text, PASSAGE_CHARS, PASSAGE_OVERLAP);
        if passages.is_empty() {
            return Err(LibraryError::EmptyDocument);
        }

        let file_id = Uuid::new_v4().to_string();
        let docs: Vec<IndexedText> = passages
            .into_iter()
            .enumerate()
            .map(|(i, content)| IndexedText {
                id: format!("{}-{}", file_id, i),
                content,
            })
            .collect();

        let index = Arc::clone(&self.index);
        let source = source_for(&file_id);
        let count = docs.len();
        tokio::task::spawn_blocking(move || index.index_documents(&source, &docs))
            .await
            .map_err(|e| LibraryError::Index(anyhow::anyhow!("index task failed: {}", e)))??;

        let previous = self.latest.write().await.replace(file_id.clone());
        info!("Indexed document {} ({} passages)", file_id, count);

        if let Some(previous) = previous {
            let index = Arc::clone(&self.index);
            let source = source_for(&previous);
            tokio::task::spawn_blocking(move || index.delete_source(&source))
                .await
                .map_err(|e| LibraryError::Index(anyhow::anyhow!("index task failed: {}", e)))??;
            debug!("Dropped passages of replaced document {}", previous);
        }

        Ok(UploadedDocument {
            file_id,
            passages: count,
        })
    }

    /// Live passages across the whole index
    pub async fn indexed_passages(&self) -> anyhow::Result<u64> {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.count())
            .await
            .map_err(|e| anyhow::anyhow!("count task failed: {}", e))?
    }

    pub async fn latest_file_id(&self) -> Option<String> {
        self.latest.read().await.clone()
    }

    /// Top `k` passages of the latest document for `query`.
    /// `None` when nothing has been uploaded yet.
    pub async fn retrieve(&self, query: &str, k: usize) -> anyhow::Result<Option<Vec<String>>> {
        let Some(file_id) = self.latest_file_id().await else {
            return Ok(None);
        };

        let index = Arc::clone(&self.index);
        let query = query.to_string();
        let source = source_for(&file_id);
        let hits = tokio::task::spawn_blocking(move || index.search(&query, Some(&source), k))
            .await
            .map_err(|e| anyhow::anyhow!("search task failed: {}", e))??;

        debug!("Retrieved {} passages from {}", hits.len(), file_id);
        Ok(Some(hits.into_iter().map(|h| h.content).collect()))
    }
}

fn source_for(file_id: &str) -> String {
    format!("pdf:{}", file_id)
}

/// Fixed-size character windows with overlap; blank windows are dropped
pub fn split_passages(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }

    let step = size.saturating_sub(overlap).max(1);
    let mut passages = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        let passage: String = chars[start..end].iter().collect();
        let passage = passage.trim();
        if !passage.is_empty() {
            passages.push(passage.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    passages
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library(dir: &TempDir) -> DocumentLibrary {
        DocumentLibrary::new(Arc::new(SearchIndex::new(dir.path()).unwrap()))
    }

    #[test]
    fn test_split_passages_overlap() {
        let text = "x".repeat(1200);
        let passages = split_passages(&text, 500, 50);
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].len(), 500);
        assert_eq!(passages[1].len(), 500);
        assert_eq!(passages[2].len(), 300);
    }

    #[test]
    fn test_split_passages_short_and_empty() {
        assert_eq!(split_passages("short text", 500, 50), vec!["short text"]);
        assert!(split_passages("  \n ", 500, 50).is_empty());
    }

    #[test]
    fn test_split_passages_multibyte() {
        let text = "é".repeat(600);
        let passages = split_passages(&text, 500, 50);
        assert_eq!(passages[0].chars().count(), 500);
    }

    #[tokio::test]
    async fn test_retrieve_without_upload() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        assert!(lib.retrieve("anything", 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_and_retrieve_latest_only() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);

        let first = lib.ingest_text("The contract covers bridge maintenance.").await.unwrap();
        let second = lib.ingest_text("The invoice covers tunnel maintenance.").await.unwrap();
        assert_ne!(first.file_id, second.file_id);
        assert_eq!(lib.latest_file_id().await, Some(second.file_id.clone()));

        let passages = lib.retrieve("maintenance", 3).await.unwrap().unwrap();
        assert_eq!(passages.len(), 1);
        assert!(passages[0].contains("tunnel"));
    }

    #[tokio::test]
    async fn test_new_upload_drops_replaced_passages() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);

        let first = lib.ingest_text(&"bridge ".repeat(200)).await.unwrap();
        assert!(first.passages > 1);
        assert_eq!(lib.indexed_passages().await.unwrap(), first.passages as u64);

        let second = lib.ingest_text("The invoice covers tunnel maintenance.").await.unwrap();
        assert_eq!(lib.indexed_passages().await.unwrap(), second.passages as u64);
    }

    #[tokio::test]
    async fn test_ingest_empty_rejected() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let err = lib.ingest_text("   ").await.unwrap_err();
        assert!(matches!(err, LibraryError::EmptyDocument));
        assert!(lib.latest_file_id().await.is_none());
    }

    #[tokio::test]
    async fn test_upload_invalid_pdf() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        let err = lib.upload_pdf(b"definitely not a pdf".to_vec()).await.unwrap_err();
        assert!(matches!(err, LibraryError::Extract(_)));
    }
}
