//! Storage and retrieval layer for concierge
//!
//! This crate provides:
//! - SQLite document store for project, program and task records
//! - Record services with the validation rules of the project-management API
//! - Tantivy full-text index used for project retrieval and document QA
//! - Uploaded-document library (PDF text extraction + passage indexing)

pub mod documents;
pub mod index;
pub mod library;
pub mod records;

pub use documents::{Document, DocumentStore, StoreError, StoreResult, PROGRAMS, PROJECTS, TASKS};
pub use index::{IndexedText, SearchIndex, SearchResult};
pub use library::{DocumentLibrary, LibraryError, UploadedDocument};
pub use records::RecordService;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_and_index_integration() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DocumentStore::new(dir.path().join("records.db"))?;
        let index = SearchIndex::new(dir.path().join("index"))?;

        let doc = store
            .insert(PROJECTS, json!({"name": "Harbor bridge", "description": "Replace the harbor bridge deck"}))
            .await?;
        index.index_document(&doc.id, "project_management", &doc.flattened_text())?;

        let results = index.search("harbor", Some("project_management"), 10)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, doc.id);

        let library = DocumentLibrary::new(Arc::new(index));
        assert!(library.latest_file_id().await.is_none());
        Ok(())
    }
}
