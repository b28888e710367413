//! Tantivy full-text retrieval index
//!
//! Every indexed passage belongs to a `source` (for example
//! `project_management` or `pdf:<file_id>`), so callers can restrict searches
//! to one corpus and drop a corpus wholesale.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tantivy::{
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    Index, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// One retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub source: String,
    pub content: String,
    pub score: f32,
}

/// Passage handed to [`SearchIndex::index_documents`]
#[derive(Debug, Clone)]
pub struct IndexedText {
    pub id: String,
    pub content: String,
}

pub struct SearchIndex {
    index: Index,
    id_field: Field,
    source_field: Field,
    content_field: Field,
    created_at_field: Field,
    // one IndexWriter may exist at a time
    write_lock: Mutex<()>,
}

impl SearchIndex {
    /// Create or open an index directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Initializing search index at {:?}", path.as_ref());
        std::fs::create_dir_all(path.as_ref())
            .with_context(|| format!("Failed to create index dir {:?}", path.as_ref()))?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let source_field = schema_builder.add_text_field("source", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let created_at_field = schema_builder.add_text_field("created_at", STRING | STORED);
        let schema = schema_builder.build();

        let index = if path.as_ref().join("meta.json").exists() {
            Index::open_in_dir(path.as_ref()).context("Failed to open search index")?
        } else {
            Index::create_in_dir(path.as_ref(), schema).context("Failed to create search index")?
        };

        Ok(Self {
            index,
            id_field,
            source_field,
            content_field,
            created_at_field,
            write_lock: Mutex::new(()),
        })
    }

    /// Index (or replace) a single passage
    pub fn index_document(&self, id: &str, source: &str, content: &str) -> Result<()> {
        self.index_documents(
            source,
            &[IndexedText {
                id: id.to_string(),
                content: content.to_string(),
            }],
        )
    }

    /// Index a batch of passages under one source with a single commit
    pub fn index_documents(&self, source: &str, docs: &[IndexedText]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        self.with_writer(|writer| {
            let created_at = Utc::now().to_rfc3339();
            for item in docs {
                writer.delete_term(Term::from_field_text(self.id_field, &item.id));

                let mut doc = TantivyDocument::default();
                doc.add_text(self.id_field, &item.id);
                doc.add_text(self.source_field, source);
                doc.add_text(self.content_field, &item.content);
                doc.add_text(self.created_at_field, &created_at);
                writer.add_document(doc)?;
            }
            Ok(())
        })?;

        debug!("Indexed {} passages under {}", docs.len(), source);
        Ok(())
    }

    /// Replace every passage of `source` with `docs`
    pub fn replace_source(&self, source: &str, docs: &[IndexedText]) -> Result<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(self.source_field, source));
            let created_at = Utc::now().to_rfc3339();
            for item in docs {
                let mut doc = TantivyDocument::default();
                doc.add_text(self.id_field, &item.id);
                doc.add_text(self.source_field, source);
                doc.add_text(self.content_field, &item.content);
                doc.add_text(self.created_at_field, &created_at);
                writer.add_document(doc)?;
            }
            Ok(())
        })?;

        debug!("Replaced source {} with {} passages", source, docs.len());
        Ok(())
    }

    /// Drop every passage of a source
    pub fn delete_source(&self, source: &str) -> Result<()> {
        self.with_writer(|writer| {
            writer.delete_term(Term::from_field_text(self.source_field, source));
            Ok(())
        })?;
        debug!("Deleted source {}", source);
        Ok(())
    }

    /// Search passages, optionally restricted to one source.
    /// Query syntax errors are tolerated: unparsable fragments are ignored.
    pub fn search(&self, query_str: &str, source: Option<&str>, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 || query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (parsed, errors) = query_parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            warn!("Ignored {} malformed fragments in query '{}'", errors.len(), query_str);
        }

        let query: Box<dyn Query> = match source {
            Some(source) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, parsed),
                (
                    Occur::Must,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.source_field, source),
                        IndexRecordOption::Basic,
                    )),
                ),
            ])),
            None => parsed,
        };

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            results.push(SearchResult {
                id: self.text_of(&doc, self.id_field),
                source: self.text_of(&doc, self.source_field),
                content: self.text_of(&doc, self.content_field),
                score,
            });
        }

        debug!("Search for '{}' returned {} results", query_str, results.len());
        Ok(results)
    }

    /// Number of live passages
    pub fn count(&self) -> Result<u64> {
        let reader = self.index.reader()?;
        Ok(reader.searcher().num_docs())
    }

    fn text_of(&self, doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|v: &OwnedValue| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    fn with_writer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| {
            warn!("Index write lock was poisoned, recovering");
            poisoned.into_inner()
        });
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;
        f(&mut writer)?;
        writer.commit().context("Failed to commit index")?;
        Ok(())
    }
}
