//! SQLite document store for project-management records

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PROJECTS: &str = "projects";
pub const PROGRAMS: &str = "programs";
pub const TASKS: &str = "tasks";

/// Errors callers of the store branch on
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid id format: {0}")]
    InvalidId(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid input data: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stored record. `body` always carries its own `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub body: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Flatten the body into `key: value` pairs, nested keys joined with `_`.
    /// The collection name is included so retrieval can attribute hits.
    pub fn flattened_text(&self) -> String {
        let mut pairs = vec![format!("collection_name: {}", self.collection)];
        flatten_into(&self.body, "", &mut pairs);
        pairs.join(" ")
    }
}

fn flatten_into(value: &JsonValue, prefix: &str, out: &mut Vec<String>) {
    match value {
        JsonValue::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}_{}", prefix, k)
                };
                flatten_into(v, &key, out);
            }
        }
        JsonValue::String(s) => out.push(format!("{}: {}", prefix, s)),
        other => out.push(format!("{}: {}", prefix, other)),
    }
}

/// Document store wrapper (thread-safe via Arc<Mutex>)
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl DocumentStore {
    /// Open (or create) the database file and initialize the schema
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        info!("Initializing document store at {:?}", path.as_ref());
        Self::init(conn)
    }

    /// Volatile store, lost when dropped
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
            [],
        )?;

        debug!("Document schema initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a JSON object into a collection, returning the stored document
    pub async fn insert(&self, collection: &str, body: JsonValue) -> StoreResult<Document> {
        let JsonValue::Object(mut map) = body else {
            return Err(StoreError::InvalidDocument(
                "document body must be a JSON object".to_string(),
            ));
        };

        let id = Uuid::new_v4().to_string();
        map.insert("_id".to_string(), JsonValue::String(id.clone()));
        let document = Document {
            id,
            collection: collection.to_owned(),
            body: JsonValue::Object(map),
            created_at: Utc::now(),
        };

        let conn = Arc::clone(&self.conn);
        let row = document.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let body = serde_json::to_string(&row.body)?;
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            conn.execute(
                "INSERT INTO documents (id, collection, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![&row.id, &row.collection, body, row.created_at.to_rfc3339()],
            )?;
            debug!("Inserted document {} into {}", row.id, row.collection);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")??;

        Ok(document)
    }

    /// Documents of a collection, optionally restricted to the given ids
    pub async fn get(&self, collection: &str, ids: Option<&[String]>) -> StoreResult<Vec<Document>> {
        let ids = match ids {
            Some(ids) => Some(validate_ids(ids)?),
            None => None,
        };
        if matches!(&ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let conn = Arc::clone(&self.conn);
        let collection = collection.to_owned();
        let docs = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Document>> {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });

            let mut values = vec![collection];
            let sql = match ids {
                Some(ids) => {
                    let placeholders = placeholders(2, ids.len());
                    values.extend(ids);
                    format!(
                        "SELECT id, collection, body, created_at FROM documents
                         WHERE collection = ?1 AND id IN ({})
                         ORDER BY created_at, rowid",
                        placeholders
                    )
                }
                None => "SELECT id, collection, body, created_at FROM documents
                         WHERE collection = ?1
                         ORDER BY created_at, rowid"
                    .to_string(),
            };

            let mut stmt = conn.prepare(&sql)?;
            let docs = stmt
                .query_map(params_from_iter(values.iter()), Self::row_to_document)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(docs)
        })
        .await
        .context("spawn_blocking task panicked")??;

        Ok(docs)
    }

    /// Documents whose top-level `field` matches one of `values` (compared as text)
    pub async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> StoreResult<Vec<Document>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::InvalidDocument(format!("invalid field name '{}'", field)));
        }

        let conn = Arc::clone(&self.conn);
        let mut bound = vec![collection.to_owned(), format!("$.{}", field)];
        bound.extend(values.iter().cloned());
        let count = values.len();

        let docs = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Document>> {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let sql = format!(
                "SELECT id, collection, body, created_at FROM documents
                 WHERE collection = ?1 AND CAST(json_extract(body, ?2) AS TEXT) IN ({})
                 ORDER BY created_at, rowid",
                placeholders(3, count)
            );
            let mut stmt = conn.prepare(&sql)?;
            let docs = stmt
                .query_map(params_from_iter(bound.iter()), Self::row_to_document)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(docs)
        })
        .await
        .context("spawn_blocking task panicked")??;

        Ok(docs)
    }

    /// Every stored document across all collections
    pub async fn all(&self) -> StoreResult<Vec<Document>> {
        let conn = Arc::clone(&self.conn);
        let docs = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Document>> {
            let conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            let mut stmt = conn.prepare(
                "SELECT id, collection, body, created_at FROM documents
                 ORDER BY collection, created_at, rowid",
            )?;
            let docs = stmt
                .query_map([], Self::row_to_document)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(docs)
        })
        .await
        .context("spawn_blocking task panicked")??;

        Ok(docs)
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        let body_str: String = row.get(2)?;
        let body = serde_json::from_str(&body_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Document {
            id: row.get(0)?,
            collection: row.get(1)?,
            body,
            created_at: row
                .get::<_, String>(3)?
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

/// Unwrap `{"project": {...}}` style bodies into the inner object
pub fn unwrap_single_wrapper(body: JsonValue) -> JsonValue {
    match body {
        JsonValue::Object(map) if map.len() == 1 && map.values().all(JsonValue::is_object) => {
            map.into_iter()
                .next()
                .map(|(_, inner)| inner)
                .unwrap_or_else(|| JsonValue::Object(Map::new()))
        }
        other => other,
    }
}

/// Split a comma-separated id list, dropping blanks
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn validate_ids(ids: &[String]) -> StoreResult<Vec<String>> {
    ids.iter()
        .map(|id| {
            Uuid::parse_str(id)
                .map(|_| id.clone())
                .map_err(|_| StoreError::InvalidId(id.clone()))
        })
        .collect()
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
