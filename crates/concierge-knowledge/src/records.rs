//! Project, program and task record services
//!
//! Thin layer over [`DocumentStore`] carrying the rules of the
//! project-management API: comma-separated id filters, required fields for
//! programs, and unwrapping of single-key wrapper bodies.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::{
    parse_id_list, unwrap_single_wrapper, DocumentStore, StoreError, StoreResult, PROGRAMS,
    PROJECTS, TASKS,
};

const PROGRAM_REQUIRED_FIELDS: [&str; 6] = [
    "name",
    "description",
    "manager_id",
    "start_date",
    "end_date",
    "portfolio_id",
];

#[derive(Clone)]
pub struct RecordService {
    store: Arc<DocumentStore>,
}

impl RecordService {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// All projects, or those whose ids appear in the comma-separated list
    pub async fn projects(&self, ids: Option<&str>) -> StoreResult<Vec<JsonValue>> {
        self.list(PROJECTS, ids).await
    }

    pub async fn projects_by_program(&self, program_ids: Option<&str>) -> StoreResult<Vec<JsonValue>> {
        self.list_by(PROJECTS, "program_id", "programIds", program_ids).await
    }

    pub async fn projects_by_portfolio(
        &self,
        portfolio_ids: Option<&str>,
    ) -> StoreResult<Vec<JsonValue>> {
        self.list_by(PROJECTS, "portfolio_id", "portfolioIds", portfolio_ids).await
    }

    /// Store a project and return it with its `_id`
    pub async fn create_project(&self, body: JsonValue) -> StoreResult<JsonValue> {
        let doc = self.store.insert(PROJECTS, unwrap_single_wrapper(body)).await?;
        info!("Created project {}", doc.id);
        Ok(doc.body)
    }

    pub async fn programs(&self, ids: Option<&str>) -> StoreResult<Vec<JsonValue>> {
        self.list(PROGRAMS, ids).await
    }

    pub async fn programs_by_portfolio(
        &self,
        portfolio_ids: Option<&str>,
    ) -> StoreResult<Vec<JsonValue>> {
        self.list_by(PROGRAMS, "portfolio_id", "portfolioIds", portfolio_ids).await
    }

    pub async fn create_program(&self, body: JsonValue) -> StoreResult<JsonValue> {
        let body = unwrap_single_wrapper(body);
        for field in PROGRAM_REQUIRED_FIELDS {
            if !is_present(body.get(field)) {
                return Err(StoreError::MissingField(field.to_string()));
            }
        }

        let doc = self.store.insert(PROGRAMS, body).await?;
        info!("Created program {}", doc.id);
        Ok(json!({
            "message": "Program created successfully",
            "program": doc.body,
        }))
    }

    pub async fn tasks(&self, ids: Option<&str>) -> StoreResult<Vec<JsonValue>> {
        self.list(TASKS, ids).await
    }

    pub async fn create_task(&self, body: JsonValue) -> StoreResult<JsonValue> {
        let doc = self.store.insert(TASKS, unwrap_single_wrapper(body)).await?;
        info!("Created task {}", doc.id);
        Ok(doc.body)
    }

    async fn list(&self, collection: &str, ids: Option<&str>) -> StoreResult<Vec<JsonValue>> {
        let ids = ids.map(parse_id_list).filter(|ids| !ids.is_empty());
        let docs = self.store.get(collection, ids.as_deref()).await?;
        debug!("Fetched {} documents from {}", docs.len(), collection);
        Ok(docs.into_iter().map(|d| d.body).collect())
    }

    async fn list_by(
        &self,
        collection: &str,
        field: &str,
        param: &str,
        raw: Option<&str>,
    ) -> StoreResult<Vec<JsonValue>> {
        let values = raw.map(parse_id_list).unwrap_or_default();
        if values.is_empty() {
            return Err(StoreError::MissingField(param.to_string()));
        }
        if let Some(bad) = values.iter().find(|v| Uuid::parse_str(v).is_err()) {
            return Err(StoreError::InvalidId(bad.clone()));
        }

        let docs = self.store.find_by_field(collection, field, &values).await?;
        Ok(docs.into_iter().map(|d| d.body).collect())
    }
}

/// Present means non-null, non-empty string, and not `false`/`0`
fn is_present(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::String(s)) => !s.trim().is_empty(),
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
    }
}
