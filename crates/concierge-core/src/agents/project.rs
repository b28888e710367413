//! Project-management agent: create projects from conversation, answer
//! questions over stored project records

use anyhow::{Context, Result};
use async_trait::async_trait;
use concierge_knowledge::{Document, IndexedText, RecordService, SearchIndex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{normalize_choice, strip_code_fences, Agent};
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

/// Index source holding flattened project-management records
pub const PROJECT_SOURCE: &str = "project_management";

const SYSTEM_PROMPT: &str = "You are an AI assistant for project management.";
const RETRIEVAL_LIMIT: usize = 10;

pub const PROJECT_FIELDS: [&str; 11] = [
    "name",
    "description",
    "department_id",
    "portfolio_id",
    "program_id",
    "funding_source",
    "total_budget",
    "status",
    "start_date",
    "end_date",
    "created_by",
];

pub struct ProjectAgent {
    llm: Arc<dyn LlmProvider>,
    records: RecordService,
    index: Arc<SearchIndex>,
}

impl ProjectAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, records: RecordService, index: Arc<SearchIndex>) -> Self {
        Self { llm, records, index }
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        complete(self.llm.as_ref(), SYSTEM_PROMPT, &[prompt], CompletionOptions::default()).await
    }

    async fn wants_new_project(&self, query: &str) -> Result<bool> {
        let prompt = format!(
            "User Query: {}\n\
             Identify the user's intent and respond with only one of the following:\n\
             - 'create_project' if the user wants to create a new project.\n\
             - 'get_project_details' if the user wants details about an existing project.\n\
             Respond with only one of these two words.",
            query
        );
        let intent = normalize_choice(&self.ask(&prompt).await?);
        debug!("Project intent: {}", intent);
        Ok(intent == "create_project")
    }

    async fn create_project(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let fields = PROJECT_FIELDS
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "User Query: {}, Chat History: {}\n\
             Extract the following fields from the query:\n{}\n\
             Respond with a JSON object containing the extracted values. No extra text, just the JSON object.",
            request.query, request.history, fields
        );
        let extracted = parse_project_fields(&self.ask(&prompt).await?);

        let missing = missing_fields(&extracted);
        if !missing.is_empty() {
            info!("Project details incomplete, missing {:?}", missing);
            let prompt = format!(
                "The user wants to create a project but is missing the following details: {}.\n\
                 Ask a follow-up question to get the missing details.",
                missing.join(", ")
            );
            return Ok(AgentReply::Text(self.ask(&prompt).await?));
        }

        let stored = self.records.create_project(project_record(&extracted)).await?;
        Ok(AgentReply::Structured(stored))
    }

    async fn describe_projects(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let documents = self.sync_index().await?;

        let index = Arc::clone(&self.index);
        let query = request.query.to_string();
        let hits = tokio::task::spawn_blocking(move || {
            index.search(&query, Some(PROJECT_SOURCE), RETRIEVAL_LIMIT)
        })
        .await
        .context("search task panicked")??;

        let context = hits
            .iter()
            .map(|hit| match documents.get(&hit.id) {
                Some(doc) => format!("- {}: {}", doc.collection, describe(&doc.body)),
                None => format!("- {}", hit.content),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Question: {}\nChat History: {}\nContext:\n{}\nAnswer:",
            request.query, request.history, context
        );
        Ok(AgentReply::Text(self.ask(&prompt).await?))
    }

    /// Re-index every stored record; returns them keyed by id
    async fn sync_index(&self) -> Result<HashMap<String, Document>> {
        let documents = self.records.store().all().await?;
        let passages: Vec<IndexedText> = documents
            .iter()
            .map(|doc| IndexedText {
                id: doc.id.clone(),
                content: doc.flattened_text(),
            })
            .collect();

        let index = Arc::clone(&self.index);
        let count = passages.len();
        tokio::task::spawn_blocking(move || index.replace_source(PROJECT_SOURCE, &passages))
            .await
            .context("index task panicked")??;
        debug!("Synced {} records into the retrieval index", count);

        Ok(documents.into_iter().map(|d| (d.id.clone(), d)).collect())
    }
}

#[async_trait]
impl Agent for ProjectAgent {
    fn label(&self) -> AgentLabel {
        AgentLabel::Project
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        if self.wants_new_project(request.query).await? {
            self.create_project(request).await
        } else {
            self.describe_projects(request).await
        }
    }
}

/// JSON object from the extraction reply; anything unparsable is empty
fn parse_project_fields(raw: &str) -> Map<String, Value> {
    let cleaned = strip_code_fences(raw).replace(['\n', '\t'], " ");
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => map,
        _ => {
            debug!("Unparsable project details: {:?}", raw);
            Map::new()
        }
    }
}

fn missing_fields(extracted: &Map<String, Value>) -> Vec<&'static str> {
    PROJECT_FIELDS
        .into_iter()
        .filter(|field| match extracted.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            Some(Value::Bool(b)) => !b,
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
        })
        .collect()
}

/// Record with exactly the project fields, defaults for anything absent
fn project_record(extracted: &Map<String, Value>) -> Value {
    let mut record = Map::new();
    for field in PROJECT_FIELDS {
        let default = match field {
            "total_budget" => Value::from(0),
            "status" => Value::from("Pending"),
            _ => Value::from(""),
        };
        record.insert(
            field.to_string(),
            extracted.get(field).cloned().unwrap_or(default),
        );
    }
    Value::Object(record)
}

fn describe(body: &Value) -> String {
    ["description", "risk_description", "name"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or("No description available")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use concierge_knowledge::{DocumentStore, PROJECTS, TASKS};
    use serde_json::json;
    use tempfile::TempDir;

    fn agent(llm: Arc<ScriptedProvider>, dir: &TempDir) -> (ProjectAgent, RecordService) {
        let records = RecordService::new(Arc::new(DocumentStore::open_in_memory().unwrap()));
        let index = Arc::new(SearchIndex::new(dir.path()).unwrap());
        (ProjectAgent::new(llm, records.clone(), index), records)
    }

    fn complete_fields() -> String {
        json!({
            "name": "Harbor bridge",
            "description": "Replace the bridge deck",
            "department_id": "d1",
            "portfolio_id": "pf1",
            "program_id": "pg1",
            "funding_source": "federal",
            "total_budget": 1200000,
            "status": "Planned",
            "start_date": "2025-03-01",
            "end_date": "2026-03-01",
            "created_by": "ana",
            "extra": "ignored"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_create_with_missing_fields_asks_follow_up() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedProvider::new([
            "create_project",
            "```json\n{\"name\": \"Depot\", \"status\": \"\"}\n```",
            "What is the description and budget?",
        ]));
        let (agent, records) = agent(llm.clone(), &dir);

        let reply = agent
            .handle_query(&AgentRequest::new("create a project called Depot", ""))
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::from("What is the description and budget?"));

        let follow_up = llm.user_content(2);
        assert!(follow_up.contains("description, department_id"));
        assert!(follow_up.contains("status"));
        assert!(!follow_up.contains("name,"));
        assert!(records.projects(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_complete_project() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedProvider::new(["'create_project'".to_string(), complete_fields()]));
        let (agent, records) = agent(llm, &dir);

        let reply = agent
            .handle_query(&AgentRequest::new("create the harbor bridge project", ""))
            .await
            .unwrap();
        let AgentReply::Structured(stored) = reply else {
            panic!("expected structured reply");
        };
        assert_eq!(stored["name"], "Harbor bridge");
        assert!(stored["_id"].is_string());
        assert!(stored.get("extra").is_none());

        assert_eq!(records.projects(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_details_uses_indexed_records() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedProvider::new([
            "get_project_details",
            "The harbor bridge is planned.",
        ]));
        let (agent, records) = agent(llm.clone(), &dir);
        records
            .store()
            .insert(PROJECTS, json!({"name": "Harbor bridge", "description": "Harbor deck replacement"}))
            .await
            .unwrap();
        records
            .store()
            .insert(TASKS, json!({"name": "Harbor survey"}))
            .await
            .unwrap();

        let reply = agent
            .handle_query(&AgentRequest::new("what is happening at the harbor", "Human: hi\nAI: hello"))
            .await
            .unwrap();
        assert_eq!(reply, AgentReply::from("The harbor bridge is planned."));

        let prompt = llm.user_content(1);
        assert!(prompt.starts_with("Question: what is happening at the harbor\nChat History: Human: hi\nAI: hello\nContext:\n"));
        assert!(prompt.contains("- projects: Harbor deck replacement"));
        assert!(prompt.contains("- tasks: Harbor survey"));
        assert!(prompt.ends_with("\nAnswer:"));
    }

    #[test]
    fn test_missing_fields() {
        let mut extracted = Map::new();
        for field in PROJECT_FIELDS {
            extracted.insert(field.to_string(), json!("x"));
        }
        assert!(missing_fields(&extracted).is_empty());

        extracted.insert("total_budget".to_string(), json!(0));
        extracted.remove("created_by");
        assert_eq!(missing_fields(&extracted), vec!["total_budget", "created_by"]);
    }

    #[test]
    fn test_describe_prefers_description() {
        assert_eq!(describe(&json!({"name": "n", "description": "d"})), "d");
        assert_eq!(describe(&json!({"name": "n", "risk_description": "r"})), "r");
        assert_eq!(describe(&json!({"name": "n"})), "n");
        assert_eq!(describe(&json!({})), "No description available");
    }
}
