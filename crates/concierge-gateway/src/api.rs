//! Request/response bodies and error mapping for the HTTP surface

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use concierge_core::CycleError;
use concierge_knowledge::{LibraryError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

pub const NO_QUESTION_REPLY: &str = "No user question provided.";
pub const BROWSER_ACK: &str = "Request processed successfully";

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(rename = "userChatQuery", default)]
    pub user_chat_query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body posted by the Word, Excel and Outlook add-ins
#[derive(Debug, Deserialize)]
pub struct OfficeRequest {
    #[serde(default)]
    pub data: String,
    #[serde(rename = "userQuery", default)]
    pub user_query: Option<String>,
    #[serde(rename = "chatHistory", default)]
    pub chat_history: Option<String>,
}

impl OfficeRequest {
    pub fn question(&self) -> Option<&str> {
        non_blank(self.user_query.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct BrowserRequest {
    pub action: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "userQuestion", default)]
    pub user_question: Option<String>,
}

impl BrowserRequest {
    pub fn question(&self) -> Option<&str> {
        non_blank(self.user_question.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectIdsQuery {
    #[serde(rename = "projectIds")]
    pub project_ids: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgramIdsQuery {
    #[serde(rename = "programIds")]
    pub program_ids: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PortfolioIdsQuery {
    #[serde(rename = "portfolioIds")]
    pub portfolio_ids: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskIdsQuery {
    #[serde(rename = "taskIds", alias = "tasktIds")]
    pub task_ids: Option<String>,
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Everything a handler can fail with
#[derive(Debug)]
pub enum ApiError {
    /// Cycle failure; `field` names the reply key of the endpoint
    Cycle { field: &'static str, error: CycleError },
    Store(StoreError),
    Library(LibraryError),
    BadRequest(String),
    Unavailable(String),
}

impl ApiError {
    pub fn cycle(field: &'static str, error: CycleError) -> Self {
        Self::Cycle { field, error }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        Self::Library(e)
    }
}

fn detail(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Cycle { field, error } => {
                let status = match &error {
                    CycleError::EmptyQuery => StatusCode::BAD_REQUEST,
                    CycleError::NoDecision | CycleError::UnrecognizedLabel(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    CycleError::AgentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    CycleError::Tokenizer(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = error.to_string();
                warn!("Cycle failed ({}): {}", error.kind(), message);
                let mut body = serde_json::Map::new();
                body.insert(
                    "error".to_string(),
                    json!({ "kind": error.kind(), "message": message }),
                );
                body.insert(field.to_string(), json!(message));
                (status, Json(serde_json::Value::Object(body))).into_response()
            }
            Self::Store(StoreError::InvalidId(id)) => {
                warn!("Rejected invalid id {:?}", id);
                detail(StatusCode::BAD_REQUEST, "Invalid id format")
            }
            Self::Store(e @ (StoreError::MissingField(_) | StoreError::InvalidDocument(_))) => {
                detail(StatusCode::BAD_REQUEST, e.to_string())
            }
            Self::Store(StoreError::Backend(e)) => {
                error!("Storage failure: {:#}", e);
                detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {}", e))
            }
            Self::Library(LibraryError::EmptyDocument) => {
                detail(StatusCode::BAD_REQUEST, "No extractable text found in the PDF.")
            }
            Self::Library(e) => {
                error!("Upload failed: {}", e);
                detail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error processing PDF: {}", e),
                )
            }
            Self::BadRequest(message) => detail(StatusCode::BAD_REQUEST, message),
            Self::Unavailable(message) => detail(StatusCode::SERVICE_UNAVAILABLE, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::AgentLabel;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cycle_error_body() {
        let response = ApiError::cycle("response", CycleError::NoDecision).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["kind"], "no_decision");
        assert_eq!(body["response"], body["error"]["message"]);
    }

    #[tokio::test]
    async fn test_cycle_error_statuses() {
        let cases = [
            (CycleError::EmptyQuery, StatusCode::BAD_REQUEST),
            (CycleError::UnrecognizedLabel("banana".into()), StatusCode::BAD_GATEWAY),
            (CycleError::AgentUnavailable(AgentLabel::Gmail), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::cycle("message", error).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_store_errors() {
        let response = ApiError::from(StoreError::InvalidId("zz".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Invalid id format");

        let response =
            ApiError::from(StoreError::Backend(anyhow::anyhow!("disk full"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_office_request_question() {
        let request: OfficeRequest =
            serde_json::from_str(r#"{"data": "x", "userQuery": "  "}"#).unwrap();
        assert!(request.question().is_none());

        let request: OfficeRequest = serde_json::from_str(r#"{"userQuery": "total?"}"#).unwrap();
        assert_eq!(request.question(), Some("total?"));
        assert_eq!(request.data, "");
    }

    #[test]
    fn test_task_ids_alias() {
        let query: TaskIdsQuery = serde_json::from_str(r#"{"tasktIds": "a,b"}"#).unwrap();
        assert_eq!(query.task_ids.as_deref(), Some("a,b"));
    }
}
