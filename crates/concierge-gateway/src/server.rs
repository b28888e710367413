//! Gateway HTTP server: Axum routes over the orchestrator and record store

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use concierge_core::{AgentLabel, AgentRequest, CycleRequest, Orchestrator};
use concierge_knowledge::{DocumentLibrary, RecordService};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::api::{
    ApiError, BROWSER_ACK, BrowserRequest, ChatQuery, ChatResponse, MessageResponse,
    NO_QUESTION_REPLY, OfficeRequest, PortfolioIdsQuery, ProgramIdsQuery, ProjectIdsQuery,
    TaskIdsQuery, UploadResponse,
};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for all requests
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub records: RecordService,
    pub library: Arc<DocumentLibrary>,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        records: RecordService,
        library: Arc<DocumentLibrary>,
    ) -> Self {
        Self {
            orchestrator,
            records,
            library,
            start_time: Instant::now(),
        }
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, state: GatewayState) -> Self {
        Self { state, bind }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/status", get(status_handler))
        .route("/chat/query", get(chat_query_handler))
        .route("/chat/history", get(chat_history_handler))
        .route("/officeAddins/excel", post(excel_handler))
        .route("/officeAddins/word", post(office_cycle_handler))
        .route("/officeAddins/outlook", post(office_cycle_handler))
        .route("/browserPlugin/v1/webHelper", post(web_helper_handler))
        .route("/upload/upload", post(upload_handler))
        .route("/project/projects", get(list_projects).post(create_project))
        .route("/project/projects/programs", get(projects_by_program))
        .route("/project/projects/portfolios", get(projects_by_portfolio))
        .route("/program/program", get(list_programs).post(create_program))
        .route("/program/program/portfolios", get(programs_by_portfolio))
        .route("/task/tasks", get(list_tasks).post(create_task))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Chat ──

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "Welcome to the concierge API" }))
}

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let agents: Vec<&str> = state
        .orchestrator
        .agents()
        .labels()
        .into_iter()
        .map(|label| label.as_str())
        .collect();

    let memory = state.orchestrator.memory();
    let indexed_passages = match state.library.indexed_passages().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Failed to count indexed passages: {:#}", e);
            None
        }
    };

    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "memory_turns": memory.len().await,
        "memory_max_turns": memory.retention().max_turns(),
        "token_limit": state.orchestrator.config().token_limit,
        "indexed_passages": indexed_passages,
        "agents": agents,
    }))
}

async fn chat_query_handler(
    State(state): State<GatewayState>,
    Query(params): Query<ChatQuery>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = state
        .orchestrator
        .route_query(&CycleRequest::new(params.user_chat_query))
        .await
        .map_err(|e| ApiError::cycle("response", e))?;
    debug!("Chat query answered by {}", outcome.agent);
    Ok(Json(ChatResponse {
        response: outcome.response,
    }))
}

async fn chat_history_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let entries = state.orchestrator.memory().entries().await;
    Json(json!({ "history": entries }))
}

// ── Office add-ins and browser plugin ──

async fn excel_handler(
    State(state): State<GatewayState>,
    Json(request): Json<OfficeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(question) = request.question() else {
        return Ok(Json(MessageResponse::new(NO_QUESTION_REPLY)));
    };
    let agent = state
        .orchestrator
        .agents()
        .get(AgentLabel::Excel)
        .ok_or_else(|| ApiError::Unavailable("Excel agent is not configured".to_string()))?;

    let agent_request = AgentRequest {
        query: question,
        history: request.chat_history.as_deref().unwrap_or_default(),
        content: Some(&request.data),
    };
    let message = match agent.handle_query(&agent_request).await {
        Ok(reply) => reply.into_text(),
        Err(e) => {
            warn!("Excel agent failed: {:#}", e);
            format!("Error: {}", e)
        }
    };
    Ok(Json(MessageResponse::new(message)))
}

async fn office_cycle_handler(
    State(state): State<GatewayState>,
    Json(request): Json<OfficeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(question) = request.question() else {
        return Ok(Json(MessageResponse::new(NO_QUESTION_REPLY)));
    };

    let mut cycle = CycleRequest::new(question).with_content(request.data.clone());
    if let Some(history) = &request.chat_history {
        cycle = cycle.with_history(history.clone());
    }
    let outcome = state
        .orchestrator
        .route_query(&cycle)
        .await
        .map_err(|e| ApiError::cycle("message", e))?;
    Ok(Json(MessageResponse::new(outcome.response)))
}

async fn web_helper_handler(
    State(state): State<GatewayState>,
    Json(request): Json<BrowserRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    debug!("Browser plugin action: {}", request.action);
    let Some(question) = request.question() else {
        return Ok(Json(MessageResponse::new(BROWSER_ACK)));
    };

    let cycle = CycleRequest::new(question).with_content(request.content.clone());
    let outcome = state
        .orchestrator
        .route_query(&cycle)
        .await
        .map_err(|e| ApiError::cycle("message", e))?;
    Ok(Json(MessageResponse::new(outcome.response)))
}

// ── Upload ──

async fn upload_handler(
    State(state): State<GatewayState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        info!("Received upload of {} bytes", bytes.len());

        let uploaded = state.library.upload_pdf(bytes.to_vec()).await?;
        return Ok(Json(UploadResponse {
            message: "PDF uploaded and processed.".to_string(),
            file_id: uploaded.file_id,
        }));
    }
    Err(ApiError::BadRequest("Missing multipart field: file".to_string()))
}

// ── Projects, programs, tasks ──

async fn list_projects(
    State(state): State<GatewayState>,
    Query(params): Query<ProjectIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.records.projects(params.project_ids.as_deref()).await?))
}

async fn create_project(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.records.create_project(body).await?))
}

async fn projects_by_program(
    State(state): State<GatewayState>,
    Query(params): Query<ProgramIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(
        state
            .records
            .projects_by_program(params.program_ids.as_deref())
            .await?,
    ))
}

async fn projects_by_portfolio(
    State(state): State<GatewayState>,
    Query(params): Query<PortfolioIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(
        state
            .records
            .projects_by_portfolio(params.portfolio_ids.as_deref())
            .await?,
    ))
}

async fn list_programs(
    State(state): State<GatewayState>,
    Query(params): Query<ProgramIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.records.programs(params.program_ids.as_deref()).await?))
}

async fn create_program(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.records.create_program(body).await?))
}

async fn programs_by_portfolio(
    State(state): State<GatewayState>,
    Query(params): Query<PortfolioIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(
        state
            .records
            .programs_by_portfolio(params.portfolio_ids.as_deref())
            .await?,
    ))
}

async fn list_tasks(
    State(state): State<GatewayState>,
    Query(params): Query<TaskIdsQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.records.tasks(params.task_ids.as_deref()).await?))
}

async fn create_task(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.records.create_task(body).await?))
}
