use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use concierge_channels::{GmailMailbox, GmailSettings, OutlookMailbox, OutlookSettings};
use concierge_core::agents::{
    MailAgent, OfficeAgent, PdfAgent, PersonaAgent, ProjectAgent, WebAgent, WebConfig,
};
use concierge_core::providers::openai_compat::{GROQ_BASE_URL, GROQ_DEFAULT_MODEL};
use concierge_core::{
    AgentLabel, AgentRegistry, Chunker, ConversationMemory, CycleRequest, LlmProvider,
    MemoryRetention, ModelRouter, OpenAiCompatProvider, OpenAiProvider, Orchestrator,
};
use concierge_gateway::{GatewayServer, GatewayState};
use concierge_knowledge::{DocumentLibrary, DocumentStore, RecordService, SearchIndex};
use config::{ConciergeConfig, LlmConfig, LlmEndpointConfig};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Parser)]
#[command(name = "concierge")]
#[command(version)]
#[command(about = "Concierge: a multi-agent assistant backend")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Start,

    /// Run one query through the orchestrator and print the reply
    Ask {
        /// The message to send
        message: String,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Ask { message } => cmd_ask(&cli.config, &message).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Concierge initialized at {}", config_dir.display());
    println!("Edit {} to configure your API keys and mailboxes.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = ConciergeConfig::load(config_path)?;
    println!("{:#?}", config);
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let config = ConciergeConfig::load(config_path)?;
    let state = build_state(&config).await?;

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid gateway address {}:{}",
                config.gateway.bind, config.gateway.port
            )
        })?;

    let server = GatewayServer::new(addr, state);
    server
        .run(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, shutting down...");
        })
        .await
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str) -> Result<()> {
    let config = ConciergeConfig::load(config_path)?;
    let state = build_state(&config).await?;

    let outcome = match state
        .orchestrator
        .route_query(&CycleRequest::new(message))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Cycle failed ({}): {}", e.kind(), e);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Answered by {} ({} partials, {} failed)",
        outcome.agent, outcome.partials, outcome.failed_partials
    );
    println!("{}", outcome.response);
    Ok(())
}

/// Open storage, build providers and agents, and wire the orchestrator
async fn build_state(config: &ConciergeConfig) -> Result<GatewayState> {
    let data_dir = config.storage.data_path();
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;

    let store = Arc::new(DocumentStore::new(config.storage.database_path())?);
    let index = Arc::new(SearchIndex::new(config.storage.index_path())?);
    let records = RecordService::new(store);
    let library = Arc::new(DocumentLibrary::new(index.clone()));

    let llm = build_llm(&config.llm)?;
    info!("Using LLM {} / {}", llm.provider_name(), llm.model());

    let mut registry = AgentRegistry::new()
        .with(Arc::new(PersonaAgent::general(llm.clone())))
        .with(Arc::new(PersonaAgent::social_media(llm.clone())))
        .with(Arc::new(PersonaAgent::calendar(llm.clone())))
        .with(Arc::new(ProjectAgent::new(llm.clone(), records.clone(), index)))
        .with(Arc::new(PdfAgent::new(llm.clone(), library.clone())))
        .with(Arc::new(OfficeAgent::excel(llm.clone())))
        .with(Arc::new(OfficeAgent::word(llm.clone())))
        .with(Arc::new(WebAgent::new(
            llm.clone(),
            WebConfig {
                user_agent: config.web.user_agent.clone(),
                max_chars: config.web.max_chars,
                timeout_secs: config.web.timeout_secs,
            },
        )?));

    if let Some(gmail) = &config.mail.gmail {
        let mut settings = GmailSettings::new(
            gmail.client_id.clone(),
            gmail.client_secret.clone(),
            gmail.refresh_token.clone(),
        );
        if let Some(base) = &gmail.api_base {
            settings.api_base = base.clone();
        }
        let mut agent = MailAgent::new(
            AgentLabel::Gmail,
            Arc::new(GmailMailbox::new(settings)),
            llm.clone(),
        );
        if let Some(address) = &gmail.own_address {
            agent = agent.with_own_address(address.clone());
        }
        registry.register(Arc::new(agent));
    }

    if let Some(outlook) = &config.mail.outlook {
        let mut settings = OutlookSettings::new(
            &outlook.tenant_id,
            outlook.client_id.clone(),
            outlook.client_secret.clone(),
            outlook.refresh_token.clone(),
        );
        if let Some(base) = &outlook.api_base {
            settings.api_base = base.clone();
        }
        let mut agent = MailAgent::new(
            AgentLabel::Outlook,
            Arc::new(OutlookMailbox::new(settings)),
            llm.clone(),
        );
        if let Some(address) = &outlook.own_address {
            agent = agent.with_own_address(address.clone());
        }
        registry.register(Arc::new(agent));
    }

    let missing: Vec<&str> = AgentLabel::ALL
        .into_iter()
        .filter(|label| registry.get(*label).is_none())
        .map(|label| label.as_str())
        .collect();
    if !missing.is_empty() {
        info!("Agents not configured: {}", missing.join(", "));
    }

    let memory = Arc::new(ConversationMemory::new(MemoryRetention::from_max_turns(
        config.memory.max_turns,
    )));
    let chunker = Chunker::new(config.orchestrator.token_limit)?;
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        registry,
        chunker,
        memory,
        config.orchestrator.clone(),
    ));

    Ok(GatewayState::new(orchestrator, records, library))
}

fn build_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let providers = std::iter::once(&config.primary)
        .chain(config.failover.iter())
        .map(build_provider)
        .collect::<Result<Vec<_>>>()?;

    let router = ModelRouter::with_failover(providers)?.with_max_retries(config.max_retries);
    info!(
        "LLM router over {} endpoint(s), {} retries each",
        router.provider_count(),
        config.max_retries
    );
    Ok(Arc::new(router))
}

fn build_provider(endpoint: &LlmEndpointConfig) -> Result<Arc<dyn LlmProvider>> {
    if endpoint.api_key.is_empty() {
        warn!("No API key configured for LLM provider '{}'", endpoint.provider);
    }
    let timeout = Duration::from_secs(endpoint.timeout_secs);

    let provider: Arc<dyn LlmProvider> = match endpoint.provider.as_str() {
        "groq" => Arc::new(OpenAiCompatProvider::new(
            "groq".to_string(),
            endpoint.api_key.clone(),
            endpoint
                .model
                .clone()
                .unwrap_or_else(|| GROQ_DEFAULT_MODEL.to_string()),
            endpoint
                .base_url
                .clone()
                .unwrap_or_else(|| GROQ_BASE_URL.to_string()),
            endpoint.max_tokens,
            timeout,
        )),
        "openai" => Arc::new(OpenAiProvider::with_timeout(
            endpoint.api_key.clone(),
            endpoint
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            endpoint
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            endpoint.max_tokens,
            timeout,
        )),
        other => {
            let base_url = endpoint
                .base_url
                .clone()
                .ok_or_else(|| anyhow!("LLM provider '{}' needs a base_url", other))?;
            let Some(model) = endpoint.model.clone() else {
                bail!("LLM provider '{}' needs a model", other);
            };
            Arc::new(OpenAiCompatProvider::new(
                other.to_string(),
                endpoint.api_key.clone(),
                model,
                base_url,
                endpoint.max_tokens,
                timeout,
            ))
        }
    };
    Ok(provider)
}
