//! Web page summarising, key-point extraction and keyword highlighting

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{normalize_choice, Agent};
use crate::providers::{complete, CompletionOptions, LlmProvider};
use crate::types::{AgentLabel, AgentReply, AgentRequest};

pub const UNKNOWN_QUERY_REPLY: &str = "Unknown query type.";
pub const NO_URL_REPLY: &str = "Could not extract URL from the query.";
pub const NO_KEYWORD_REPLY: &str = "Could not extract keyword from the query.";

const ACTION_SYSTEM_PROMPT: &str = "You are an AI assistant that performs web scraping actions.";
const SUMMARY_SYSTEM_PROMPT: &str = "You are an AI assistant that summarizes web page content \
clearly and concisely.";
const MAX_KEY_POINTS: usize = 10;
const MIN_KEY_POINT_WORDS: usize = 5;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url regex"));
static KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"highlight\s+(.+)").expect("valid keyword regex"));

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub user_agent: String,
    /// Fetched text is cut to this many characters
    pub max_chars: usize,
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            max_chars: 2000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebAction {
    Summarize,
    Points,
    Highlight,
}

pub struct WebAgent {
    llm: Arc<dyn LlmProvider>,
    client: Client,
    config: WebConfig,
}

impl WebAgent {
    pub fn new(llm: Arc<dyn LlmProvider>, config: WebConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build web client")?;
        Ok(Self { llm, client, config })
    }

    async fn classify(&self, query: &str) -> Result<Option<WebAction>> {
        let prompt = format!(
            "Query: {}. Identify if the query is related to one of the following actions: \
             summarize → If the query is about summarizing the content of a webpage, \
             points → If the query asks to provide key points from the content, \
             highlight → If the query involves highlighting specific information from the content. \
             Respond with only one word from the list: summarize, points, highlight. Do not provide explanations.",
            query
        );
        let raw = complete(
            self.llm.as_ref(),
            ACTION_SYSTEM_PROMPT,
            &[prompt.as_str()],
            CompletionOptions::max_tokens(10),
        )
        .await?;

        let action = match normalize_choice(&raw).as_str() {
            "summarize" => Some(WebAction::Summarize),
            "points" => Some(WebAction::Points),
            "highlight" => Some(WebAction::Highlight),
            _ => None,
        };
        debug!("Web action for query: {:?} (raw {:?})", action, raw);
        Ok(action)
    }

    /// Paragraph text of a page, truncated to the configured length
    async fn fetch_page(&self, url: &str) -> Result<String> {
        info!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Error fetching webpage content: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Error fetching webpage: {}", status));
        }

        let body = response.text().await.context("Failed to read webpage body")?;
        let text = paragraph_text(&body)?;
        Ok(text.chars().take(self.config.max_chars).collect())
    }

    async fn summarize(&self, content: &str) -> Result<String> {
        let prompt = format!("Summarize the following webpage content:\n\n{}", content);
        complete(
            self.llm.as_ref(),
            SUMMARY_SYSTEM_PROMPT,
            &[prompt.as_str()],
            CompletionOptions::default(),
        )
        .await
    }
}

#[async_trait]
impl Agent for WebAgent {
    fn label(&self) -> AgentLabel {
        AgentLabel::Web
    }

    async fn handle_query(&self, request: &AgentRequest<'_>) -> Result<AgentReply> {
        let Some(action) = self.classify(request.query).await? else {
            return Ok(AgentReply::from(UNKNOWN_QUERY_REPLY));
        };
        let Some(url) = extract_url(request.query) else {
            return Ok(AgentReply::from(NO_URL_REPLY));
        };

        let reply = match action {
            WebAction::Summarize => {
                let content = self.fetch_page(&url).await?;
                self.summarize(&content).await?
            }
            WebAction::Points => {
                let content = self.fetch_page(&url).await?;
                key_points(&content, MAX_KEY_POINTS).join("\n")
            }
            WebAction::Highlight => {
                let Some(keyword) = extract_keyword(request.query) else {
                    return Ok(AgentReply::from(NO_KEYWORD_REPLY));
                };
                let content = self.fetch_page(&url).await?;
                highlight(&content, &keyword)
            }
        };
        Ok(AgentReply::Text(reply))
    }
}

/// First well-formed http(s) URL in the text, without trailing punctuation
pub fn extract_url(query: &str) -> Option<String> {
    URL_RE
        .find(query)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '!', '?']).to_string())
        .filter(|url| Url::parse(url).is_ok())
}

/// Text following `highlight`, with any URL removed
pub fn extract_keyword(query: &str) -> Option<String> {
    let without_url = URL_RE.replace_all(query, "");
    KEYWORD_RE
        .captures(&without_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_end_matches(['.', ',', '!', '?']).trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Newline-joined text of every `<p>` element
pub fn paragraph_text(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("p").map_err(|e| anyhow!("invalid selector: {}", e))?;
    Ok(document
        .select(&selector)
        .map(|p| p.text().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Up to `limit` sentences longer than five words
pub fn key_points(content: &str, limit: usize) -> Vec<String> {
    content
        .split('.')
        .filter(|s| s.split_whitespace().count() > MIN_KEY_POINT_WORDS)
        .map(|s| s.trim().to_string())
        .take(limit)
        .collect()
}

pub fn highlight(content: &str, keyword: &str) -> String {
    content.replace(keyword, &format!("**{}**", keyword))
}
