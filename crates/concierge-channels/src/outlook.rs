//! Microsoft Graph (Outlook) mailbox

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use concierge_core::agents::{MailMessage, MailProvider, OutgoingMail};
use concierge_core::agents::mail::reply_subject;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::oauth::{RefreshCredentials, TokenSource};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default offline_access";
const REPLY_COMMENT: &str = "Replying to your email.";
const EMPTY_BODY: &str = "No email body available.";

#[derive(Debug, Clone)]
pub struct OutlookSettings {
    pub credentials: RefreshCredentials,
    pub api_base: String,
    pub timeout: Duration,
}

impl OutlookSettings {
    /// `tenant_id` of `common` accepts personal and work accounts
    pub fn new(
        tenant_id: &str,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            credentials: RefreshCredentials {
                token_url: format!(
                    "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                    tenant_id
                ),
                client_id,
                client_secret,
                refresh_token,
                scope: Some(GRAPH_SCOPE.to_string()),
            },
            api_base: GRAPH_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct OutlookMailbox {
    client: Client,
    tokens: TokenSource,
    api_base: String,
}

#[derive(Deserialize)]
struct GraphList {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
}

impl GraphMessage {
    fn into_mail(self) -> MailMessage {
        let from = self
            .from
            .as_ref()
            .and_then(|f| f["emailAddress"]["address"].as_str())
            .unwrap_or_default()
            .to_string();
        let body = self
            .body
            .as_ref()
            .and_then(|b| b["content"].as_str())
            .filter(|c| !c.is_empty())
            .unwrap_or(EMPTY_BODY)
            .to_string();
        MailMessage {
            id: self.id,
            from,
            subject: self.subject.unwrap_or_default(),
            body,
        }
    }
}

fn graph_message(mail: &OutgoingMail) -> Value {
    json!({
        "subject": mail.subject,
        "body": { "contentType": "Text", "content": mail.body },
        "toRecipients": [ { "emailAddress": { "address": mail.to } } ]
    })
}

impl OutlookMailbox {
    pub fn new(settings: OutlookSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            tokens: TokenSource::new(client.clone(), settings.credentials),
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1.0/me/{}", self.api_base, path)
    }

    async fn check(&self, response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Graph {} failed ({}): {}", what, status, body));
        }
        Ok(response)
    }

    async fn post(&self, path: &str, body: &Value, what: &str) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Graph {} request failed", what))?;
        self.check(response, what).await?;
        Ok(())
    }
}

#[async_trait]
impl MailProvider for OutlookMailbox {
    fn provider_name(&self) -> &str {
        "outlook"
    }

    /// Unread messages only
    async fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.url("messages"))
            .bearer_auth(token)
            .query(&[
                ("$filter", "isRead eq false".to_string()),
                ("$top", limit.to_string()),
                ("$select", "id".to_string()),
            ])
            .send()
            .await
            .context("Graph message list request failed")?;
        let list: GraphList = self
            .check(response, "message list")
            .await?
            .json()
            .await
            .context("Failed to parse Graph message list")?;
        debug!("Graph listed {} unread messages", list.value.len());
        Ok(list.value.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.url(&format!("messages/{}", id)))
            .bearer_auth(token)
            .send()
            .await
            .context("Graph message request failed")?;
        let message: GraphMessage = self
            .check(response, "message fetch")
            .await?
            .json()
            .await
            .context("Failed to parse Graph message")?;
        Ok(message.into_mail())
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let body = json!({ "message": graph_message(mail), "saveToSentItems": true });
        self.post("sendMail", &body, "sendMail").await?;
        info!("Outlook message sent to {}", mail.to);
        Ok(())
    }

    /// Threaded reply through `/messages/{id}/reply`
    async fn reply(&self, original: &MailMessage, body: &str) -> Result<()> {
        let mail = OutgoingMail {
            to: original.from.clone(),
            subject: reply_subject(&original.subject),
            body: body.to_string(),
        };
        let payload = json!({ "message": graph_message(&mail), "comment": REPLY_COMMENT });
        self.post(&format!("messages/{}/reply", original.id), &payload, "reply")
            .await?;
        info!("Outlook reply sent to {}", mail.to);
        Ok(())
    }
}
