//! Gmail REST mailbox

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use concierge_core::agents::{MailMessage, MailProvider, OutgoingMail};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::oauth::{RefreshCredentials, TokenSource};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_SCOPE: &str = "https://mail.google.com/";

#[derive(Debug, Clone)]
pub struct GmailSettings {
    pub credentials: RefreshCredentials,
    pub api_base: String,
    pub timeout: Duration,
}

impl GmailSettings {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            credentials: RefreshCredentials {
                token_url: GOOGLE_TOKEN_URL.to_string(),
                client_id,
                client_secret,
                refresh_token,
                scope: Some(GMAIL_SCOPE.to_string()),
            },
            api_base: GMAIL_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct GmailMailbox {
    client: Client,
    tokens: TokenSource,
    api_base: String,
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

impl GmailMailbox {
    pub fn new(settings: GmailSettings) -> Self {
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
        format!("{}/gmail/v1/users/me/{}", self.api_base, path)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .context("Gmail request failed")?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gmail API error ({}): {}", status, body));
        }
        response.json().await.context("Failed to parse Gmail response")
    }
}

#[async_trait]
impl MailProvider for GmailMailbox {
    fn provider_name(&self) -> &str {
        "gmail"
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        let value = self
            .get_json(&self.url("messages"), &[("maxResults", limit.to_string())])
            .await?;
        let list: MessageList =
            serde_json::from_value(value).context("Unexpected Gmail message list")?;
        debug!("Gmail listed {} messages", list.messages.len());
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage> {
        let value = self
            .get_json(
                &self.url(&format!("messages/{}", id)),
                &[("format", "full".to_string())],
            )
            .await?;
        Ok(parse_message(id, &value))
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let raw = URL_SAFE.encode(rfc822(mail));
        let response = self
            .client
            .post(self.url("messages/send"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .context("Gmail send failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gmail send error ({}): {}", status, body));
        }
        info!("Gmail message sent to {}", mail.to);
        Ok(())
    }
}

/// Minimal plain-text RFC 822 message
fn rfc822(mail: &OutgoingMail) -> String {
    format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"utf-8\"\r\n\r\n{}",
        mail.to, mail.subject, mail.body
    )
}

fn parse_message(id: &str, value: &Value) -> MailMessage {
    let payload = &value["payload"];
    let header = |name: &str| {
        payload["headers"]
            .as_array()
            .and_then(|headers| {
                headers.iter().find(|h| {
                    h["name"]
                        .as_str()
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
            })
            .and_then(|h| h["value"].as_str())
            .unwrap_or_default()
            .to_string()
    };

    let body = plain_text_body(payload)
        .or_else(|| value["snippet"].as_str().map(str::to_string))
        .unwrap_or_default();

    MailMessage {
        id: id.to_string(),
        from: header("From"),
        subject: header("Subject"),
        body,
    }
}

/// First `text/plain` body in the MIME tree, depth first
fn plain_text_body(part: &Value) -> Option<String> {
    let mime = part["mimeType"].as_str().unwrap_or("text/plain");
    if mime.starts_with("text/plain") {
        if let Some(text) = part["body"]["data"].as_str().and_then(decode_body) {
            return Some(text);
        }
    }
    part["parts"]
        .as_array()?
        .iter()
        .find_map(plain_text_body)
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    async fn mailbox(server: &MockServer) -> GmailMailbox {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "gtok", "expires_in": 3600})),
            )
            .mount(server)
            .await;

        let mut settings = GmailSettings::new("id".into(), "secret".into(), "refresh".into());
        settings.credentials.token_url = format!("{}/token", server.uri());
        settings.api_base = server.uri();
        GmailMailbox::new(settings)
    }

    #[tokio::test]
    async fn test_list_recent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("maxResults", "5"))
            .and(header("authorization", "Bearer gtok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"messages": [{"id": "a", "threadId": "t"}, {"id": "b"}]})),
            )
            .mount(&server)
            .await;

        let ids = mailbox(&server).await.list_recent(5).await.unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_empty_mailbox() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultSizeEstimate": 0})))
            .mount(&server)
            .await;

        assert!(mailbox(&server).await.list_recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_message_multipart() {
        let server = MockServer::start().await;
        let text = URL_SAFE.encode("Hello there!");
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "snippet": "Hello",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [
                        {"name": "From", "value": "Ana <ana@example.com>"},
                        {"name": "subject", "value": "Lunch"}
                    ],
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": URL_SAFE.encode("<b>x</b>")}},
                        {"mimeType": "text/plain", "body": {"data": text}}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let message = mailbox(&server).await.get_message("m1").await.unwrap();
        assert_eq!(message.from, "Ana <ana@example.com>");
        assert_eq!(message.subject, "Lunch");
        assert_eq!(message.body, "Hello there!");
    }

    #[test]
    fn test_body_falls_back_to_snippet() {
        let message = parse_message("x", &json!({"snippet": "short", "payload": {"mimeType": "text/html"}}));
        assert_eq!(message.body, "short");
        assert_eq!(message.from, "");
    }

    #[tokio::test]
    async fn test_send_encodes_raw_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gmail/v1/users/me/messages/send"))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                let raw = URL_SAFE.decode(body["raw"].as_str().unwrap()).unwrap();
                let raw = String::from_utf8(raw).unwrap();
                if raw.starts_with("To: bo@example.com\r\nSubject: Hi\r\n") && raw.ends_with("\r\n\r\nBody") {
                    ResponseTemplate::new(200).set_body_json(json!({"id": "sent"}))
                } else {
                    ResponseTemplate::new(400)
                }
            })
            .mount(&server)
            .await;

        let mail = OutgoingMail {
            to: "bo@example.com".into(),
            subject: "Hi".into(),
            body: "Body".into(),
        };
        mailbox(&server).await.send(&mail).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient scope"))
            .mount(&server)
            .await;

        let err = mailbox(&server).await.list_recent(5).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
