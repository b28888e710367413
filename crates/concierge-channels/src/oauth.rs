//! OAuth 2.0 refresh-token grant with an in-memory access-token cache

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Refresh this long before the advertised expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_LIFETIME_SECS: u64 = 3600;

#[derive(Clone)]
pub struct RefreshCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub scope: Option<String>,
}

impl std::fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenSource {
    client: Client,
    credentials: RefreshCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(client: Client, credentials: RefreshCredentials) -> Self {
        Self {
            client,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// A valid access token, refreshed when missing or close to expiry
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("Access token expired, refreshing");
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next call refreshes
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn refresh(&self) -> Result<CachedToken> {
        let creds = &self.credentials;
        let mut form = vec![
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("refresh_token", creds.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(scope) = &creds.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&creds.token_url)
            .form(&form)
            .send()
            .await
            .context("Failed to reach OAuth token endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Error retrieving access token ({}): {}", status, body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse OAuth token response")?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS));
        info!("Refreshed access token for client {}", creds.client_id);

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}
