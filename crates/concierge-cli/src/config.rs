use anyhow::{Context, Result};
use concierge_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConciergeConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub web: WebSettings,
}

/// One chat-completions endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmEndpointConfig {
    /// `groq`, `openai`, or any name for another OpenAI-compatible endpoint
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    /// Defaults per provider when unset
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEndpointConfig")
            .field("provider", &self.provider)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(flatten)]
    pub primary: LlmEndpointConfig,
    /// Tried in order after the primary fails
    #[serde(default)]
    pub failover: Vec<LlmEndpointConfig>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    "groq".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// `0` keeps every turn
    #[serde(default)]
    pub max_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_database_file")]
    pub database: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database_file(),
            index_dir: default_index_dir(),
        }
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        shellexpand(&self.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_path().join(&self.database)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_path().join(&self.index_dir)
    }
}

fn default_data_dir() -> String {
    "~/.concierge/data".to_string()
}

fn default_database_file() -> String {
    "records.db".to_string()
}

fn default_index_dir() -> String {
    "index".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
        }
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub gmail: Option<GmailConfig>,
    #[serde(default)]
    pub outlook: Option<OutlookConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Messages from this address are never auto-replied
    #[serde(default)]
    pub own_address: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for GmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_secret(&self.client_secret))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("own_address", &self.own_address)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OutlookConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    pub refresh_token: String,
    #[serde(default)]
    pub own_address: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for OutlookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlookConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_secret(&self.client_secret))
            .field("tenant_id", &self.tenant_id)
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("own_address", &self.own_address)
            .field("api_base", &self.api_base)
            .finish()
    }
}

fn default_tenant() -> String {
    "common".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_web_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_chars: default_web_max_chars(),
            timeout_secs: default_web_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_web_max_chars() -> usize {
    2000
}

fn default_web_timeout() -> u64 {
    30
}

impl ConciergeConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // Refuse to start if group or other can read the file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `concierge init` first.",
                path.display()
            )
        })?;

        let expanded = expand_env_vars(&content);
        let config: Self = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if !config.llm.primary.api_key.is_empty() && looks_hardcoded(&content, "api_key") {
            warn!(
                "LLM API key is hardcoded in config file. For security, use environment variables: api_key = \"${{GROQ_API_KEY}}\""
            );
        }

        Ok(config)
    }
}

/// True when `key = "<literal>"` appears without a `${..}` reference
fn looks_hardcoded(raw: &str, key: &str) -> bool {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix(key))
        .filter_map(|rest| rest.trim_start().strip_prefix('='))
        .map(str::trim)
        .any(|value| value.len() > 2 && !value.contains("${"))
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".concierge")
}

/// Expand a leading `~/` to the home directory
pub fn shellexpand(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

const ALLOWED_ENV_VARS: &[&str] = &[
    "GROQ_API_KEY",
    "OPENAI_API_KEY",
    "GMAIL_CLIENT_ID",
    "GMAIL_CLIENT_SECRET",
    "GMAIL_REFRESH_TOKEN",
    "OUTLOOK_CLIENT_ID",
    "OUTLOOK_CLIENT_SECRET",
    "OUTLOOK_TENANT_ID",
    "OUTLOOK_REFRESH_TOKEN",
    "HOME",
    "USER",
];

/// Replace `${VAR}` with the variable's value for allowlisted names only
fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);

        if ALLOWED_ENV_VARS.contains(&name) {
            result.push_str(&std::env::var(name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                name
            );
            result.push_str(&rest[start..start + len + 1]);
        }
        rest = &rest[start + len + 1..];
    }

    result.push_str(rest);
    result
}
