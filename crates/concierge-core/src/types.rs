//! Core message types shared by the orchestrator, agents and the gateway

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Closed set of agents the classifier may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLabel {
    Project,
    SocialMedia,
    Calendar,
    General,
    #[serde(rename = "web_agent")]
    Web,
    #[serde(rename = "pdf_agent")]
    Pdf,
    Gmail,
    Outlook,
    #[serde(rename = "ms_excel_agent")]
    Excel,
    #[serde(rename = "ms_word_agent")]
    Word,
}

impl AgentLabel {
    pub const ALL: [AgentLabel; 10] = [
        AgentLabel::Project,
        AgentLabel::SocialMedia,
        AgentLabel::Calendar,
        AgentLabel::General,
        AgentLabel::Web,
        AgentLabel::Pdf,
        AgentLabel::Gmail,
        AgentLabel::Outlook,
        AgentLabel::Excel,
        AgentLabel::Word,
    ];

    /// Wire name the classifier is asked to answer with
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::SocialMedia => "social_media",
            Self::Calendar => "calendar",
            Self::General => "general",
            Self::Web => "web_agent",
            Self::Pdf => "pdf_agent",
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Excel => "ms_excel_agent",
            Self::Word => "ms_word_agent",
        }
    }

    /// One-line role shown to the classifier
    pub fn role(&self) -> &'static str {
        match self {
            Self::Project => "Handles business projects, strategies, execution, and risk management.",
            Self::SocialMedia => "Assists with social media planning, branding, and content strategy.",
            Self::Calendar => "Manages meeting schedules and event organization.",
            Self::General => "Covers all other casual or undefined queries.",
            Self::Web => "Specializes in web scraping.",
            Self::Pdf => "Specializes in PDF processing.",
            Self::Gmail => "Specializes in Gmail management.",
            Self::Outlook => "Specializes in email management.",
            Self::Excel => "Specializes in Microsoft Excel processing.",
            Self::Word => "Specializes in Microsoft Word processing.",
        }
    }
}

impl fmt::Display for AgentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Input to one orchestration cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleRequest {
    pub query: String,
    /// Replaces the memory snapshot for this cycle when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
    /// Document or spreadsheet payload from an office add-in or browser page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl CycleRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: impl Into<String>) -> Self {
        self.history = Some(history.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// What an agent sees for one (query chunk, history chunk) pair
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub query: &'a str,
    pub history: &'a str,
    pub content: Option<&'a str>,
}

impl<'a> AgentRequest<'a> {
    pub fn new(query: &'a str, history: &'a str) -> Self {
        Self {
            query,
            history,
            content: None,
        }
    }
}

/// Agent output: free text or a structured record
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    Text(String),
    Structured(Value),
}

impl AgentReply {
    /// Canonical text form used when partials are joined
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => {
                serde_json::to_string(&value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

impl From<String> for AgentReply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for AgentReply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
