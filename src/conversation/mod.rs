//! Conversation types and session state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum length, in characters, of a user-authored entry
pub const MAX_USER_TEXT_CHARS: usize = 500;

/// Greeting shown on a fresh conversation
pub const WELCOME_TEXT: &str =
    "Hello! I'm your emotional support companion. How are you feeling today?";

/// Companion avatar used until the user picks one
pub const DEFAULT_AVATAR: &str = "🤖";

/// Rejected local input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message text cannot be empty")]
    EmptyText,

    #[error("Message text is {len} characters, the limit is {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("Entry id already exists: {0}")]
    DuplicateId(String),

    #[error("Unknown response style: {0}")]
    InvalidStyle(String),
}

/// Who authored an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Companion,
}

/// Tone/persona conditioning companion replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    #[default]
    Empathetic,
    Motivational,
    StressRelief,
    Friendly,
    Encouragement,
}

impl ResponseStyle {
    pub const ALL: [ResponseStyle; 5] = [
        ResponseStyle::Empathetic,
        ResponseStyle::Motivational,
        ResponseStyle::StressRelief,
        ResponseStyle::Friendly,
        ResponseStyle::Encouragement,
    ];

    /// Wire and storage identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Empathetic => "empathetic",
            ResponseStyle::Motivational => "motivational",
            ResponseStyle::StressRelief => "stress_relief",
            ResponseStyle::Friendly => "friendly",
            ResponseStyle::Encouragement => "encouragement",
        }
    }

    /// Human-readable label for style pickers
    pub fn label(&self) -> &'static str {
        match self {
            ResponseStyle::Empathetic => "Empathetic",
            ResponseStyle::Motivational => "Motivational",
            ResponseStyle::StressRelief => "Stress Relief",
            ResponseStyle::Friendly => "Friendly",
            ResponseStyle::Encouragement => "Encouragement",
        }
    }
}

impl fmt::Display for ResponseStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseStyle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        ResponseStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidStyle(s.to_string()))
    }
}

/// One turn in the dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub text: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_style: Option<ResponseStyle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_flag: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

impl ConversationEntry {
    /// Entry authored by the local user
    pub fn user(text: impl Into<String>, style: ResponseStyle) -> Self {
        Self {
            id: new_entry_id(),
            text: text.into(),
            origin: Origin::User,
            created_at: Utc::now(),
            response_style: Some(style),
            safety_flag: None,
            emotion: None,
        }
    }

    /// Entry authored by the companion, with optional reply metadata
    pub fn companion(
        text: impl Into<String>,
        style: Option<ResponseStyle>,
        safety_flag: Option<bool>,
        emotion: Option<String>,
    ) -> Self {
        Self {
            id: new_entry_id(),
            text: text.into(),
            origin: Origin::Companion,
            created_at: Utc::now(),
            response_style: style,
            safety_flag,
            emotion,
        }
    }

    /// Seed entry for a fresh conversation
    pub fn welcome() -> Self {
        Self::companion(WELCOME_TEXT, Some(ResponseStyle::Friendly), None, None)
    }

    /// Check the entry against the log's text rules
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.text, self.origin)
    }
}

/// Fresh time-based entry identifier
pub fn new_entry_id() -> String {
    Uuid::now_v7().to_string()
}

/// Text rules shared by the store and the remote client
pub fn validate_text(text: &str, origin: Origin) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    if origin == Origin::User {
        let len = text.chars().count();
        if len > MAX_USER_TEXT_CHARS {
            return Err(ValidationError::TextTooLong {
                len,
                max: MAX_USER_TEXT_CHARS,
            });
        }
    }
    Ok(())
}

/// Everything the message store owns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub entries: Vec<ConversationEntry>,
    pub current_style: ResponseStyle,
    pub pending: bool,
    pub companion_avatar: String,
}

impl SessionState {
    /// Empty conversation with default style and avatar
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            current_style: ResponseStyle::default(),
            pending: false,
            companion_avatar: DEFAULT_AVATAR.to_string(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
