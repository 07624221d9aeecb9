//! Remote companion service integration
//!
//! One call per outbound user message. The client never retries; the
//! dispatcher decides what a failure means for the conversation.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::{validate_text, Origin, ResponseStyle, ValidationError};

pub use http::HttpCompanionClient;

/// Identity sent when no user is signed in
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Companion service unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Companion service error ({status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Failure category, for callers that only care which kind occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    NetworkUnavailable,
    ServiceError,
    MalformedResponse,
}

impl RemoteError {
    pub fn kind(&self) -> RemoteErrorKind {
        match self {
            RemoteError::NetworkUnavailable(_) => RemoteErrorKind::NetworkUnavailable,
            RemoteError::ServiceError { .. } => RemoteErrorKind::ServiceError,
            RemoteError::MalformedResponse(_) => RemoteErrorKind::MalformedResponse,
        }
    }
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub response_type: ResponseStyle,
    pub user_id: String,
}

impl ChatRequest {
    /// Build a request, rejecting text outside 1..=500 characters.
    /// A missing identity is sent as [`ANONYMOUS_USER`].
    pub fn new(
        text: impl Into<String>,
        style: ResponseStyle,
        user_id: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let message = text.into();
        validate_text(&message, Origin::User)?;

        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();

        Ok(Self {
            message,
            response_type: style,
            user_id,
        })
    }
}

/// Normalized reply to a chat request
#[derive(Debug, Clone, PartialEq)]
pub struct CompanionReply {
    pub text: String,
    pub safety_flag: Option<bool>,
    pub emotion: Option<String>,
    pub risk_level: Option<RiskLevel>,
    /// Style the service actually applied; it may substitute its default
    pub applied_style: Option<ResponseStyle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Result of the advisory safety classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// False when the service could not be asked and this is the default
    pub available: bool,
}

impl SafetyVerdict {
    /// Conservative default used when the check could not run
    pub fn unavailable() -> Self {
        Self {
            is_safe: true,
            risk_level: RiskLevel::Low,
            message: Some("Safety check unavailable".to_string()),
            available: false,
        }
    }
}

/// Contract of the remote response-generation service
#[async_trait]
pub trait CompanionService: Send + Sync {
    /// Ask for a reply to one user message
    async fn send_message(&self, request: &ChatRequest) -> Result<CompanionReply, RemoteError>;

    /// Classify text for safety. Never fails; falls back to
    /// [`SafetyVerdict::unavailable`].
    async fn check_text(&self, text: &str) -> SafetyVerdict;

    /// Liveness probe. Any failure is reported as `NetworkUnavailable`.
    async fn ping(&self) -> Result<(), RemoteError>;
}
