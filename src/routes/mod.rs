//! Local shell API
//!
//! The UI drives the session through these routes; it never touches the
//! store directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversation::{ResponseStyle, SessionState};
use crate::core::{ChatError, SendOutcome};
use crate::remote::SafetyVerdict;
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct StyleBody {
    pub style: String,
}

#[derive(Debug, Deserialize)]
pub struct AvatarBody {
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentityBody {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SafetyCheckBody {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct StyleInfo {
    pub id: ResponseStyle,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub reachable: bool,
}

/// Error returned to the UI
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Validation(v) => ApiError::Validation(v.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
        };
        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_session(State(state): State<AppState>) -> Json<SessionState> {
    Json(state.dispatcher.snapshot().await)
}

async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<SendOutcome>, ApiError> {
    let outcome = state.dispatcher.send_message(&body.text).await?;
    Ok(Json(outcome))
}

async fn clear_messages(State(state): State<AppState>) -> Json<SessionState> {
    state.dispatcher.clear_chat().await;
    Json(state.dispatcher.snapshot().await)
}

async fn set_style(
    State(state): State<AppState>,
    Json(body): Json<StyleBody>,
) -> Result<Json<StyleInfo>, ApiError> {
    let style = state.dispatcher.set_style(&body.style).await?;
    Ok(Json(StyleInfo {
        id: style,
        label: style.label(),
    }))
}

async fn set_avatar(
    State(state): State<AppState>,
    Json(body): Json<AvatarBody>,
) -> Json<SessionState> {
    state.dispatcher.set_avatar(&body.avatar).await;
    Json(state.dispatcher.snapshot().await)
}

/// The sign-in collaborator hands the current identity over here
async fn set_identity(
    State(state): State<AppState>,
    Json(body): Json<IdentityBody>,
) -> Json<IdentityResponse> {
    let user_id = body.user_id.filter(|id| !id.trim().is_empty());
    state.dispatcher.set_identity(user_id).await;
    Json(IdentityResponse {
        user_id: state.dispatcher.identity().await,
    })
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.dispatcher.logout().await;
    StatusCode::NO_CONTENT
}

async fn list_styles() -> Json<Vec<StyleInfo>> {
    Json(
        ResponseStyle::ALL
            .into_iter()
            .map(|style| StyleInfo {
                id: style,
                label: style.label(),
            })
            .collect(),
    )
}

async fn safety_check(
    State(state): State<AppState>,
    Json(body): Json<SafetyCheckBody>,
) -> Json<SafetyVerdict> {
    Json(state.dispatcher.check_text(&body.text).await)
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        reachable: state.dispatcher.service_reachable().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(get_session))
        .route(
            "/api/session/messages",
            post(send_message).delete(clear_messages),
        )
        .route("/api/session/style", put(set_style))
        .route("/api/session/avatar", put(set_avatar))
        .route("/api/session/identity", put(set_identity))
        .route("/api/session/logout", post(logout))
        .route("/api/styles", get(list_styles))
        .route("/api/safety-check", post(safety_check))
        .route("/api/service/status", get(service_status))
}
