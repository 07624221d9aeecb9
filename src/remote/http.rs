//! HTTP client for the companion service

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::conversation::ResponseStyle;

use super::{ChatRequest, CompanionReply, CompanionService, RemoteError, RiskLevel, SafetyVerdict};

/// Successful `POST /chat` body
#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    response: String,
    #[serde(default)]
    safety_flag: Option<bool>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    response_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SafetyCheckRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SafetyCheckBody {
    is_safe: bool,
    risk_level: RiskLevel,
    #[serde(default)]
    message: Option<String>,
}

/// Error body the service sends alongside non-2xx statuses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpCompanionClient {
    client: Client,
    base_url: String,
}

impl HttpCompanionClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn try_check_text(&self, text: &str) -> Result<SafetyVerdict, RemoteError> {
        let response = self
            .client
            .post(self.url("safety-check"))
            .json(&SafetyCheckRequest { text })
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;
        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        let verdict: SafetyCheckBody = serde_json::from_str(&body)
            .map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;

        Ok(SafetyVerdict {
            is_safe: verdict.is_safe,
            risk_level: verdict.risk_level,
            message: verdict.message,
            available: true,
        })
    }
}

#[async_trait]
impl CompanionService for HttpCompanionClient {
    async fn send_message(&self, request: &ChatRequest) -> Result<CompanionReply, RemoteError> {
        tracing::debug!(style = %request.response_type, "sending message to companion service");

        let response = self
            .client
            .post(self.url("chat"))
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(service_error(status, &body));
        }

        let parsed: ChatResponseBody = serde_json::from_str(&body).map_err(|e| {
            RemoteError::MalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        if parsed.response.trim().is_empty() {
            return Err(RemoteError::MalformedResponse(
                "Response text is empty".to_string(),
            ));
        }

        Ok(CompanionReply {
            text: parsed.response,
            safety_flag: parsed.safety_flag,
            emotion: parsed.emotion.filter(|e| !e.is_empty()),
            risk_level: parsed.risk_level.as_deref().and_then(parse_risk_level),
            applied_style: parsed
                .response_type
                .and_then(|s| s.parse::<ResponseStyle>().ok()),
        })
    }

    async fn check_text(&self, text: &str) -> SafetyVerdict {
        match self.try_check_text(text).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "safety check unavailable, assuming safe");
                SafetyVerdict::unavailable()
            }
        }
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(self.url("ping"))
            .send()
            .await
            .map_err(|e| RemoteError::NetworkUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RemoteError::NetworkUnavailable(format!(
                "ping returned HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Map a transport error onto the client's failure kinds
fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::MalformedResponse(err.to_string())
    } else {
        RemoteError::NetworkUnavailable(err.to_string())
    }
}

fn parse_risk_level(raw: &str) -> Option<RiskLevel> {
    match raw.trim().to_lowercase().as_str() {
        "low" => Some(RiskLevel::Low),
        "medium" => Some(RiskLevel::Medium),
        "high" => Some(RiskLevel::High),
        _ => None,
    }
}

fn service_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    RemoteError::ServiceError {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use crate::remote::RemoteErrorKind;

    async fn spawn_service(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    /// Base URL of a port nothing is listening on
    async fn closed_service() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/api", addr)
    }

    fn client(base_url: String, timeout: Duration) -> HttpCompanionClient {
        HttpCompanionClient::new(&ServiceConfig { base_url, timeout }).unwrap()
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new(text, ResponseStyle::Friendly, Some("user-1")).unwrap()
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "response": format!(
                        "{}|{}|{}",
                        body["message"].as_str().unwrap_or_default(),
                        body["response_type"].as_str().unwrap_or_default(),
                        body["user_id"].as_str().unwrap_or_default()
                    ),
                    "emotion": "anxious",
                    "safety_flag": false,
                    "risk_level": "low",
                    "response_type": "friendly"
                }))
            }),
        );
        let base = spawn_service(router).await;

        let reply = client(base, Duration::from_secs(10))
            .send_message(&request("I feel anxious today"))
            .await
            .unwrap();

        assert_eq!(reply.text, "I feel anxious today|friendly|user-1");
        assert_eq!(reply.emotion.as_deref(), Some("anxious"));
        assert_eq!(reply.safety_flag, Some(false));
        assert_eq!(reply.risk_level, Some(RiskLevel::Low));
        assert_eq!(reply.applied_style, Some(ResponseStyle::Friendly));
    }

    #[tokio::test]
    async fn test_optional_reply_fields_stay_absent() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { Json(json!({ "response": "Hello there" })) }),
        );
        let base = spawn_service(router).await;

        let reply = client(base, Duration::from_secs(10))
            .send_message(&request("hi"))
            .await
            .unwrap();

        assert_eq!(reply.text, "Hello there");
        assert_eq!(reply.safety_flag, None);
        assert_eq!(reply.emotion, None);
        assert_eq!(reply.risk_level, None);
    }

    #[tokio::test]
    async fn test_service_error_status() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                (
                    AxumStatus::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "I'm having trouble processing your message right now.",
                        "response": "I'm experiencing some technical difficulties."
                    })),
                )
            }),
        );
        let base = spawn_service(router).await;

        let err = client(base, Duration::from_secs(10))
            .send_message(&request("hi"))
            .await
            .unwrap_err();

        match err {
            RemoteError::ServiceError { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("trouble processing"));
            }
            other => panic!("expected ServiceError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let router = Router::new()
            .route("/api/chat", post(|| async { "definitely not json" }))
            .route("/bad/chat", post(|| async { Json(json!({ "reply": "wrong key" })) }))
            .route("/empty/chat", post(|| async { Json(json!({ "response": "  " })) }));
        let base = spawn_service(router).await;
        let root = base.trim_end_matches("/api").to_string();

        for url in [base, format!("{root}/bad"), format!("{root}/empty")] {
            let err = client(url, Duration::from_secs(10))
                .send_message(&request("hi"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), RemoteErrorKind::MalformedResponse);
        }
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let base = closed_service().await;

        let err = client(base, Duration::from_secs(10))
            .send_message(&request("hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::NetworkUnavailable);
    }

    #[tokio::test]
    async fn test_timeout_is_network_unavailable() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "response": "too late" }))
            }),
        );
        let base = spawn_service(router).await;

        let err = client(base, Duration::from_millis(200))
            .send_message(&request("hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), RemoteErrorKind::NetworkUnavailable);
    }

    #[tokio::test]
    async fn test_check_text() {
        let router = Router::new().route(
            "/api/safety-check",
            post(|Json(body): Json<Value>| async move {
                let risky = body["text"].as_str().unwrap_or_default().contains("hurt");
                Json(json!({
                    "is_safe": !risky,
                    "risk_level": if risky { "high" } else { "low" },
                    "message": if risky { "Please reach out for support" } else { "" }
                }))
            }),
        );
        let base = spawn_service(router).await;
        let client = client(base, Duration::from_secs(10));

        let verdict = client.check_text("I want to hurt myself").await;
        assert!(!verdict.is_safe);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert!(verdict.available);

        let verdict = client.check_text("lovely day").await;
        assert!(verdict.is_safe);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_check_text_fails_open() {
        let base = closed_service().await;

        let verdict = client(base, Duration::from_secs(10))
            .check_text("anything")
            .await;

        assert_eq!(verdict, SafetyVerdict::unavailable());
        assert!(verdict.is_safe);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(!verdict.available);
    }

    #[tokio::test]
    async fn test_ping() {
        let router = Router::new()
            .route(
                "/api/ping",
                get(|| async { Json(json!({ "status": "active", "version": "1.0.0" })) }),
            )
            .route(
                "/down/ping",
                get(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
            );
        let base = spawn_service(router).await;
        let root = base.trim_end_matches("/api").to_string();

        tokio_test::assert_ok!(client(base, Duration::from_secs(10)).ping().await);

        let err = client(format!("{root}/down"), Duration::from_secs(10))
            .ping()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::NetworkUnavailable);

        let err = client(closed_service().await, Duration::from_secs(10))
            .ping()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RemoteErrorKind::NetworkUnavailable);
    }
}
