//! Solace - emotional support chat session manager
//!
//! Keeps an ordered conversation between the local user and a remote
//! companion service, persists it across restarts, and serves it to the UI
//! over a small local HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod remote;
mod routes;

use crate::config::Config;
use crate::core::{ChatDispatcher, PersistenceGateway};
use crate::remote::HttpCompanionClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ChatDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solace_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let persistence = Arc::new(PersistenceGateway::open_or_ephemeral(&config.database_path()).await?);
    let client = Arc::new(HttpCompanionClient::new(&config.service)?);

    tracing::info!(
        service = %config.service.base_url,
        timeout_secs = config.service.timeout.as_secs(),
        "companion service configured"
    );

    let dispatcher = Arc::new(
        ChatDispatcher::open(
            client,
            persistence,
            config.user_id.clone(),
            &config.default_avatar,
        )
        .await,
    );

    let mut events = dispatcher.subscribe().await;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::trace!(?event, "session changed"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "session observer lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !dispatcher.service_reachable().await {
        tracing::warn!("companion service is not reachable yet, replies will fall back");
    }

    let state = AppState { dispatcher };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Solace session API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
