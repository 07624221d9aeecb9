//! Chat dispatcher
//!
//! Runs one send cycle at a time for a session:
//! 1. Records the user's entry
//! 2. Asks the companion service for a reply
//! 3. Records the reply, or a local fallback entry if the service failed
//! 4. Saves the updated log
//!
//! The store's `pending` flag is the only mutual exclusion between cycles.
//! A send that arrives while another is in flight is dropped, not queued.
//! A reply that lands after the conversation was cleared (Clear Chat or
//! logout) is discarded and nothing is saved for it.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::conversation::{ConversationEntry, ResponseStyle, SessionState, ValidationError};
use crate::remote::{ChatRequest, CompanionService, RemoteError, RemoteErrorKind, SafetyVerdict};

use super::persistence::PersistenceGateway;
use super::store::{MessageStore, StoreEvent};

/// Companion entry recorded when the service could not produce a reply
pub const CONNECTIVITY_FALLBACK_TEXT: &str =
    "I'm having trouble connecting right now. Please check that the companion service is running.";

const ALERT_TITLE: &str = "Connection Error";
const ALERT_MESSAGE: &str = "Make sure the companion service is running!";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Out-of-band notice that a send could not reach the companion service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityAlert {
    pub title: String,
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl ConnectivityAlert {
    fn new(kind: RemoteErrorKind) -> Self {
        Self {
            title: ALERT_TITLE.to_string(),
            message: ALERT_MESSAGE.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Nothing left after trimming
    EmptyText,
    /// Another send is in flight
    Busy,
    /// The conversation was cleared while waiting for the reply
    SessionCleared,
}

/// What a call to `send_message` did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Skipped {
        reason: SkipReason,
    },
    Sent {
        user: ConversationEntry,
        reply: ConversationEntry,
    },
    Degraded {
        user: ConversationEntry,
        fallback: ConversationEntry,
        connectivity_alert: ConnectivityAlert,
    },
}

pub struct ChatDispatcher {
    store: RwLock<MessageStore>,
    service: Arc<dyn CompanionService>,
    persistence: Arc<PersistenceGateway>,
    identity: RwLock<Option<String>>,
    /// Serializes snapshot-and-save so an older log never overwrites a newer one
    save_lock: Mutex<()>,
}

impl ChatDispatcher {
    pub fn new(
        store: MessageStore,
        service: Arc<dyn CompanionService>,
        persistence: Arc<PersistenceGateway>,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            service,
            persistence,
            identity: RwLock::new(None),
            save_lock: Mutex::new(()),
        }
    }

    /// Rehydrate the session from storage.
    ///
    /// `user_id` is the externally supplied identity; when absent the last
    /// stored identity is used. `default_avatar` applies only if the user
    /// never picked one.
    pub async fn open(
        service: Arc<dyn CompanionService>,
        persistence: Arc<PersistenceGateway>,
        user_id: Option<String>,
        default_avatar: &str,
    ) -> Self {
        let mut state = persistence.load_session().await;
        if persistence.load_avatar().await.is_none() {
            state.companion_avatar = default_avatar.to_string();
        }

        let identity = match user_id {
            Some(id) => {
                persistence.save_user_id(&id).await;
                Some(id)
            }
            None => persistence.load_user_id().await,
        };

        let dispatcher = Self::new(MessageStore::with_state(state), service, persistence);
        *dispatcher.identity.write().await = identity;
        dispatcher
    }

    /// Send as the session's current identity
    pub async fn send_message(&self, raw_text: &str) -> Result<SendOutcome, ChatError> {
        let identity = self.identity.read().await.clone();
        self.send_message_as(raw_text, identity.as_deref()).await
    }

    /// Run one send cycle for `user_id` (anonymous when `None`)
    pub async fn send_message_as(
        &self,
        raw_text: &str,
        user_id: Option<&str>,
    ) -> Result<SendOutcome, ChatError> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Skipped {
                reason: SkipReason::EmptyText,
            });
        }

        let (request, user_entry, style, generation) = {
            let mut store = self.store.write().await;
            if store.is_pending() {
                tracing::debug!("send already in flight, ignoring");
                return Ok(SendOutcome::Skipped {
                    reason: SkipReason::Busy,
                });
            }

            let style = store.current_style();
            let request = ChatRequest::new(text, style, user_id)?;
            let entry = ConversationEntry::user(text, style);

            store.set_pending(true);
            if let Err(e) = store.append(entry.clone()) {
                store.set_pending(false);
                return Err(e.into());
            }
            (request, entry, style, store.generation())
        };

        let result = self.service.send_message(&request).await.and_then(|reply| {
            if reply.text.trim().is_empty() {
                Err(RemoteError::MalformedResponse("reply text is empty".to_string()))
            } else {
                Ok(reply)
            }
        });

        let (companion_entry, outcome) = match result {
            Ok(reply) => {
                if reply.applied_style.is_some_and(|applied| applied != style) {
                    tracing::debug!(requested = %style, applied = ?reply.applied_style, "service substituted response style");
                }
                if let Some(risk) = reply.risk_level {
                    tracing::debug!(?risk, safety_flag = ?reply.safety_flag, "reply classified");
                }
                let entry = ConversationEntry::companion(
                    reply.text,
                    Some(style),
                    reply.safety_flag,
                    reply.emotion,
                );
                let outcome = SendOutcome::Sent {
                    user: user_entry,
                    reply: entry.clone(),
                };
                (entry, outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "companion service failed, recording fallback");
                let entry =
                    ConversationEntry::companion(CONNECTIVITY_FALLBACK_TEXT, None, None, None);
                let outcome = SendOutcome::Degraded {
                    user: user_entry,
                    fallback: entry.clone(),
                    connectivity_alert: ConnectivityAlert::new(e.kind()),
                };
                (entry, outcome)
            }
        };

        {
            let mut store = self.store.write().await;
            if store.generation() != generation {
                tracing::debug!("conversation cleared mid-send, discarding reply");
                store.set_pending(false);
                return Ok(SendOutcome::Skipped {
                    reason: SkipReason::SessionCleared,
                });
            }
            if let Err(e) = store.append(companion_entry) {
                store.set_pending(false);
                return Err(e.into());
            }
        }

        self.persist_generation(generation).await;
        self.store.write().await.set_pending(false);

        Ok(outcome)
    }

    async fn persist_entries(&self) {
        let _guard = self.save_lock.lock().await;
        let entries = self.store.read().await.entries().to_vec();
        self.persistence.save_entries(&entries).await;
    }

    /// Save the log only if it has not been cleared since `generation`
    async fn persist_generation(&self, generation: u64) {
        let _guard = self.save_lock.lock().await;
        let entries = {
            let store = self.store.read().await;
            if store.generation() != generation {
                return;
            }
            store.entries().to_vec()
        };
        self.persistence.save_entries(&entries).await;
    }

    /// Select the style for subsequent messages
    pub async fn set_style(&self, name: &str) -> Result<ResponseStyle, ChatError> {
        let style = self.store.write().await.set_style_named(name)?;
        self.persistence.save_style_preference(style).await;
        Ok(style)
    }

    pub async fn set_avatar(&self, avatar: &str) {
        self.store.write().await.set_avatar(avatar);
        self.persistence.save_avatar(avatar).await;
    }

    /// Wipe the conversation and reset the style
    pub async fn clear_chat(&self) {
        self.store.write().await.clear();
        self.persist_entries().await;
        self.persistence
            .save_style_preference(ResponseStyle::default())
            .await;
    }

    /// Forget the session: clear the store, stored session data and identity
    pub async fn logout(&self) {
        self.store.write().await.clear();
        {
            let _guard = self.save_lock.lock().await;
            self.persistence.clear_all().await;
        }
        *self.identity.write().await = None;
        tracing::info!("session cleared on logout");
    }

    pub async fn set_identity(&self, user_id: Option<String>) {
        match &user_id {
            Some(id) => self.persistence.save_user_id(id).await,
            None => self.persistence.clear_user_id().await,
        }
        *self.identity.write().await = user_id;
    }

    pub async fn identity(&self) -> Option<String> {
        self.identity.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.store.read().await.state().clone()
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.read().await.subscribe()
    }

    /// Advisory safety classification; never blocks the conversation
    pub async fn check_text(&self, text: &str) -> SafetyVerdict {
        self.service.check_text(text).await
    }

    pub async fn service_reachable(&self) -> bool {
        match self.service.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "companion service not reachable");
                false
            }
        }
    }
}
