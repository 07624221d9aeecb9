//! In-memory message store
//!
//! Owns the [`SessionState`] and is the only place the entry log is mutated.
//! Every mutation is announced on a broadcast channel so observers (the UI
//! shell, persistence triggers) can react. The store itself never does I/O.

use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::conversation::{ConversationEntry, ResponseStyle, SessionState, ValidationError};

const EVENT_CAPACITY: usize = 64;

/// Observable state transition
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Appended { id: String },
    StyleChanged(ResponseStyle),
    PendingChanged(bool),
    AvatarChanged(String),
    Cleared,
}

pub struct MessageStore {
    state: SessionState,
    /// Every id handed out over the store's lifetime, including cleared ones
    seen_ids: HashSet<String>,
    /// Bumped on every clear; lets in-flight work notice the log it started
    /// on is gone
    generation: u64,
    events: broadcast::Sender<StoreEvent>,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_state(SessionState::new())
    }

    /// Create a store around an existing state, e.g. after rehydration
    pub fn with_state(state: SessionState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let seen_ids = state.entries.iter().map(|e| e.id.clone()).collect();
        Self {
            state,
            seen_ids,
            generation: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.state.entries
    }

    pub fn current_style(&self) -> ResponseStyle {
        self.state.current_style
    }

    pub fn is_pending(&self) -> bool {
        self.state.pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Insert an entry at the tail of the log
    pub fn append(&mut self, entry: ConversationEntry) -> Result<(), ValidationError> {
        entry.validate()?;
        if self.seen_ids.contains(&entry.id) {
            return Err(ValidationError::DuplicateId(entry.id));
        }

        let id = entry.id.clone();
        self.seen_ids.insert(id.clone());
        self.state.entries.push(entry);
        tracing::debug!(entry_id = %id, total = self.state.entries.len(), "entry appended");
        self.publish(StoreEvent::Appended { id });
        Ok(())
    }

    pub fn set_style(&mut self, style: ResponseStyle) {
        self.state.current_style = style;
        tracing::debug!(%style, "response style changed");
        self.publish(StoreEvent::StyleChanged(style));
    }

    /// Select a style by its identifier
    pub fn set_style_named(&mut self, name: &str) -> Result<ResponseStyle, ValidationError> {
        let style: ResponseStyle = name.parse()?;
        self.set_style(style);
        Ok(style)
    }

    pub fn set_pending(&mut self, pending: bool) {
        if self.state.pending == pending {
            return;
        }
        self.state.pending = pending;
        self.publish(StoreEvent::PendingChanged(pending));
    }

    /// Empty the log and reset the style; the avatar is left alone
    pub fn clear(&mut self) {
        self.state.entries.clear();
        self.state.current_style = ResponseStyle::default();
        self.generation += 1;
        tracing::debug!(generation = self.generation, "conversation cleared");
        self.publish(StoreEvent::Cleared);
    }

    pub fn set_avatar(&mut self, avatar: impl Into<String>) {
        let avatar = avatar.into();
        self.state.companion_avatar = avatar.clone();
        self.publish(StoreEvent::AvatarChanged(avatar));
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Origin, DEFAULT_AVATAR};

    fn welcome_state() -> SessionState {
        SessionState {
            entries: vec![ConversationEntry::welcome()],
            ..SessionState::new()
        }
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let mut store = MessageStore::new();
        store
            .append(ConversationEntry::user("first", ResponseStyle::Friendly))
            .unwrap();
        store
            .append(ConversationEntry::companion("second", None, None, None))
            .unwrap();

        let texts: Vec<&str> = store.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(store.entries()[1].origin, Origin::Companion);
    }

    #[test]
    fn test_append_rejects_empty_and_duplicate() {
        let mut store = MessageStore::new();
        let empty = ConversationEntry::user("  ", ResponseStyle::Empathetic);
        assert_eq!(store.append(empty), Err(ValidationError::EmptyText));

        let entry = ConversationEntry::user("hello", ResponseStyle::Empathetic);
        let dup = entry.clone();
        store.append(entry).unwrap();
        assert_eq!(
            store.append(dup.clone()),
            Err(ValidationError::DuplicateId(dup.id))
        );
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_ids_stay_reserved_after_clear() {
        let mut store = MessageStore::new();
        let entry = ConversationEntry::user("hello", ResponseStyle::Empathetic);
        store.append(entry.clone()).unwrap();
        store.clear();
        assert!(matches!(
            store.append(entry),
            Err(ValidationError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_set_style_named() {
        let mut store = MessageStore::new();
        assert_eq!(
            store.set_style_named("motivational"),
            Ok(ResponseStyle::Motivational)
        );
        assert_eq!(store.current_style(), ResponseStyle::Motivational);

        assert!(matches!(
            store.set_style_named("sarcastic"),
            Err(ValidationError::InvalidStyle(_))
        ));
        assert_eq!(store.current_style(), ResponseStyle::Motivational);
    }

    #[test]
    fn test_style_change_does_not_touch_recorded_entries() {
        let mut store = MessageStore::new();
        store
            .append(ConversationEntry::user("hi", ResponseStyle::Empathetic))
            .unwrap();
        store.set_style(ResponseStyle::Encouragement);
        assert_eq!(
            store.entries()[0].response_style,
            Some(ResponseStyle::Empathetic)
        );
    }

    #[test]
    fn test_clear_resets_entries_and_style_but_not_avatar() {
        let mut store = MessageStore::with_state(welcome_state());
        for i in 0..25 {
            store
                .append(ConversationEntry::user(format!("msg {i}"), ResponseStyle::Friendly))
                .unwrap();
        }
        store.set_style(ResponseStyle::StressRelief);
        store.set_avatar("🦊");

        store.clear();

        assert!(store.entries().is_empty());
        assert_eq!(store.current_style(), ResponseStyle::default());
        assert_eq!(store.state().companion_avatar, "🦊");
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_mutations_are_published() {
        let mut store = MessageStore::new();
        let mut rx = store.subscribe();

        store.set_pending(true);
        store.set_pending(true);
        let entry = ConversationEntry::user("hello", ResponseStyle::Empathetic);
        let id = entry.id.clone();
        store.append(entry).unwrap();
        store.set_pending(false);
        store.set_avatar("🐼");
        store.clear();

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::PendingChanged(true));
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Appended { id });
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::PendingChanged(false));
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::AvatarChanged("🐼".to_string())
        );
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Cleared);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_with_state_reserves_loaded_ids() {
        let state = welcome_state();
        let welcome = state.entries[0].clone();
        let mut store = MessageStore::with_state(state);

        assert_eq!(store.state().companion_avatar, DEFAULT_AVATAR);
        assert!(!store.is_pending());
        assert!(matches!(
            store.append(welcome),
            Err(ValidationError::DuplicateId(_))
        ));
    }
}
