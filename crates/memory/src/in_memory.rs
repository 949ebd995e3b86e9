//! In-memory conversation store. History lives for the process lifetime.

use async_trait::async_trait;
use deskloop_core::error::StoreError;
use deskloop_core::message::{ConversationHistory, SessionKey, Turn};
use deskloop_core::session::ConversationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    turns: Vec<Turn>,
}

type Slot = Arc<Mutex<SlotState>>;

/// Stores each session's turns behind its own lock, so appends on one key
/// never wait on another key. A cleared session keeps its slot so that its
/// generation survives the clear.
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<SessionKey, Slot>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, session: &SessionKey) -> Option<Slot> {
        self.sessions.read().await.get(session).cloned()
    }

    async fn slot_or_insert(&self, session: &SessionKey) -> Slot {
        if let Some(slot) = self.slot(session).await {
            return slot;
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.clone()).or_default().clone()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    fn name(&self) -> &str { "in_memory" }

    async fn get(&self, session: &SessionKey) -> Result<ConversationHistory, StoreError> {
        let turns = match self.slot(session).await {
            Some(slot) => slot.lock().await.turns.clone(),
            None => Vec::new(),
        };
        Ok(ConversationHistory {
            session: session.clone(),
            turns,
        })
    }

    async fn append(&self, session: &SessionKey, turn: Turn) -> Result<(), StoreError> {
        let slot = self.slot_or_insert(session).await;
        let mut state = slot.lock().await;
        state.turns.push(turn);
        tracing::trace!(session = %session, turns = state.turns.len(), "Turn appended");
        Ok(())
    }

    async fn generation(&self, session: &SessionKey) -> Result<u64, StoreError> {
        Ok(match self.slot(session).await {
            Some(slot) => slot.lock().await.generation,
            None => 0,
        })
    }

    async fn append_if_current(
        &self,
        session: &SessionKey,
        generation: u64,
        turn: Turn,
    ) -> Result<bool, StoreError> {
        let slot = self.slot_or_insert(session).await;
        let mut state = slot.lock().await;
        if state.generation != generation {
            tracing::debug!(
                session = %session,
                expected = generation,
                current = state.generation,
                "Dropping turn for a cleared session"
            );
            return Ok(false);
        }
        state.turns.push(turn);
        tracing::trace!(session = %session, turns = state.turns.len(), "Turn appended");
        Ok(true)
    }

    async fn clear(&self, session: &SessionKey) -> Result<bool, StoreError> {
        let Some(slot) = self.slot(session).await else {
            return Ok(false);
        };
        let mut state = slot.lock().await;
        let had_turns = !state.turns.is_empty();
        state.turns.clear();
        state.generation += 1;
        tracing::debug!(session = %session, generation = state.generation, "Session cleared");
        Ok(had_turns)
    }

    async fn sessions(&self) -> Result<Vec<SessionKey>, StoreError> {
        let slots: Vec<(SessionKey, Slot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        let mut keys = Vec::new();
        for (key, slot) in slots {
            if !slot.lock().await.turns.is_empty() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskloop_core::message::Role;

    #[tokio::test]
    async fn unseen_session_is_empty() {
        let store = InMemoryConversationStore::new();
        let history = store.get(&SessionKey::from("nobody")).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.session.as_str(), "nobody");
        // Reading does not create the session.
        assert!(store.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = InMemoryConversationStore::new();
        let key = SessionKey::from("s1");
        store.append(&key, Turn::user("hello")).await.unwrap();
        store.append(&key, Turn::assistant("Hi! How can I help?")).await.unwrap();

        let history = store.get(&key).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns[0].role, Role::User);
        assert_eq!(history.turns[1].content, "Hi! How can I help?");
    }

    #[tokio::test]
    async fn get_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let key = SessionKey::from("s1");
        store.append(&key, Turn::user("hello")).await.unwrap();
        let first = store.get(&key).await.unwrap();
        let second = store.get(&key).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemoryConversationStore::new();
        let a = SessionKey::from("a");
        let b = SessionKey::from("b");
        store.append(&a, Turn::user("from a")).await.unwrap();
        store.append(&b, Turn::user("from b")).await.unwrap();
        store.append(&b, Turn::assistant("reply b")).await.unwrap();

        assert_eq!(store.get(&a).await.unwrap().len(), 1);
        assert_eq!(store.get(&b).await.unwrap().len(), 2);
        assert_eq!(store.get(&a).await.unwrap().turns[0].content, "from a");
        assert_eq!(store.sessions().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn clear_removes_only_that_session() {
        let store = InMemoryConversationStore::new();
        let a = SessionKey::from("a");
        let b = SessionKey::from("b");
        store.append(&a, Turn::user("x")).await.unwrap();
        store.append(&b, Turn::user("y")).await.unwrap();

        assert!(store.clear(&a).await.unwrap());
        assert!(!store.clear(&a).await.unwrap());
        assert!(store.get(&a).await.unwrap().is_empty());
        assert_eq!(store.get(&b).await.unwrap().len(), 1);
        assert_eq!(store.sessions().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn appends_from_before_a_clear_are_dropped() {
        let store = InMemoryConversationStore::new();
        let key = SessionKey::from("s1");
        assert_eq!(store.generation(&key).await.unwrap(), 0);

        assert!(store.append_if_current(&key, 0, Turn::user("hello")).await.unwrap());
        store.clear(&key).await.unwrap();
        assert_eq!(store.generation(&key).await.unwrap(), 1);

        assert!(!store.append_if_current(&key, 0, Turn::assistant("stale")).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_empty());

        assert!(store.append_if_current(&key, 1, Turn::user("fresh start")).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().turns[0].content, "fresh start");
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryConversationStore::new());
        let key = SessionKey::from("busy");

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.append(&key, Turn::user(format!("msg {i}"))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(&key).await.unwrap().len(), 50);
    }
}
