//! ConversationStore trait: session-scoped turn history.
//!
//! The store is what makes a run resumable: every run under a session key
//! sees the turns of all earlier runs under that key, and nothing else.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::message::{ConversationHistory, SessionKey, Turn};

/// The single storage interface for conversation history.
///
/// Implementations must make `append` atomic with respect to concurrent
/// appends on the same key, and must keep keys fully independent.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// The history for `session`, or an empty one for an unseen key.
    async fn get(&self, session: &SessionKey) -> std::result::Result<ConversationHistory, StoreError>;

    /// Append one turn to the end of `session`'s history.
    async fn append(&self, session: &SessionKey, turn: Turn) -> std::result::Result<(), StoreError>;

    /// The current generation of `session`. Starts at 0 and advances on
    /// every `clear`.
    async fn generation(&self, session: &SessionKey) -> std::result::Result<u64, StoreError>;

    /// Append `turn` only while `session` is still at `generation`. Returns
    /// `false` and stores nothing once a `clear` has intervened.
    async fn append_if_current(
        &self,
        session: &SessionKey,
        generation: u64,
        turn: Turn,
    ) -> std::result::Result<bool, StoreError>;

    /// Drop all of `session`'s turns and start a new generation. Returns
    /// whether it held any.
    async fn clear(&self, session: &SessionKey) -> std::result::Result<bool, StoreError>;

    /// Keys of all sessions that currently hold history.
    async fn sessions(&self) -> std::result::Result<Vec<SessionKey>, StoreError>;
}
