//! Conversation store implementations for deskloop.

pub mod in_memory;

pub use in_memory::InMemoryConversationStore;
