//! # deskloop Core
//!
//! Domain types, traits, and error definitions for the deskloop support
//! assistant runtime. This crate has **no framework dependencies**; it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod decision;
pub mod tool;
pub mod session;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{ConversationHistory, Role, SessionKey, ToolCallRequest, Turn};
pub use decision::{Decision, DecisionMaker, DecisionRequest};
pub use tool::{Tool, ToolDefinition, ToolRegistry, ToolResult};
pub use session::ConversationStore;
pub use event::{Event, EventBus, EventFilter, EventKind, Received, RunId, Subscription};
