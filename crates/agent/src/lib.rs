//! The execution loop: the heart of deskloop.
//!
//! A run follows a **Decide → Invoke** cycle:
//!
//! 1. **Load** the session's history and append the user turn
//! 2. **Decide**: send system prompt + history + tool schemas to the decision maker
//! 3. **If tool calls**: execute them in order, append each result, loop back to step 2
//! 4. **If an answer**: append it and stop
//!
//! The cycle is bounded by `max_iterations`. [`RunDriver`] runs it either to a
//! single answer or as a live stream of events on the [`EventBus`].
//!
//! [`EventBus`]: deskloop_core::EventBus

pub mod driver;
pub mod loop_runner;
pub mod prompt;
pub mod stream;

#[cfg(test)]
mod test_helpers;

pub use driver::{FAILURE_MESSAGE, RunDriver, RunHandle};
pub use loop_runner::{
    ExecutionLoop, INCOMPLETE_ANSWER, LoopState, NextAction, Phase, RunContext, RunOutcome,
    TerminationReason,
};
pub use prompt::DEFAULT_SYSTEM_PROMPT;
pub use stream::RunStream;
