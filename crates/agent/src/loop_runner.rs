//! The bounded decide/invoke state machine.
//!
//! One [`ExecutionLoop::run`] call drives exactly one run:
//!
//! ```text
//!            tool calls                 all calls resolved
//! Deciding ────────────────▶ Invoking ─────────────────────┐
//!    │  ▲                                                  │
//!    │  └──────────── iteration < max ◀────────────────────┘
//!    │ answer                              │ iteration >= max
//!    ▼                                     ▼
//! Terminated ◀─────────────────────────────┘
//! ```
//!
//! Every new turn goes to the conversation store as soon as it exists, and
//! every transition is published on the event bus.

use std::sync::Arc;
use std::time::Instant;

use deskloop_core::decision::{Decision, DecisionMaker, DecisionRequest};
use deskloop_core::event::{Event, EventBus, EventKind, RunId};
use deskloop_core::message::{SessionKey, ToolCallRequest, Turn};
use deskloop_core::session::ConversationStore;
use deskloop_core::tool::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::prompt::DEFAULT_SYSTEM_PROMPT;

/// Appended when the iteration cap is hit before the model produced any text.
pub const INCOMPLETE_ANSWER: &str =
    "I wasn't able to complete this request within the allowed number of steps. Please try rephrasing or narrowing your question.";

/// Node names used in step events.
const AGENT_NODE: &str = "agent";
const TOOLS_NODE: &str = "tools";

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The decision maker produced a final answer.
    Normal,
    /// The iteration cap forced termination.
    IterationLimit,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::IterationLimit => "iteration_limit",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Continue,
    Done,
}

/// Where the state machine is.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Deciding,
    /// Carries the calls requested by the preceding decision, in order.
    Invoking(Vec<ToolCallRequest>),
    Terminated(TerminationReason),
}

/// Transient per-run state. Discarded when the run ends; its turns live on
/// in the conversation store.
#[derive(Debug, Clone)]
pub struct LoopState {
    /// Completed Deciding→Invoking→Deciding cycles. Starts at 0.
    pub iteration: usize,
    /// Decision maker calls made so far.
    pub decisions: usize,
    pub tool_calls: usize,
    pub history: Vec<Turn>,
    pub next_action: NextAction,
    /// Latest non-empty assistant text produced in this run.
    pub best_answer: Option<String>,
    /// Session generation the run started on.
    pub generation: u64,
    /// Set once the session was cleared under the run; later turns are
    /// kept in memory only.
    pub cleared: bool,
}

impl LoopState {
    fn new(history: Vec<Turn>, generation: u64) -> Self {
        Self {
            iteration: 0,
            decisions: 0,
            tool_calls: 0,
            history,
            next_action: NextAction::Continue,
            best_answer: None,
            generation,
            cleared: false,
        }
    }
}

/// What a finished run reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub session: SessionKey,
    /// Text of the final assistant turn.
    pub answer: String,
    /// Decision steps taken.
    pub iterations: usize,
    /// Tool rounds completed.
    pub tool_cycles: usize,
    pub tool_calls: usize,
    pub termination_reason: TerminationReason,
    /// Turns this run appended, user turn included.
    pub new_turns: Vec<Turn>,
}

/// Identity of one run, shared by every event it publishes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub session: SessionKey,
}

impl RunContext {
    pub fn new(session: SessionKey) -> Self {
        Self {
            run_id: RunId::new(),
            session,
        }
    }

    /// Build an event for this run. `data` must be a JSON object.
    pub fn event(&self, kind: EventKind, data: Value) -> Event {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Event::new(kind, self.run_id.clone(), self.session.clone(), data)
    }
}

/// Orchestrates decision maker, tools and store for one run at a time.
pub struct ExecutionLoop {
    decision_maker: Arc<dyn DecisionMaker>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    event_bus: Arc<EventBus>,
    system_prompt: String,
    max_iterations: usize,
}

impl ExecutionLoop {
    pub fn new(
        decision_maker: Arc<dyn DecisionMaker>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            decision_maker,
            tools,
            store,
            event_bus,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 30,
        }
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one message through the loop to `Terminated`.
    ///
    /// Decision maker and store failures end the run with `Err`; turns
    /// appended before the failure stay in the store. If the session is
    /// cleared while the run is in flight, the run finishes but stores
    /// nothing further.
    pub async fn run(
        &self,
        ctx: &RunContext,
        user_message: &str,
    ) -> Result<RunOutcome, deskloop_core::Error> {
        let generation = self.store.generation(&ctx.session).await?;
        let prior = self.store.get(&ctx.session).await?;
        info!(
            run_id = %ctx.run_id,
            session = %ctx.session,
            prior_turns = prior.len(),
            "Run started"
        );

        let mut state = LoopState::new(prior.turns, generation);
        let mut new_turns = Vec::new();
        self.persist(ctx, &mut state, &mut new_turns, Turn::user(user_message))
            .await?;

        let tool_definitions = self.tools.definitions();
        let mut phase = Phase::Deciding;

        let reason = loop {
            phase = match phase {
                Phase::Deciding => {
                    self.decide(ctx, &mut state, &mut new_turns, &tool_definitions)
                        .await?
                }
                Phase::Invoking(calls) => {
                    self.invoke(ctx, &mut state, &mut new_turns, calls).await?
                }
                Phase::Terminated(reason) => break reason,
            };
        };

        if reason == TerminationReason::IterationLimit {
            warn!(
                run_id = %ctx.run_id,
                iterations = state.iteration,
                max = self.max_iterations,
                "Iteration limit reached, terminating run"
            );
            let text = state
                .best_answer
                .clone()
                .unwrap_or_else(|| INCOMPLETE_ANSWER.to_string());
            self.persist(ctx, &mut state, &mut new_turns, Turn::assistant(text))
                .await?;
        }

        let answer = new_turns
            .last()
            .map(|t| t.content.clone())
            .unwrap_or_default();

        info!(
            run_id = %ctx.run_id,
            iterations = state.decisions,
            tool_calls = state.tool_calls,
            reason = %reason,
            "Run finished"
        );

        Ok(RunOutcome {
            run_id: ctx.run_id.clone(),
            session: ctx.session.clone(),
            answer,
            iterations: state.decisions,
            tool_cycles: state.iteration,
            tool_calls: state.tool_calls,
            termination_reason: reason,
            new_turns,
        })
    }

    /// Deciding: ask the decision maker and record what it chose.
    async fn decide(
        &self,
        ctx: &RunContext,
        state: &mut LoopState,
        new_turns: &mut Vec<Turn>,
        tool_definitions: &[deskloop_core::tool::ToolDefinition],
    ) -> Result<Phase, deskloop_core::Error> {
        self.publish(ctx, EventKind::StepStarted, json!({
            "node": AGENT_NODE,
            "iteration": state.iteration,
        }));

        let request = DecisionRequest {
            system_prompt: self.system_prompt.clone(),
            history: state.history.clone(),
            tools: tool_definitions.to_vec(),
        };
        let decision = self.decision_maker.decide(request).await?.normalize();
        state.decisions += 1;

        let next = match decision {
            Decision::ToolCalls { thought, calls } => {
                let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                debug!(run_id = %ctx.run_id, tools = ?names, "Decision: call tools");
                self.publish(ctx, EventKind::Status, json!({
                    "message": format!("Agent calling tools: {}", names.join(", ")),
                    "node": AGENT_NODE,
                    "tool_names": names,
                    "tool_count": calls.len(),
                }));

                if !thought.trim().is_empty() {
                    state.best_answer = Some(thought.clone());
                }
                self.persist(
                    ctx,
                    state,
                    new_turns,
                    Turn::assistant_with_calls(thought, calls.clone()),
                )
                .await?;
                Phase::Invoking(calls)
            }
            Decision::Answer { text } => {
                debug!(run_id = %ctx.run_id, "Decision: answer");
                self.publish(ctx, EventKind::Status, json!({
                    "message": "Agent providing final answer",
                    "node": AGENT_NODE,
                }));
                state.next_action = NextAction::Done;
                self.persist(ctx, state, new_turns, Turn::assistant(text))
                    .await?;
                Phase::Terminated(TerminationReason::Normal)
            }
        };

        self.publish(ctx, EventKind::StepEnded, json!({
            "node": AGENT_NODE,
            "iteration": state.iteration,
        }));
        Ok(next)
    }

    /// Invoking: run every call in order; a failed call becomes an error
    /// result and the batch continues.
    async fn invoke(
        &self,
        ctx: &RunContext,
        state: &mut LoopState,
        new_turns: &mut Vec<Turn>,
        calls: Vec<ToolCallRequest>,
    ) -> Result<Phase, deskloop_core::Error> {
        self.publish(ctx, EventKind::StepStarted, json!({
            "node": TOOLS_NODE,
            "iteration": state.iteration,
        }));

        let mut executed = Vec::with_capacity(calls.len());
        for call in &calls {
            self.publish(ctx, EventKind::ToolStarted, json!({
                "tool": call.name,
                "call_id": call.id,
                "args": call.arguments,
            }));

            let start = Instant::now();
            let result = self.tools.execute(call).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            state.tool_calls += 1;

            let (content, ended) = match result {
                Ok(output) => (
                    output.output,
                    json!({
                        "tool": call.name,
                        "call_id": call.id,
                        "success": output.success,
                        "duration_ms": duration_ms,
                    }),
                ),
                Err(e) => {
                    warn!(run_id = %ctx.run_id, tool = %call.name, error = %e, "Tool call failed");
                    (
                        format!("Error: {e}"),
                        json!({
                            "tool": call.name,
                            "call_id": call.id,
                            "success": false,
                            "duration_ms": duration_ms,
                            "error": e.to_string(),
                        }),
                    )
                }
            };

            self.persist(ctx, state, new_turns, Turn::tool_result(call, content))
                .await?;
            self.publish(ctx, EventKind::ToolEnded, ended);
            executed.push(call.name.as_str());
        }

        self.publish(ctx, EventKind::Status, json!({
            "message": format!("Executed {} tool(s): {}", executed.len(), executed.join(", ")),
            "node": TOOLS_NODE,
            "tool_names": executed,
            "tool_count": executed.len(),
        }));
        self.publish(ctx, EventKind::StepEnded, json!({
            "node": TOOLS_NODE,
            "iteration": state.iteration,
        }));

        state.iteration += 1;
        if state.iteration >= self.max_iterations {
            state.next_action = NextAction::Done;
            return Ok(Phase::Terminated(TerminationReason::IterationLimit));
        }
        Ok(Phase::Deciding)
    }

    async fn persist(
        &self,
        ctx: &RunContext,
        state: &mut LoopState,
        new_turns: &mut Vec<Turn>,
        turn: Turn,
    ) -> Result<(), deskloop_core::Error> {
        let stored = self
            .store
            .append_if_current(&ctx.session, state.generation, turn.clone())
            .await?;
        if !stored && !state.cleared {
            warn!(
                run_id = %ctx.run_id,
                session = %ctx.session,
                "Session cleared during run, remaining turns will not be stored"
            );
            state.cleared = true;
        }
        state.history.push(turn.clone());
        new_turns.push(turn);
        Ok(())
    }

    fn publish(&self, ctx: &RunContext, kind: EventKind, data: Value) {
        self.event_bus.publish(ctx.event(kind, data));
    }
}
