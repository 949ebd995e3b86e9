//! End-to-end integration tests for the deskloop support assistant.
//!
//! These tests exercise the full pipeline from a user message to the final
//! answer: the execution loop, the built-in tools, the conversation store,
//! the event bus and both run driver modes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskloop_agent::{ExecutionLoop, INCOMPLETE_ANSWER, RunDriver, TerminationReason};
use deskloop_core::decision::{Decision, DecisionMaker, DecisionRequest};
use deskloop_core::error::DecisionError;
use deskloop_core::event::{EventBus, EventKind};
use deskloop_core::message::{Role, SessionKey, ToolCallRequest};
use deskloop_core::session::ConversationStore;
use deskloop_memory::InMemoryConversationStore;
use deskloop_tools::{DocumentIndex, TicketBook, default_registry};
use serde_json::json;

// ── Mock Decision Makers ─────────────────────────────────────────────────

/// Returns scripted decisions in sequence.
struct ScriptedDecisionMaker {
    script: Mutex<VecDeque<Decision>>,
    calls: Mutex<usize>,
    delay: Duration,
}

impl ScriptedDecisionMaker {
    fn new(script: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.calls.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DecisionError::Network("script exhausted".into()))
    }
}

/// Always asks for the clock, never answers.
struct ClockWatcher {
    calls: Mutex<usize>,
}

#[async_trait::async_trait]
impl DecisionMaker for ClockWatcher {
    fn name(&self) -> &str {
        "clock_watcher"
    }

    async fn decide(&self, _request: DecisionRequest) -> Result<Decision, DecisionError> {
        *self.calls.lock().unwrap() += 1;
        Ok(Decision::tool_calls(vec![ToolCallRequest::new(
            "get_current_time",
            json!({}),
        )]))
    }
}

/// Looks at the history it is given: checks the clock once, then answers
/// quoting the user's latest message. Safe to share between sessions.
struct Parrot;

#[async_trait::async_trait]
impl DecisionMaker for Parrot {
    fn name(&self) -> &str {
        "parrot"
    }

    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let last = request
            .history
            .last()
            .ok_or_else(|| DecisionError::MalformedResponse("empty history".into()))?;
        if last.role == Role::User {
            return Ok(Decision::tool_calls(vec![ToolCallRequest::new(
                "get_current_time",
                json!({}),
            )]));
        }
        let asked = request
            .history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.clone())
            .unwrap_or_default();
        Ok(Decision::answer(format!("You said: {asked}")))
    }
}

fn call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(name, args)
}

struct Harness {
    driver: RunDriver,
    store: Arc<InMemoryConversationStore>,
    bus: Arc<EventBus>,
}

fn harness(decision_maker: Arc<dyn DecisionMaker>, index: DocumentIndex, max_iterations: usize) -> Harness {
    let store = Arc::new(InMemoryConversationStore::new());
    let bus = Arc::new(EventBus::new());
    let tools = Arc::new(default_registry(Arc::new(index), Arc::new(TicketBook::new())));
    let execution = ExecutionLoop::new(decision_maker, tools, store.clone(), bus.clone())
        .with_max_iterations(max_iterations);
    let driver = RunDriver::new(Arc::new(execution)).with_poll_interval(Duration::from_millis(10));
    Harness { driver, store, bus }
}

// ── Iteration cap of one ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_iteration_cap_of_one_stops_tool_loop() {
    let decision_maker = Arc::new(ClockWatcher {
        calls: Mutex::new(0),
    });
    let h = harness(decision_maker.clone(), DocumentIndex::empty(), 1);

    let outcome = h
        .driver
        .run(SessionKey::from("cap"), "what time is it, forever?")
        .await
        .expect("run should end at the cap, not fail");

    assert_eq!(outcome.termination_reason, TerminationReason::IterationLimit);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(*decision_maker.calls.lock().unwrap(), 1);
    assert_eq!(outcome.answer, INCOMPLETE_ANSWER);

    // user, assistant (tool request), tool result, final answer
    let history = h.store.get(&SessionKey::from("cap")).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.turns[2].role, Role::ToolResult);
    assert_eq!(history.last_answer().unwrap().content, INCOMPLETE_ANSWER);
}

// ── Immediate answer ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_immediate_answer_adds_two_turns() {
    let decision_maker = Arc::new(ScriptedDecisionMaker::new(vec![Decision::answer(
        "Hello! I'm your IT support assistant. How can I help?",
    )]));
    let h = harness(decision_maker.clone(), DocumentIndex::empty(), 30);

    let outcome = h.driver.run(SessionKey::from("hello"), "hi").await.unwrap();

    assert_eq!(outcome.termination_reason, TerminationReason::Normal);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.new_turns.len(), 2);
    assert_eq!(outcome.new_turns[0].role, Role::User);
    assert_eq!(outcome.new_turns[1].role, Role::Assistant);
    assert_eq!(decision_maker.calls(), 1);

    let history = h.store.get(&SessionKey::from("hello")).await.unwrap();
    assert_eq!(history.len(), 2);
}

// ── Concurrent streams stay apart ────────────────────────────────────────

#[tokio::test]
async fn e2e_concurrent_streams_see_only_their_own_run() {
    let h = harness(Arc::new(Parrot), DocumentIndex::empty(), 30);

    let first = h.driver.stream(SessionKey::from("alice"), "my laptop is slow");
    let second = h.driver.stream(SessionKey::from("bob"), "printer jammed");
    let first_run = first.handle().run_id().clone();
    let second_run = second.handle().run_id().clone();

    let ((first_events, first_handle), (second_events, second_handle)) =
        tokio::join!(first.collect(), second.collect());

    assert!(first_events.iter().all(|e| e.run_id == first_run));
    assert!(second_events.iter().all(|e| e.run_id == second_run));
    assert!(first_events.iter().all(|e| e.session_id == SessionKey::from("alice")));
    assert!(second_events.iter().all(|e| e.session_id == SessionKey::from("bob")));
    assert_eq!(first_events.last().unwrap().kind, EventKind::RunDone);
    assert_eq!(second_events.last().unwrap().kind, EventKind::RunDone);

    assert_eq!(first_handle.wait().await.unwrap().answer, "You said: my laptop is slow");
    assert_eq!(second_handle.wait().await.unwrap().answer, "You said: printer jammed");

    let alice = h.store.get(&SessionKey::from("alice")).await.unwrap();
    let bob = h.store.get(&SessionKey::from("bob")).await.unwrap();
    assert_eq!(alice.len(), 4);
    assert_eq!(bob.len(), 4);
    assert!(alice.turns.iter().all(|t| !t.content.contains("printer")));
    assert!(bob.turns.iter().all(|t| !t.content.contains("laptop")));
}

// ── A failing tool does not abort the run ────────────────────────────────

#[tokio::test]
async fn e2e_tool_error_becomes_result_turn() {
    let decision_maker = Arc::new(ScriptedDecisionMaker::new(vec![
        Decision::tool_calls(vec![call("get_ticket", json!({"ticket_id": 999}))]),
        Decision::answer("I couldn't find ticket #999. Could you double-check the number?"),
    ]));
    let h = harness(decision_maker.clone(), DocumentIndex::empty(), 30);
    let mut log = h.bus.subscribe();

    let outcome = h
        .driver
        .run(SessionKey::from("missing"), "status of ticket 999?")
        .await
        .unwrap();

    assert_eq!(outcome.termination_reason, TerminationReason::Normal);
    assert_eq!(decision_maker.calls(), 2);
    assert!(outcome.answer.contains("#999"));

    let result = &outcome.new_turns[2];
    assert_eq!(result.role, Role::ToolResult);
    assert!(result.content.starts_with("Error: "));
    assert!(result.content.contains("Ticket #999 not found"));

    let ended = log
        .drain()
        .into_iter()
        .find(|e| e.kind == EventKind::ToolEnded)
        .unwrap();
    assert_eq!(ended.get("success"), Some(&json!(false)));
    assert_eq!(ended.get("tool"), Some(&json!("get_ticket")));
}

// ── Unsubscribing does not lose the answer ───────────────────────────────

#[tokio::test]
async fn e2e_unsubscribe_mid_run_still_commits_answer() {
    let decision_maker = ScriptedDecisionMaker::new(vec![
        Decision::tool_calls(vec![call("get_current_time", json!({}))]),
        Decision::answer("It is late, go home."),
    ])
    .with_delay(Duration::from_millis(30));
    let h = harness(Arc::new(decision_maker), DocumentIndex::empty(), 30);

    let (mut subscription, handle) = h.driver.run_streaming(SessionKey::from("leaver"), "time?");
    let first = subscription.recv().await.unwrap();
    assert_eq!(first.kind, EventKind::RunStarted);
    assert!(subscription.close());
    drop(subscription);

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.answer, "It is late, go home.");

    let history = h.store.get(&SessionKey::from("leaver")).await.unwrap();
    assert_eq!(history.last_answer().unwrap().content, "It is late, go home.");
    assert_eq!(h.bus.subscriber_count(), 0);
}

// ── Supplemented tools end to end ────────────────────────────────────────

#[tokio::test]
async fn e2e_ticket_lifecycle_across_runs() {
    let decision_maker = Arc::new(ScriptedDecisionMaker::new(vec![
        Decision::tool_calls(vec![call(
            "create_ticket",
            json!({
                "subject": "VPN drops every hour",
                "description": "Connection resets at the top of each hour",
                "priority": "high",
                "category": "vpn"
            }),
        )]),
        Decision::answer("I've opened ticket #1 for you."),
        Decision::tool_calls(vec![
            call("update_ticket_status", json!({"ticket_id": "#1", "status": "open"})),
            call("get_ticket", json!({"ticket_id": 1})),
        ]),
        Decision::answer("Ticket #1 is now open."),
    ]));
    let h = harness(decision_maker, DocumentIndex::empty(), 30);
    let session = SessionKey::from("ticket-user");

    let created = h.driver.run(session.clone(), "my VPN keeps dropping").await.unwrap();
    assert!(created.new_turns[2].content.contains("Ticket Created Successfully!"));
    assert!(created.new_turns[2].content.contains("**Priority**: HIGH"));

    let updated = h.driver.run(session.clone(), "please open it").await.unwrap();
    assert_eq!(updated.tool_calls, 2);
    assert!(updated.new_turns[3].content.contains("VPN drops every hour"));
    assert!(!updated.new_turns[2].content.starts_with("Error: "));

    // Both runs share the session history.
    let history = h.store.get(&session).await.unwrap();
    assert_eq!(history.len(), created.new_turns.len() + updated.new_turns.len());
}

#[tokio::test]
async fn e2e_policy_search_answers_from_documents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("it_policy.md"),
        "# IT Policy\n\n## Passwords\n\nPasswords must be rotated every 90 days.\n\n## Email\n\nMailbox quota is 50 GB.\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("troubleshooting_guide.md"),
        "# Troubleshooting\n\n## Printer\n\nPower cycle the printer and clear the queue.\n",
    )
    .unwrap();
    let index = DocumentIndex::load(dir.path(), 1000, 3);

    let decision_maker = Arc::new(ScriptedDecisionMaker::new(vec![
        Decision::tool_calls(vec![call("search_it_policy", json!({"query": "password rotation days"}))]),
        Decision::answer("Passwords must be rotated every 90 days."),
    ]));
    let h = harness(decision_maker, index, 30);

    let outcome = h
        .driver
        .run(SessionKey::from("policy"), "how often do I change my password?")
        .await
        .unwrap();

    let result = &outcome.new_turns[2];
    assert!(result.content.contains("it_policy.md"));
    assert!(result.content.contains("90 days"));
    assert!(!result.content.contains("Printer"));
}

#[tokio::test]
async fn e2e_streaming_reports_status_and_final_answer() {
    let decision_maker = ScriptedDecisionMaker::new(vec![
        Decision::tool_calls(vec![call("get_current_time", json!({}))]),
        Decision::answer("It is time."),
    ]);
    let h = harness(Arc::new(decision_maker), DocumentIndex::empty(), 30);

    let (events, handle) = h.driver.stream(SessionKey::from("s"), "time?").collect().await;
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();

    assert_eq!(kinds.first(), Some(&EventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&EventKind::RunDone));
    assert!(kinds.contains(&EventKind::Status));
    let started = kinds.iter().position(|k| *k == EventKind::ToolStarted).unwrap();
    let ended = kinds.iter().position(|k| *k == EventKind::ToolEnded).unwrap();
    assert!(started < ended);

    let done = events.last().unwrap();
    assert_eq!(done.get("answer"), Some(&json!("It is time.")));
    assert_eq!(handle.wait().await.unwrap().tool_calls, 1);
}
