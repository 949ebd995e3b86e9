//! Draining a streaming run.
//!
//! The consumer waits on its inbox for at most one poll interval at a time.
//! An empty wait while the run task is alive is a benign retry. Once the
//! task has finished, whatever is still buffered is handed out before the
//! stream ends, so nothing published to an open subscription is lost.

use std::sync::Arc;
use std::time::Duration;

use deskloop_core::Error;
use deskloop_core::event::{Event, Received, Subscription};
use futures::Stream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::driver::RunHandle;
use crate::loop_runner::RunOutcome;

pub struct RunStream {
    subscription: Subscription,
    handle: RunHandle,
    poll_interval: Duration,
    idle_timeout: Duration,
    last_activity: Instant,
    done: bool,
}

impl RunStream {
    pub fn new(
        subscription: Subscription,
        handle: RunHandle,
        poll_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            subscription,
            handle,
            poll_interval,
            idle_timeout,
            last_activity: Instant::now(),
            done: false,
        }
    }

    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }

    /// Next event of the run, or `None` once it is over.
    ///
    /// Ends after a terminal event, after the run task finished and the
    /// inbox is empty, or after `idle_timeout` without any event.
    pub async fn next_event(&mut self) -> Option<Arc<Event>> {
        if self.done {
            return None;
        }

        loop {
            match self.subscription.recv_timeout(self.poll_interval).await {
                Received::Event(event) => return Some(self.observe(event)),
                Received::Closed => {
                    self.done = true;
                    return None;
                }
                Received::Empty => {
                    if self.handle.is_finished() {
                        if let Some(event) = self.subscription.try_recv() {
                            return Some(self.observe(event));
                        }
                        debug!(run_id = %self.handle.run_id(), "Run finished without a terminal event");
                        self.done = true;
                        return None;
                    }
                    if self.last_activity.elapsed() >= self.idle_timeout {
                        warn!(
                            run_id = %self.handle.run_id(),
                            idle_secs = self.idle_timeout.as_secs(),
                            "Stream idle timeout, detaching from run"
                        );
                        self.done = true;
                        return None;
                    }
                }
            }
        }
    }

    fn observe(&mut self, event: Arc<Event>) -> Arc<Event> {
        self.last_activity = Instant::now();
        if event.kind.is_terminal() {
            self.done = true;
        }
        event
    }

    /// Drain to the end and collect every event.
    pub async fn collect(mut self) -> (Vec<Arc<Event>>, RunHandle) {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        (events, self.handle)
    }

    /// Stop consuming. The run continues; its outcome stays reachable
    /// through the returned handle.
    pub fn detach(self) -> RunHandle {
        self.handle
    }

    /// Drain to the end, then wait for the run's outcome.
    pub async fn finish(self) -> Result<RunOutcome, Error> {
        let (_, handle) = self.collect().await;
        handle.wait().await
    }

    /// Adapt into a `futures::Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_event().await.map(|event| (event, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RunDriver;
    use crate::loop_runner::ExecutionLoop;
    use crate::test_helpers::{ScriptedDecisionMaker, echo_registry, tool_call};
    use deskloop_core::decision::Decision;
    use deskloop_core::event::{EventBus, EventKind};
    use deskloop_core::message::SessionKey;
    use deskloop_memory::InMemoryConversationStore;
    use futures::StreamExt;
    use serde_json::json;

    fn driver(decision_maker: ScriptedDecisionMaker) -> RunDriver {
        let execution = ExecutionLoop::new(
            Arc::new(decision_maker),
            Arc::new(echo_registry()),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(EventBus::new()),
        );
        RunDriver::new(Arc::new(execution)).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn stream_ends_at_run_done() {
        let script = vec![
            Decision::tool_calls(vec![tool_call("echo", json!({"text": "x"}))]),
            Decision::answer("all set"),
        ];
        let stream = driver(ScriptedDecisionMaker::new(script).with_delay(Duration::from_millis(15)))
            .stream(SessionKey::from("s1"), "go");

        let (events, handle) = stream.collect().await;
        assert_eq!(events.first().unwrap().kind, EventKind::RunStarted);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::RunDone);
        assert_eq!(last.get("answer"), Some(&json!("all set")));
        assert_eq!(handle.wait().await.unwrap().answer, "all set");
    }

    #[tokio::test]
    async fn stream_ends_at_run_error() {
        let stream = driver(ScriptedDecisionMaker::new(vec![])).stream(SessionKey::from("s1"), "go");
        let events: Vec<_> = stream.into_stream().collect().await;
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RunStarted, EventKind::StepStarted, EventKind::RunError]);
        assert!(events[2].get("error").unwrap().as_str().unwrap().contains("script exhausted"));
    }

    #[tokio::test]
    async fn finish_returns_outcome() {
        let stream = driver(ScriptedDecisionMaker::new(vec![Decision::answer("hi")]))
            .stream(SessionKey::from("s1"), "hello");
        let outcome = stream.finish().await.unwrap();
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn idle_timeout_detaches() {
        let slow = ScriptedDecisionMaker::new(vec![Decision::answer("late")])
            .with_delay(Duration::from_millis(500));
        let mut stream = driver(slow)
            .with_idle_timeout(Duration::from_millis(50))
            .stream(SessionKey::from("s1"), "hello");

        assert_eq!(stream.next_event().await.unwrap().kind, EventKind::RunStarted);
        assert_eq!(stream.next_event().await.unwrap().kind, EventKind::StepStarted);
        assert!(stream.next_event().await.is_none());
        assert!(stream.next_event().await.is_none());

        // The run itself still completes.
        assert_eq!(stream.detach().wait().await.unwrap().answer, "late");
    }
}
