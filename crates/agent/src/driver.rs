//! Runs an [`ExecutionLoop`] either to a single answer or as a live event
//! stream.
//!
//! Both modes execute the loop on its own Tokio task. The caller only ever
//! waits on that task or on a subscription, so dropping the caller's future
//! or subscription never stops the run: it always reaches a terminal turn
//! and commits its history.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use deskloop_core::Error;
use deskloop_core::event::{EventBus, EventFilter, EventKind, RunId, Subscription};
use deskloop_core::message::SessionKey;
use futures::FutureExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::loop_runner::{ExecutionLoop, RunContext, RunOutcome};
use crate::stream::RunStream;

/// Shown to users when a run fails; the error detail goes to logs and the
/// `run_error` payload.
pub const FAILURE_MESSAGE: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

/// Starts runs. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct RunDriver {
    execution: Arc<ExecutionLoop>,
    poll_interval: Duration,
    idle_timeout: Duration,
}

impl RunDriver {
    pub fn new(execution: Arc<ExecutionLoop>) -> Self {
        Self {
            execution,
            poll_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// How long a [`RunStream`] waits on its inbox before checking whether
    /// the run task is still alive.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    /// How long a [`RunStream`] tolerates silence before giving up.
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn execution(&self) -> &Arc<ExecutionLoop> {
        &self.execution
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.execution.event_bus()
    }

    /// Blocking mode: run to completion and return the outcome.
    pub async fn run(
        &self,
        session: SessionKey,
        user_message: impl Into<String>,
    ) -> Result<RunOutcome, Error> {
        let ctx = RunContext::new(session);
        self.spawn(ctx, user_message.into()).wait().await
    }

    /// Streaming mode: subscribe to this run's events, then start it.
    ///
    /// The subscription exists before the first event is published, so it
    /// observes `run_started` through `run_done`/`run_error`.
    pub fn run_streaming(
        &self,
        session: SessionKey,
        user_message: impl Into<String>,
    ) -> (Subscription, RunHandle) {
        let ctx = RunContext::new(session);
        let subscription = self
            .event_bus()
            .subscribe_filtered(EventFilter::Run(ctx.run_id.clone()));
        let handle = self.spawn(ctx, user_message.into());
        (subscription, handle)
    }

    /// [`RunDriver::run_streaming`] wrapped in the drain protocol.
    pub fn stream(&self, session: SessionKey, user_message: impl Into<String>) -> RunStream {
        let (subscription, handle) = self.run_streaming(session, user_message);
        RunStream::new(subscription, handle, self.poll_interval, self.idle_timeout)
    }

    fn spawn(&self, ctx: RunContext, user_message: String) -> RunHandle {
        let execution = self.execution.clone();
        let run_id = ctx.run_id.clone();
        let session = ctx.session.clone();
        let join = tokio::spawn(drive(execution, ctx, user_message));
        RunHandle {
            run_id,
            session,
            join,
        }
    }
}

/// Publishes the run boundary events around one loop execution and
/// contains any failure, panics included.
async fn drive(
    execution: Arc<ExecutionLoop>,
    ctx: RunContext,
    user_message: String,
) -> Result<RunOutcome, Error> {
    let bus = execution.event_bus().clone();
    bus.publish(ctx.event(
        EventKind::RunStarted,
        json!({ "message": user_message }),
    ));

    let result = AssertUnwindSafe(execution.run(&ctx, &user_message))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic.as_ref()))));

    match &result {
        Ok(outcome) => {
            bus.publish(ctx.event(
                EventKind::RunDone,
                json!({
                    "answer": outcome.answer,
                    "iterations": outcome.iterations,
                    "termination_reason": outcome.termination_reason,
                    "tool_calls": outcome.tool_calls,
                }),
            ));
        }
        Err(e) => {
            error!(run_id = %ctx.run_id, session = %ctx.session, error = %e, "Run failed");
            bus.publish(ctx.event(
                EventKind::RunError,
                json!({
                    "error": e.to_string(),
                    "message": FAILURE_MESSAGE,
                }),
            ));
        }
    }
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("run panicked: {detail}")
}

/// The background task of one run. Dropping it detaches; the run goes on.
pub struct RunHandle {
    run_id: RunId,
    session: SessionKey,
    join: JoinHandle<Result<RunOutcome, Error>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<RunOutcome, Error> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                info!(run_id = %self.run_id, "Run task did not complete: {e}");
                Err(Error::Internal(format!("run task failed: {e}")))
            }
        }
    }
}
