//! Run events and the process-wide event bus.
//!
//! Every state transition of a run is published as an immutable [`Event`].
//! Subscribers each own a private, unbounded FIFO inbox, so a slow or
//! stalled consumer never applies back-pressure to the run that publishes,
//! and one consumer going away never affects delivery to the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::SessionKey;

/// The fixed set of event types a run can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepEnded,
    ToolStarted,
    ToolEnded,
    Status,
    RunDone,
    RunError,
}

impl EventKind {
    /// Wire name for this event type (also used as the SSE event name).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::StepStarted => "step_started",
            Self::StepEnded => "step_ended",
            Self::ToolStarted => "tool_started",
            Self::ToolEnded => "tool_ended",
            Self::Status => "status",
            Self::RunDone => "run_done",
            Self::RunError => "run_error",
        }
    }

    /// `run_done` and `run_error` are the last event of every run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunDone | Self::RunError)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one run (one end-to-end execution for one incoming message).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub run_id: RunId,

    pub session_id: SessionKey,

    pub timestamp: DateTime<Utc>,

    /// Opaque payload; keys depend on the event type
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        run_id: RunId,
        session_id: SessionKey,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            run_id,
            session_id,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Run(RunId),
    Session(SessionKey),
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Run(id) => &event.run_id == id,
            Self::Session(key) => &event.session_id == key,
        }
    }
}

/// A fire-and-forget listener for one event type.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inbox {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

#[derive(Default)]
struct Registry {
    inboxes: RwLock<HashMap<u64, Inbox>>,
    callbacks: RwLock<HashMap<EventKind, Vec<EventCallback>>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) -> bool {
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        inboxes.remove(&id).is_some()
    }
}

/// Publish/subscribe fan-out for run events.
///
/// Constructed once at process start and shared by `Arc`. `publish` never
/// awaits: every inbox is an unbounded channel.
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
        }
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_filtered(EventFilter::All)
    }

    /// Subscribe to the events matching `filter`.
    ///
    /// Filtering happens on the publisher side, so a run-scoped subscription
    /// never buffers other runs' events.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .inboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Inbox { filter, tx });
        debug!(subscription = id, "Subscription opened");
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, mut subscription: Subscription) -> bool {
        subscription.close()
    }

    /// Register a synchronous listener invoked for every event of `kind`,
    /// in addition to queue delivery.
    pub fn register_callback<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry
            .callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publish an event to every matching inbox and callback.
    ///
    /// Returns the number of inboxes the event was enqueued into. Inboxes
    /// whose receiver is gone are pruned; a panicking callback is logged
    /// and skipped.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        self.registry.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let inboxes = self
                .registry
                .inboxes
                .read()
                .unwrap_or_else(|e| e.into_inner());
            for (id, inbox) in inboxes.iter() {
                if !inbox.filter.matches(&event) {
                    continue;
                }
                match inbox.tx.send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(*id),
                }
            }
        }

        for id in closed {
            if self.registry.remove(id) {
                debug!(subscription = id, "Pruned closed subscription");
            }
        }

        let callbacks: Vec<EventCallback> = self
            .registry
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event.as_ref()))).is_err() {
                warn!(event = %event.kind, "Event callback panicked");
            }
        }

        delivered
    }

    /// Number of currently registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Total number of events published since the bus was created.
    pub fn published_count(&self) -> u64 {
        self.registry.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a timeout-bounded receive.
#[derive(Debug)]
pub enum Received {
    Event(Arc<Event>),
    /// Nothing arrived within the timeout; the subscription is still open.
    Empty,
    /// The subscription is closed and its buffer is drained.
    Closed,
}

/// One consumer's private inbox. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<Event>>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Wait at most `timeout` for the next event.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Received::Event(event),
            Ok(None) => Received::Closed,
            Err(_) => Received::Empty,
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    /// Take every event currently buffered, in publish order.
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Detach from the bus. Events already enqueued stay readable.
    pub fn close(&mut self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.remove(self.id);
                if removed {
                    debug!(subscription = self.id, "Subscription closed");
                }
                removed
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
