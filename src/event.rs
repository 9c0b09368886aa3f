//! The context-wide event queue: a bounded, drop-oldest ring buffer with per-reference
//! registrations.
//!
//! Graph/node lifecycle notifications (completion, abandonment, parameter consumption,
//! user-raised) are pushed here for clients polling or blocking-waiting on
//! [`EventQueue::wait`]. Under sustained backpressure the queue drops its *oldest* entry
//! rather than blocking the producer or growing without bound — producers (the
//! executor) must never stall waiting on a slow consumer. `original_source`'s
//! `vx_event_queue.hpp` is the concrete behavior this module follows: a disabled queue
//! fails pushes outright, a registration overrides the `app_value` carried by matching
//! events, and `wait` takes either a blocking or non-blocking form.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// The closed set of event kinds this queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeCompleted,
    NodeError,
    GraphCompleted,
    GraphParameterConsumed,
    User,
}

/// Per-kind payload data carried by an [`Event`], beyond the common envelope fields.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Node { node_name: Option<String> },
    NodeError { node_name: Option<String>, detail: String },
    Graph { graph_name: Option<String> },
    ParameterConsumed { graph_parameter_index: usize },
    User { user_value: u32 },
}

/// One notification recorded in the event queue: a common envelope (`type`,
/// monotonic-ns `timestamp`, `app_value`) plus a type-selected payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    /// Monotonic nanosecond timestamp, taken relative to the queue's creation rather
    /// than the Unix epoch (matching `original_source`'s `getTimestamp()`, a
    /// steady-clock reading, not wall-clock time).
    pub timestamp_ns: u64,
    pub app_value: u32,
    pub payload: EventPayload,
}

impl Event {
    pub fn node_completed(node_name: Option<String>) -> (EventType, EventPayload) {
        (EventType::NodeCompleted, EventPayload::Node { node_name })
    }

    pub fn node_error(node_name: Option<String>, detail: impl Into<String>) -> (EventType, EventPayload) {
        (
            EventType::NodeError,
            EventPayload::NodeError {
                node_name,
                detail: detail.into(),
            },
        )
    }

    pub fn graph_completed(graph_name: Option<String>) -> (EventType, EventPayload) {
        (EventType::GraphCompleted, EventPayload::Graph { graph_name })
    }

    pub fn parameter_consumed(graph_parameter_index: usize) -> (EventType, EventPayload) {
        (
            EventType::GraphParameterConsumed,
            EventPayload::ParameterConsumed { graph_parameter_index },
        )
    }

    pub fn user(user_value: u32) -> (EventType, EventPayload) {
        (EventType::User, EventPayload::User { user_value })
    }
}

/// A registration entry: events of `event_type` raised against `reference` have their
/// `app_value` overridden with `app_value`, mirroring `registerEvent` in
/// `original_source/framework/include/vx_event_queue.hpp`. `reference_tag` is an opaque
/// identifier for "which reference" (a `RefHandle`'s `(index, generation)` pair,
/// formatted by the caller) since this module does not depend on `crate::reference` to
/// stay a leaf utility usable before a `Context` exists.
#[derive(Debug, Clone)]
struct Registration {
    reference_tag: u64,
    event_type: EventType,
    #[allow(dead_code)]
    graph_parameter: Option<usize>,
    app_value: u32,
}

struct Inner {
    queue: VecDeque<Event>,
    capacity: usize,
    dropped: u64,
    registrations: Vec<Registration>,
}

/// A bounded, drop-oldest event queue shared by a [`crate::context::Context`].
///
/// Disabled by default (per `original_source`'s `EventQueue(enabled=false, ...)`
/// default): `push` is a no-op until [`EventQueue::enable`] is called, so a client that
/// never asks for events pays no bookkeeping cost and never blocks on one.
pub struct EventQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    enabled: AtomicBool,
    start: std::time::Instant,
    next_app_value: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
                registrations: Vec::new(),
            }),
            notify: Notify::new(),
            enabled: AtomicBool::new(false),
            start: std::time::Instant::now(),
            next_app_value: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn now_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Registers an `app_value` override for `(reference_tag, event_type)`.
    pub async fn register(&self, reference_tag: u64, event_type: EventType, graph_parameter: Option<usize>, app_value: u32) {
        let mut inner = self.inner.lock().await;
        inner.registrations.push(Registration {
            reference_tag,
            event_type,
            graph_parameter,
            app_value,
        });
    }

    /// Pushes an event with no originating reference (e.g. `GraphCompleted`, which has
    /// no single-reference registration target). A no-op when the queue is disabled,
    /// matching `original_source`'s `VX_FAILURE` path for a disabled queue — callers
    /// raise events best-effort and do not treat this as engine-fatal.
    pub async fn push(&self, event_type: EventType, payload: EventPayload, app_value: u32) {
        self.push_for_reference(None, event_type, payload, app_value).await;
    }

    /// Pushes an event, applying any matching registration's `app_value` override if
    /// `reference_tag` is given and a registration exists for `(reference_tag,
    /// event_type)`.
    pub async fn push_for_reference(
        &self,
        reference_tag: Option<u64>,
        event_type: EventType,
        payload: EventPayload,
        app_value: u32,
    ) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock().await;
        let resolved_app_value = reference_tag
            .and_then(|tag| {
                inner
                    .registrations
                    .iter()
                    .find(|r| r.reference_tag == tag && r.event_type == event_type)
                    .map(|r| r.app_value)
            })
            .unwrap_or(app_value);
        let event = Event {
            event_type,
            timestamp_ns: self.now_ns(),
            app_value: resolved_app_value,
            payload,
        };
        if inner.queue.len() >= inner.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
            warn!(dropped_total = inner.dropped, "event queue at capacity; dropped oldest event");
        }
        inner.queue.push_back(event);
        self.notify.notify_waiters();
    }

    /// Raises a `User` event with an application-chosen value.
    pub async fn send_user(&self, user_value: u32) {
        let (event_type, payload) = Event::user(user_value);
        let app_value = self.next_app_value.fetch_add(1, Ordering::AcqRel) as u32;
        self.push(event_type, payload, app_value).await;
    }

    /// Pops the oldest event, waiting up to `timeout` if the queue is currently empty
    /// and the queue is enabled. Returns `None` immediately if the queue is disabled
    /// (matching `wait`'s `VX_FAILURE` on a disabled queue).
    pub async fn wait(&self, timeout: std::time::Duration) -> Option<Event> {
        if !self.is_enabled() {
            return None;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(event) = inner.queue.pop_front() {
                    return Some(event);
                }
            }
            if !self.is_enabled() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Non-blocking poll: pops the oldest event if one is queued, without waiting.
    pub async fn try_pop(&self) -> Option<Event> {
        self.inner.lock().await.queue.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn dropped_count(&self) -> u64 {
        self.inner.lock().await.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oldest_event_is_dropped_at_capacity() {
        let queue = EventQueue::new(2);
        queue.enable();
        let (t, p) = Event::node_completed(Some("a".into()));
        queue.push(t, p, 0).await;
        let (t, p) = Event::node_completed(Some("b".into()));
        queue.push(t, p, 0).await;
        let (t, p) = Event::node_completed(Some("c".into()));
        queue.push(t, p, 0).await;
        assert_eq!(queue.dropped_count().await, 1);
        let first = queue.wait(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(
            first.payload,
            EventPayload::Node { node_name: Some("b".into()) }
        );
    }

    #[tokio::test]
    async fn wait_times_out_on_empty_queue() {
        let queue = EventQueue::new(4);
        queue.enable();
        let result = queue.wait(std::time::Duration::from_millis(10)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn disabled_queue_drops_pushes_and_fails_wait() {
        let queue = EventQueue::new(4);
        let (t, p) = Event::node_completed(None);
        queue.push(t, p, 0).await;
        assert_eq!(queue.len().await, 0);
        assert!(queue.wait(std::time::Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn registration_overrides_app_value() {
        let queue = EventQueue::new(4);
        queue.enable();
        queue.register(42, EventType::NodeCompleted, None, 999).await;
        let (t, p) = Event::node_completed(Some("n".into()));
        queue.push_for_reference(Some(42), t, p, 1).await;
        let event = queue.wait(std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(event.app_value, 999);
    }

    #[tokio::test]
    async fn events_observed_in_push_order() {
        let queue = EventQueue::new(8);
        queue.enable();
        for i in 0..5u32 {
            let (t, p) = Event::user(i);
            queue.push(t, p, i).await;
        }
        let mut seen = Vec::new();
        while let Some(event) = queue.try_pop().await {
            if let EventPayload::User { user_value } = event.payload {
                seen.push(user_value);
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
