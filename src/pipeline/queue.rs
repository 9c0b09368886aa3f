//! Per-graph-parameter pending/ready/done FIFO queues.
//!
//! Each externally bindable graph parameter gets one [`ParameterQueue`]: references
//! enqueued by the client sit in `pending` until a run consumes the graph's current
//! binding into `ready`->`done`-dequeue order, letting the client feed the next run's
//! inputs while the current run is still executing.

use crate::error::{Result, VxError};
use crate::reference::RefHandle;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RefHandle>,
    done: VecDeque<RefHandle>,
    /// The reference currently bound to the graph parameter this queue feeds, i.e.
    /// the head of `ready`. Modeled as a single slot rather than a
    /// third `VecDeque` because at most one reference is ever "in flight" per
    /// enqueueable parameter at a time — the executor rebinds it at the start of each
    /// run and retires it to `done` at the end of that same run.
    current: Option<RefHandle>,
}

/// The three-FIFO queue for one graph parameter. `pending` holds references enqueued
/// by the client and not yet bound to a run; the currently-bound reference lives on
/// the graph parameter binding itself (not duplicated here); `done` holds references
/// whose run has completed and which are waiting to be dequeued back to the client.
pub struct ParameterQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl ParameterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub async fn enqueue(&self, handle: RefHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.pending.len() >= self.capacity {
            return Err(VxError::NoResources("pipelining queue is at capacity".into()));
        }
        state.pending.push_back(handle);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Pops the next pending reference to bind for the upcoming run, if any.
    pub async fn try_advance(&self) -> Option<RefHandle> {
        self.state.lock().await.pending.pop_front()
    }

    pub async fn mark_done(&self, handle: RefHandle) {
        let mut state = self.state.lock().await;
        state.done.push_back(handle);
        self.notify.notify_waiters();
    }

    /// Promotes the next pending reference to `current`, returning it, so the executor
    /// can rebind the graph parameter to it for the run about to start. Leaves `current`
    /// unchanged (and returns a clone of it) if `pending` is empty — a parameter with
    /// nothing new to feed it stays bound to whatever it last ran with.
    pub async fn advance(&self) -> Option<RefHandle> {
        let mut state = self.state.lock().await;
        if let Some(next) = state.pending.pop_front() {
            state.current = Some(next);
        }
        state.current
    }

    /// The reference currently bound to this queue's graph parameter, if any.
    pub async fn current(&self) -> Option<RefHandle> {
        self.state.lock().await.current
    }

    /// Retires the currently-bound reference to `done` at the end of a run: the
    /// binding that was just run becomes available to `dequeue_done` and the queue
    /// has no current binding until the next `advance`.
    pub async fn mark_current_done(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.current.take() {
            state.done.push_back(handle);
            self.notify.notify_waiters();
        }
    }

    /// Blocking dequeue of a completed reference: waits until a reference is
    /// available or `timeout` elapses.
    pub async fn dequeue_done(&self, timeout: std::time::Duration) -> Result<RefHandle> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(handle) = state.done.pop_front() {
                    return Ok(handle);
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(VxError::Failure("timed out waiting for a completed reference".into()));
            }
            let wait = self.notify.notified();
            if tokio::time::timeout(remaining, wait).await.is_err() {
                return Err(VxError::Failure("timed out waiting for a completed reference".into()));
            }
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn done_len(&self) -> usize {
        self.state.lock().await.done.len()
    }
}
