//! Streaming: a trigger-node-driven worker loop that keeps re-running a graph until
//! stopped.

use crate::context::Context;
use crate::graph::Graph;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running streaming graph's background task handle and stop flag. The worker loop
/// runs `graph.process` repeatedly; between runs it checks `stop` so
/// `stop_streaming` can end the loop without forcing an abort mid-run.
pub struct StreamingState {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamingState {
    /// Spawns the worker loop. `trigger_node_name` is recorded only for logging: the
    /// trigger node's own kernel body is what actually paces each iteration (e.g. by
    /// blocking on an external event source), so the loop itself just calls
    /// `process` back-to-back and relies on the graph's own nodes to rate-limit.
    pub fn start(ctx: Context, graph: Graph, trigger_node_name: Option<String>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = tokio::spawn(async move {
            debug!(trigger = ?trigger_node_name, "streaming worker started");
            while !stop_flag.load(Ordering::Acquire) {
                if let Err(err) = graph.process(&ctx).await {
                    warn!(error = %err, "streaming run failed; continuing loop");
                }
            }
            debug!("streaming worker stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Requests the loop stop, then waits up to `timeout` for it to observe the flag
    /// and exit; force-aborts on expiry. Either way, resets every node's `executed`
    /// flag so a subsequent non-streaming `process` call starts from a clean wave.
    pub async fn stop(&mut self, ctx: &Context, graph: &Graph, timeout: Duration) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let abort_handle = handle.abort_handle();
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("streaming worker did not stop within timeout; aborting");
                abort_handle.abort();
            }
        }
        if let Ok(graph_object) = ctx.with_entity(graph.handle, |e| {
            e.as_graph()
                .cloned()
                .ok_or_else(|| crate::error::VxError::invalid_reference("graph"))
        }) {
            let node_handles: Vec<_> = graph_object.nodes.read().unwrap().clone();
            for handle in node_handles {
                let _ = ctx.with_entity(handle, |e| {
                    if let Some(node) = e.as_node() {
                        node.executed.store(false, Ordering::Release);
                    }
                    Ok(())
                });
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}
