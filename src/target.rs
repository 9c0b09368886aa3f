//! Target: a back-end capable of running some subset of registered kernels. Selection
//! is priority-ordered; `Context::find_target` picks the highest-priority loaded
//! target that claims a given kernel name.

use crate::context::Context;
use crate::error::Result;
use crate::node::{NodeBinding, NodeObject};
use async_trait::async_trait;
use std::sync::Arc;

/// Whether the executor should keep running the wavefront after a node's dispatch, or
/// abandon the current graph run because a kernel signaled it should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAction {
    Continue,
    Abandon,
}

/// A kernel back-end. Grounded in this codebase's own `Store` trait shape: an
/// `#[async_trait]` object-safe trait rather than the manual `Pin<Box<dyn Future>>`
/// style used for [`crate::kernel::KernelBody`] — targets are invoked far less often
/// per wave (once per dispatch batch, not once per node), so the extra boxing
/// `#[async_trait]` introduces is not on a hot path here.
#[async_trait]
pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    /// Higher priority targets are preferred by `Context::find_target` when more than
    /// one loaded target supports the same kernel.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns `Some(cost)` if this target can run `kernel_name`, with lower cost
    /// preferred when two targets of equal priority both claim it; `None` otherwise.
    fn supports(&self, kernel_name: &str) -> Option<usize>;

    /// Target-specific verification beyond the kernel's own validator (e.g. a format
    /// restriction particular to this back-end).
    fn verify(&self, _node: &NodeBinding<'_>) -> Result<()> {
        Ok(())
    }

    /// Whether this target can run more than one node of a wave concurrently. When
    /// `false`, or when the context's re-entrancy depth is greater than one, the
    /// executor dispatches serially even within a wave.
    fn supports_parallel_dispatch(&self) -> bool {
        true
    }

    /// Runs `count` nodes starting at `start` in `nodes`, returning the aggregate
    /// action: `Abandon` if any of them requested it.
    async fn process(&self, ctx: &Context, nodes: &[Arc<NodeObject>], start: usize, count: usize) -> Result<TargetAction>;
}

/// A reference target that simply awaits each node's kernel body in-process. Good
/// enough to exercise the engine end-to-end without a real device back-end; the
/// default target loaded by [`crate::context::Context`] when no other target claims a
/// kernel.
pub struct LocalTarget {
    priority: i32,
}

impl LocalTarget {
    pub fn new() -> Self {
        Self { priority: 0 }
    }

    pub fn with_priority(priority: i32) -> Self {
        Self { priority }
    }
}

impl Default for LocalTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Target for LocalTarget {
    fn name(&self) -> &str {
        "local"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn supports(&self, _kernel_name: &str) -> Option<usize> {
        Some(0)
    }

    async fn process(&self, ctx: &Context, nodes: &[Arc<NodeObject>], start: usize, count: usize) -> Result<TargetAction> {
        for node in &nodes[start..start + count] {
            let binding = NodeBinding::new(node, ctx);
            if let Err(err) = node.kernel.body.run(&binding).await {
                tracing::error!(node = ?node.name(), error = %err, "kernel body failed");
                return Ok(TargetAction::Abandon);
            }
            node.executed.store(true, std::sync::atomic::Ordering::Release);
        }
        Ok(TargetAction::Continue)
    }
}
