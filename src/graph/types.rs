//! Core graph state shared by verification and execution.

use crate::pipeline::schedule::ScheduleConfig;
use crate::pipeline::streaming::StreamingState;
use crate::reference::{RefHandle, ReferenceHeader};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

/// A graph's lifecycle state. Transitions: `Unverified` →
/// `Verified` (successful `verify`) or stays `Unverified` on failure;
/// `Verified`/`Completed` → `Running` (`process` begins); `Running` → `Completed`
/// (wavefront drains with no abandon) or `Abandoned` (a kernel signaled `Abandon`).
/// Mutating the graph's topology after verification flips `reverify` and forces the
/// next `process` call to re-run `verify` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Unverified,
    Verified,
    Running,
    Completed,
    Abandoned,
}

/// Identifies one of the graph's externally bindable parameters: a (node, parameter
/// index) pair exposed at the graph level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphParameter {
    pub node_index: usize,
    pub parameter_index: usize,
}

pub struct GraphObject {
    pub header: Arc<ReferenceHeader>,
    /// Node handles in insertion order; verification's topological sort reorders a
    /// separate execution-order vector, not this one, so client-facing indices stay
    /// stable across re-verification.
    pub nodes: RwLock<Vec<RefHandle>>,
    /// Topologically-sorted head node indices (into `nodes`), computed at
    /// verification phase 8.
    pub heads: RwLock<Vec<usize>>,
    pub state: RwLock<GraphState>,
    /// Set when the graph's topology or a node's parameters changed after a
    /// successful verify; checked at the start of `process`.
    pub reverify: AtomicBool,
    pub parameters: RwLock<Vec<GraphParameter>>,
    pub schedule: RwLock<Option<ScheduleConfig>>,
    /// Delay object handles registered on this graph; these age at the start of each
    /// graph run.
    pub delays: RwLock<Vec<RefHandle>>,
    pub streaming: RwLock<Option<StreamingState>>,
    /// Serializes `verify`/`process` against concurrent structural mutation or
    /// concurrent execution of the same graph.
    pub verify_lock: tokio::sync::Mutex<()>,
}

impl GraphObject {
    pub fn new(header: Arc<ReferenceHeader>) -> Self {
        Self {
            header,
            nodes: RwLock::new(Vec::new()),
            heads: RwLock::new(Vec::new()),
            state: RwLock::new(GraphState::Unverified),
            reverify: AtomicBool::new(false),
            parameters: RwLock::new(Vec::new()),
            schedule: RwLock::new(None),
            delays: RwLock::new(Vec::new()),
            streaming: RwLock::new(None),
            verify_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> GraphState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: GraphState) {
        *self.state.write().unwrap() = state;
    }

    pub fn add_node(&self, node: RefHandle) -> usize {
        let mut nodes = self.nodes.write().unwrap();
        nodes.push(node);
        self.reverify.store(true, std::sync::atomic::Ordering::Release);
        nodes.len() - 1
    }

    pub fn needs_reverify(&self) -> bool {
        self.state() == GraphState::Unverified || self.reverify.load(std::sync::atomic::Ordering::Acquire)
    }
}
