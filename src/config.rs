//! Tunable limits for a [`crate::context::Context`], in place of compiled-in constants.
//!
//! Fixed sizing (a global graph queue capped in the hundreds of thousands, a reference
//! table capped in the low thousands) is an embedded-systems carryover that doesn't fit
//! a library meant to be configured per deployment. [`GraphEngineConfig`] makes these
//! limits explicit fields with sane defaults, rather than either hard-coding them again
//! or dropping the bound silently.

use std::time::Duration;

/// Process-wide limits and timeouts for a [`crate::context::Context`].
///
/// Constructed with [`GraphEngineConfig::default`] for generous defaults; override
/// individual fields for a deployment that needs a smaller footprint or longer
/// timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEngineConfig {
    /// Maximum number of live references a single [`crate::context::Context`] may hold.
    pub max_references: usize,

    /// Maximum number of graphs that may be queued for asynchronous scheduling at once.
    pub graph_queue_capacity: usize,

    /// Capacity of the bounded, drop-oldest event queue.
    pub event_queue_capacity: usize,

    /// Capacity of each per-graph-parameter `pending`/`done` pipelining queue.
    pub pipeline_queue_capacity: usize,

    /// Default blocking wait timeout for `Events::wait` when the caller does not
    /// specify one.
    pub event_wait_timeout: Duration,

    /// Bound on how long `stop_streaming` will wait for the streaming task to observe
    /// the stop flag and join before force-aborting it.
    pub streaming_stop_timeout: Duration,
}

impl Default for GraphEngineConfig {
    fn default() -> Self {
        Self {
            max_references: 4096,
            graph_queue_capacity: 500_000,
            event_queue_capacity: 128,
            pipeline_queue_capacity: 128,
            event_wait_timeout: Duration::from_secs(10),
            streaming_stop_timeout: Duration::from_secs(5),
        }
    }
}
