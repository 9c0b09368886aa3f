//! Node: one kernel instance bound into a graph, with its parameter bindings,
//! per-run status, and performance counters.

use crate::context::Context;
use crate::kernel::KernelObject;
use crate::reference::{RefHandle, ReferenceHeader};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// One parameter slot's current binding. `None` until the client binds a reference to
/// it; required slots left `None` through verification fail the required-parameter
/// check.
#[derive(Debug, Default)]
pub struct ParamBinding {
    reference: RwLock<Option<RefHandle>>,
}

impl ParamBinding {
    pub fn get(&self) -> Option<RefHandle> {
        *self.reference.read().unwrap()
    }

    pub fn set(&self, handle: RefHandle) {
        *self.reference.write().unwrap() = Some(handle);
    }

    pub fn clear(&self) {
        *self.reference.write().unwrap() = None;
    }

    pub fn is_bound(&self) -> bool {
        self.reference.read().unwrap().is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodePerf {
    pub last_duration: Option<Duration>,
    pub run_count: u64,
    pub estimated_bandwidth: usize,
}

/// Per-parameter replication flags for a node replicated across an object-array
/// parameter.
#[derive(Debug, Clone)]
pub struct ReplicationInfo {
    pub replicated_params: Vec<bool>,
}

/// Invoked once a node finishes executing within a wave.
pub trait CompletionCallback: Send + Sync {
    fn on_complete(&self, node: &NodeObject);
}

/// A kernel instance bound into a specific graph.
pub struct NodeObject {
    pub header: Arc<ReferenceHeader>,
    pub kernel: Arc<KernelObject>,
    pub parameters: Vec<ParamBinding>,
    pub local_data: RwLock<Vec<u8>>,
    pub affinity: RwLock<Option<usize>>,
    /// Set during head/reachability discovery; cleared at the start of each
    /// verification pass.
    pub visited: AtomicBool,
    /// Set once this node's kernel body has run during the current graph execution;
    /// cleared at the start of each `process` call (and by `stop_streaming`, so a
    /// stopped streaming loop never leaves a stale completed flag behind).
    pub executed: AtomicBool,
    /// Set once `verify`'s phase 11 has run this kernel's `initialize` hook and
    /// allocated its local data; cleared by phase 2's reverify pre-pass after it runs
    /// `deinitialize` and frees `local_data`, so a kernel's init/deinit hooks run in
    /// strict alternation across repeated verifications of the same node.
    pub initialized: AtomicBool,
    pub replicated: Option<ReplicationInfo>,
    completion_callback: RwLock<Option<Arc<dyn CompletionCallback>>>,
    name: RwLock<Option<String>>,
    pub perf: RwLock<NodePerf>,
    /// Topological depth assigned during verification; used to bucket nodes into
    /// the `next`/`left`/`last` wavefront sets during execution.
    pub depth: AtomicUsize,
}

impl NodeObject {
    pub fn new(header: Arc<ReferenceHeader>, kernel: Arc<KernelObject>) -> Self {
        let num_params = kernel.num_parameters();
        Self {
            header,
            kernel,
            parameters: (0..num_params).map(|_| ParamBinding::default()).collect(),
            local_data: RwLock::new(Vec::new()),
            affinity: RwLock::new(None),
            visited: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            replicated: None,
            completion_callback: RwLock::new(None),
            name: RwLock::new(None),
            perf: RwLock::new(NodePerf::default()),
            depth: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = Some(name.into());
    }

    pub fn set_completion_callback(&self, cb: Arc<dyn CompletionCallback>) {
        *self.completion_callback.write().unwrap() = Some(cb);
    }

    pub fn fire_completion_callback(&self) {
        if let Some(cb) = self.completion_callback.read().unwrap().as_ref() {
            cb.on_complete(self);
        }
    }

    /// Binds `handle` into `parameter_index`, retaining an internal reference on it
    /// and releasing whatever reference it displaces — a node's parameter slots are a
    /// framework binding, not a client retain, so this goes through `ctx`'s internal
    /// refcount path rather than `ParamBinding::set` alone (spec.md's "creation binds a
    /// kernel into a graph and increments internal reference counts on any bound
    /// parameter").
    pub fn bind(&self, ctx: &Context, parameter_index: usize, handle: RefHandle) -> crate::error::Result<()> {
        let previous = self.parameters[parameter_index].get();
        if previous == Some(handle) {
            return Ok(());
        }
        ctx.retain_internal(handle)?;
        if let Some(previous) = previous {
            ctx.release_internal(previous);
        }
        self.parameters[parameter_index].set(handle);
        Ok(())
    }

    pub fn is_fully_bound(&self) -> bool {
        self.kernel
            .signature
            .iter()
            .zip(self.parameters.iter())
            .all(|(sig, binding)| {
                binding.is_bound() || sig.requirement == crate::kernel::ParamRequirement::Optional
            })
    }
}

/// A borrowed view of a node plus the context needed to resolve its bound parameter
/// handles into concrete data objects. Passed to validators and kernel bodies instead
/// of threading `(&NodeObject, &Context)` through every signature.
pub struct NodeBinding<'a> {
    pub node: &'a NodeObject,
    pub context: &'a Context,
}

impl<'a> NodeBinding<'a> {
    pub fn new(node: &'a NodeObject, context: &'a Context) -> Self {
        Self { node, context }
    }

    pub fn parameter(&self, index: usize) -> Option<RefHandle> {
        self.node.parameters.get(index).and_then(|p| p.get())
    }

    pub fn data_object(&self, index: usize) -> crate::error::Result<Arc<crate::object::DataObject>> {
        let handle = self
            .parameter(index)
            .ok_or_else(|| crate::error::VxError::NotSufficient {
                node: self.node.name().unwrap_or_default(),
                parameter: index,
            })?;
        self.context.with_entity(handle, |entity| {
            entity
                .as_data()
                .cloned()
                .ok_or_else(|| crate::error::VxError::invalid_reference(self.node.name().unwrap_or_default()))
        })
    }
}
