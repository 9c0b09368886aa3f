//! Graph verification: the twelve ordered phases that turn a freshly wired graph into
//! one the executor can run.
//!
//! Verification is sticky: once a graph reaches [`crate::graph::types::GraphState::Verified`]
//! it stays there until a structural mutation flips `reverify`, and a failed
//! verification leaves the graph `Unverified` rather than partially verified.

use crate::context::Context;
use crate::error::{Result, VxError};
use crate::graph::dataflow;
use crate::graph::types::{GraphObject, GraphState};
use crate::kernel::{ParamRequirement, Validator};
use crate::node::{NodeBinding, NodeObject};
use crate::object::MemoryAllocator;
use crate::reference::RefHandle;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Runs all twelve verification phases against `graph`, in order, short-circuiting on
/// the first failure. On success, leaves the graph in `Verified` state with `heads`
/// populated; on failure, leaves it `Unverified`.
#[instrument(skip(ctx, graph))]
pub async fn verify(ctx: &Context, graph: &GraphObject) -> Result<()> {
    let _guard = graph.verify_lock.lock().await;

    let handles: Vec<RefHandle> = graph.nodes.read().unwrap().clone();
    let nodes: Vec<Arc<NodeObject>> = handles
        .iter()
        .map(|h| {
            ctx.with_entity(*h, |e| {
                e.as_node().cloned().ok_or_else(|| VxError::invalid_reference("graph node"))
            })
        })
        .collect::<Result<_>>()?;

    match run_phases(ctx, &nodes) {
        Ok(heads) => {
            *graph.heads.write().unwrap() = heads;
            graph.set_state(GraphState::Verified);
            graph.reverify.store(false, std::sync::atomic::Ordering::Release);
            info!(node_count = nodes.len(), "graph verified");
            Ok(())
        }
        Err(err) => {
            graph.set_state(GraphState::Unverified);
            Err(err)
        }
    }
}

fn run_phases(ctx: &Context, nodes: &[Arc<NodeObject>]) -> Result<Vec<usize>> {
    // Phase 1: topological sort / reachability. A node unreachable from any head once
    // the dataflow graph is built is caught by phase 9's cycle check instead, since
    // both conditions manifest the same way (a node whose in-degree never reaches
    // zero during Kahn's algorithm).
    for node in nodes {
        node.visited.store(false, std::sync::atomic::Ordering::Release);
    }

    // Phase 2: user-kernel pre-pass. Kernels are finalized at node-creation time
    // (`Graph::create_node`), so this phase's job is the reverify path: a node whose
    // kernel was initialized by a previous verification of this graph gets its
    // deinitialize hook run against its current binding, and its framework-allocated
    // local data freed, before phase 11 re-initializes it against the new binding.
    for node in nodes {
        if node.initialized.swap(false, std::sync::atomic::Ordering::AcqRel) {
            let binding = NodeBinding::new(node, ctx);
            if let Some(hook) = &node.kernel.deinitialize {
                hook.deinitialize(&binding)?;
            }
            node.local_data.write().unwrap().clear();
        }
    }

    // Phase 3: required-parameter check.
    for node in nodes {
        for (index, (sig, binding)) in node.kernel.signature.iter().zip(node.parameters.iter()).enumerate() {
            if sig.requirement == ParamRequirement::Required && !binding.is_bound() {
                return Err(VxError::NotSufficient {
                    node: node.name().unwrap_or_else(|| format!("node#{index}")),
                    parameter: index,
                });
            }
        }
    }

    // Phase 4/5: per-node validation (whole-node or legacy path) and output
    // post-processing (meta-format propagation into virtual objects).
    for node in nodes {
        validate_node(ctx, node)?;
    }

    // Phase 6: single-writer check, phase 8's edges, phase 9's cycle detection all
    // share one adjacency pass.
    let flow = dataflow::build(ctx, nodes)?;

    // Phase 7: memory allocation for any unallocated, non-virtual output parameters.
    for node in nodes {
        allocate_outputs(ctx, node)?;
    }

    // Phase 8: head discovery — nodes with in-degree zero.
    let heads: Vec<usize> = flow
        .in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();
    if heads.is_empty() && !nodes.is_empty() {
        return Err(VxError::InvalidGraph("no head nodes: graph is cyclic".into()));
    }

    // Phase 9: cycle check via Kahn's algorithm reusing the same adjacency.
    let mut in_degree = flow.in_degree.clone();
    let mut queue: Vec<usize> = heads.clone();
    let mut visited_count = 0usize;
    while let Some(n) = queue.pop() {
        visited_count += 1;
        nodes[n].visited.store(true, std::sync::atomic::Ordering::Release);
        for &succ in &flow.out_edges[n] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                queue.push(succ);
            }
        }
    }
    if visited_count != nodes.len() {
        return Err(VxError::InvalidGraph("cycle detected: not all nodes reachable from heads".into()));
    }

    // Phase 10: target verify.
    for node in nodes {
        let target = ctx
            .find_target(&node.kernel.name)
            .ok_or_else(|| VxError::NotSupported(format!("no target supports kernel '{}'", node.kernel.name)))?;
        let binding = NodeBinding::new(node, ctx);
        target.verify(&binding)?;
    }

    // Phase 11: kernel initialize hook, then local-data allocation. Local data starts
    // at size zero so a kernel's own `initialize` hook may resize it; if it's still
    // empty afterward and the kernel declares a positive `local_data_size`, the
    // framework allocates it directly.
    for node in nodes {
        let binding = NodeBinding::new(node, ctx);
        if let Some(hook) = &node.kernel.initialize {
            hook.initialize(&binding)?;
        }
        {
            let mut local_data = node.local_data.write().unwrap();
            if local_data.is_empty() && node.kernel.attributes.local_data_size > 0 {
                local_data.resize(node.kernel.attributes.local_data_size, 0);
            }
        }
        node.initialized.store(true, std::sync::atomic::Ordering::Release);
    }

    // Phase 12: cost tallies (estimated bandwidth), recorded for the executor's
    // reporting, not enforced here.
    for node in nodes {
        tally_cost(ctx, node);
    }

    debug!(heads = ?heads, "verification phases complete");
    Ok(heads)
}

fn validate_node(ctx: &Context, node: &Arc<NodeObject>) -> Result<()> {
    let binding = NodeBinding::new(node, ctx);
    node.kernel
        .with_validator(|validator| match validator {
            Validator::WholeNode(v) => {
                let mut metas: Vec<crate::meta::MetaFormat> = node
                    .kernel
                    .signature
                    .iter()
                    .map(|sig| crate::meta::MetaFormat::new(sig.kind))
                    .collect();
                v.validate(&binding, &mut metas)?;
                for (index, sig) in node.kernel.signature.iter().enumerate() {
                    if matches!(sig.direction, crate::kernel::Direction::Output | crate::kernel::Direction::Bidirectional) {
                        reconcile_output(ctx, node, index, &metas[index])?;
                    }
                }
                Ok(())
            }
            Validator::Legacy { inputs, outputs } => {
                let input_indices: Vec<usize> = node
                    .kernel
                    .signature
                    .iter()
                    .enumerate()
                    .filter(|(_, sig)| matches!(sig.direction, crate::kernel::Direction::Input | crate::kernel::Direction::Bidirectional))
                    .map(|(i, _)| i)
                    .collect();
                for (validator, &index) in inputs.iter().zip(input_indices.iter()) {
                    validator.validate(&binding, index)?;
                }
                let output_indices: Vec<usize> = node
                    .kernel
                    .signature
                    .iter()
                    .enumerate()
                    .filter(|(_, sig)| matches!(sig.direction, crate::kernel::Direction::Output | crate::kernel::Direction::Bidirectional))
                    .map(|(i, _)| i)
                    .collect();
                for (validator, &index) in outputs.iter().zip(output_indices.iter()) {
                    let sig = &node.kernel.signature[index];
                    let mut meta = crate::meta::MetaFormat::new(sig.kind);
                    validator.validate(&binding, index, &mut meta)?;
                    reconcile_output(ctx, node, index, &meta)?;
                }
                Ok(())
            }
        })
        .unwrap_or(Ok(()))
}

/// Per output slot: if the bound reference is virtual and
/// still unspecified, initialize it from the validator's written meta; otherwise the
/// meta must agree with what's already bound. A meta the validator never set (the
/// common case for a kernel that defers entirely to its input's shape) is not
/// reconciled at all — the bound reference is trusted as-is.
fn reconcile_output(ctx: &Context, node: &Arc<NodeObject>, parameter_index: usize, meta: &crate::meta::MetaFormat) -> Result<()> {
    let Some(meta_shape) = &meta.shape else { return Ok(()) };
    let Some(handle) = node.parameters[parameter_index].get() else { return Ok(()) };
    if !handle.kind.is_data_object() {
        return Ok(());
    }
    ctx.with_entity(handle, |entity| {
        let Some(data) = entity.as_data() else { return Ok(()) };
        let mut shape = data.shape.write().unwrap();
        if entity.header().is_virtual() && shape.is_unspecified() {
            *shape = meta_shape.clone();
            return Ok(());
        }
        if *shape != *meta_shape {
            return Err(VxError::InvalidFormat {
                node: node.name().unwrap_or_else(|| format!("node#{parameter_index}")),
                parameter: parameter_index,
                detail: format!("bound reference {:?} does not match inferred meta {:?}", *shape, meta_shape),
            });
        }
        Ok(())
    })
}

fn allocate_outputs(ctx: &Context, node: &Arc<NodeObject>) -> Result<()> {
    for (index, sig) in node.kernel.signature.iter().enumerate() {
        if !matches!(sig.direction, crate::kernel::Direction::Output | crate::kernel::Direction::Bidirectional) {
            continue;
        }
        let Some(handle) = node.parameters[index].get() else { continue };
        if !handle.kind.is_data_object() {
            continue;
        }
        ctx.with_entity(handle, |entity| {
            let Some(data) = entity.as_data() else { return Ok(()) };
            if data.is_allocated() || data.shape.read().unwrap().is_unspecified() {
                return Ok(());
            }
            let shape = data.shape.read().unwrap().clone();
            let region = crate::object::DefaultAllocator.allocate(&shape)?;
            *data.memory.write().unwrap() = Some(region);
            Ok(())
        })?;
    }
    Ok(())
}

fn tally_cost(ctx: &Context, node: &Arc<NodeObject>) {
    let mut total = 0usize;
    for binding in &node.parameters {
        let Some(handle) = binding.get() else { continue };
        if !handle.kind.is_data_object() {
            continue;
        }
        let _ = ctx.with_entity(handle, |entity| {
            if let Some(data) = entity.as_data() {
                total += data.shape.read().unwrap().estimated_bytes();
            }
            Ok(())
        });
    }
    let mut perf = node.perf.write().unwrap();
    perf.estimated_bandwidth = total;
}
