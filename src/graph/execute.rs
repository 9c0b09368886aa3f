//! Wavefront execution: the ready-set scheduling loop that runs a verified graph.
//!
//! A "wave" is the set of nodes whose data dependencies are all satisfied by nodes
//! already executed in this run. The executor advances wave by wave: `next` holds
//! nodes newly made ready by the wave just finished, `left` holds nodes still waiting
//! on at least one producer, and `last` is the wave just dispatched — kept to decide
//! when every node has run (`left` empty and `next` empty).

use crate::context::Context;
use crate::error::{Result, VxError};
use crate::event::Event;
use crate::graph::dataflow;
use crate::graph::types::{GraphObject, GraphState};
use crate::node::NodeObject;
use crate::reference::RefHandle;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

/// Runs `graph` to completion: re-verifies if needed (`reverify`), then drives the
/// wavefront loop, dispatching each wave's nodes either concurrently (bounded by a
/// process-wide worker-pool semaphore) or serially, depending on the target's
/// capability and the context's re-entrancy depth.
#[instrument(skip(ctx, graph))]
pub async fn process(ctx: &Context, graph: &GraphObject) -> Result<()> {
    if graph.needs_reverify() {
        super::verify::verify(ctx, graph).await?;
    }

    let _guard = graph.verify_lock.lock().await;
    let depth = ctx.enter_process();
    let result = run_wavefront(ctx, graph, depth).await;
    ctx.exit_process();
    result
}

async fn run_wavefront(ctx: &Context, graph: &GraphObject, depth: usize) -> Result<()> {
    if depth == 1 {
        crate::pipeline::rebind_enqueueable_parameters(ctx, graph).await?;
    }

    let handles: Vec<RefHandle> = graph.nodes.read().unwrap().clone();
    let nodes: Vec<Arc<NodeObject>> = handles
        .iter()
        .map(|h| {
            ctx.with_entity(*h, |e| {
                e.as_node().cloned().ok_or_else(|| VxError::invalid_reference("graph node"))
            })
        })
        .collect::<Result<_>>()?;

    for node in &nodes {
        node.executed.store(false, Ordering::Release);
    }

    graph.set_state(GraphState::Running);

    let flow = dataflow::build(ctx, &nodes)?;
    let mut in_degree = flow.in_degree.clone();
    let mut next: Vec<usize> = graph.heads.read().unwrap().clone();
    let mut left: Vec<usize> = (0..nodes.len()).filter(|i| !next.contains(i)).collect();

    let semaphore = Arc::new(Semaphore::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)));

    let mut wave_number = 0usize;
    while !next.is_empty() {
        wave_number += 1;
        let wave = std::mem::take(&mut next);
        debug!(wave = wave_number, size = wave.len(), "dispatching wave");

        let action = dispatch_wave(ctx, &nodes, &wave, &semaphore, depth).await?;
        if action == crate::target::TargetAction::Abandon {
            graph.set_state(GraphState::Abandoned);
            let failed_node = wave.first().and_then(|&i| nodes[i].name());
            let (event_type, payload) = Event::node_error(failed_node.clone(), "kernel requested abandon");
            ctx.raise_event(None, event_type, payload).await;
            return Err(VxError::GraphAbandoned {
                node: failed_node.unwrap_or_default(),
                reason: "kernel requested abandon".into(),
            });
        }

        for &n in &wave {
            nodes[n].fire_completion_callback();
            let (event_type, payload) = Event::node_completed(nodes[n].name());
            ctx.raise_event(None, event_type, payload).await;
            for &succ in &flow.out_edges[n] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    next.push(succ);
                }
            }
        }
        left.retain(|n| !wave.contains(n));
    }

    if !left.is_empty() {
        return Err(VxError::InvalidGraph(format!(
            "{} node(s) never became ready during execution",
            left.len()
        )));
    }

    // Delays age on wave termination, after every node has run and before the
    // completion event — ageing up front would rotate the ring before the first run
    // ever reads slot 0.
    age_delays(ctx, graph)?;

    if depth == 1 {
        crate::pipeline::complete_enqueueable_parameters(ctx, graph).await;
    }

    graph.set_state(GraphState::Completed);
    let (event_type, payload) = Event::graph_completed(None);
    ctx.raise_event(None, event_type, payload).await;
    info!(waves = wave_number, "graph execution complete");
    Ok(())
}

async fn dispatch_wave(
    ctx: &Context,
    nodes: &[Arc<NodeObject>],
    wave: &[usize],
    semaphore: &Arc<Semaphore>,
    depth: usize,
) -> Result<crate::target::TargetAction> {
    let mut action = crate::target::TargetAction::Continue;

    // A node dispatches inline (no worker-pool task) when the engine is at
    // re-entrancy depth > 1, or when its own target opts out of concurrent
    // dispatch; everything else in the wave fans out to the worker pool.
    let force_serial = depth > 1;
    let mut serial = Vec::new();
    let mut parallel = Vec::new();
    for &n in wave {
        let node = &nodes[n];
        let target = ctx
            .find_target(&node.kernel.name)
            .ok_or_else(|| VxError::NotSupported(format!("no target supports kernel '{}'", node.kernel.name)))?;
        if force_serial || !target.supports_parallel_dispatch() {
            serial.push((n, target));
        } else {
            parallel.push((n, target));
        }
    }

    for (n, target) in serial {
        let node = &nodes[n];
        let single = std::slice::from_ref(node);
        set_virtual_window(ctx, node, true)?;
        let outcome = target.process(ctx, single, 0, 1).await;
        set_virtual_window(ctx, node, false)?;
        if outcome? == crate::target::TargetAction::Abandon {
            action = crate::target::TargetAction::Abandon;
        }
    }

    let mut handles = Vec::with_capacity(parallel.len());
    for (n, target) in parallel {
        let node = nodes[n].clone();
        let ctx = ctx.clone();
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let single = [node.clone()];
            set_virtual_window(&ctx, &node, true)?;
            let outcome = target.process(&ctx, &single, 0, 1).await;
            set_virtual_window(&ctx, &node, false)?;
            outcome
        }));
    }

    for handle in handles {
        let outcome = handle.await.map_err(|e| VxError::Failure(format!("worker task panicked: {e}")))??;
        if outcome == crate::target::TargetAction::Abandon {
            action = crate::target::TargetAction::Abandon;
        }
    }

    Ok(action)
}

/// Opens or closes the access window on every virtual parameter bound to `node`,
/// immediately before and after its kernel invocation.
fn set_virtual_window(ctx: &Context, node: &NodeObject, accessible: bool) -> Result<()> {
    for binding in &node.parameters {
        let Some(handle) = binding.get() else { continue };
        if !handle.kind.is_data_object() {
            continue;
        }
        let header = ctx.get_entity(handle)?;
        if header.is_virtual() {
            header.set_accessible(accessible);
        }
    }
    Ok(())
}

/// Ages every delay registered on the graph by one slot, rebinding every node
/// parameter associated with a delay to its shifted slot.
fn age_delays(ctx: &Context, graph: &GraphObject) -> Result<()> {
    let delays = graph.delays.read().unwrap().clone();
    for handle in delays {
        ctx.with_entity(handle, |e| {
            let delay = e.as_delay().ok_or_else(|| VxError::invalid_reference("delay"))?;
            delay.age(ctx)
        })?;
    }
    Ok(())
}
