//! Shared adjacency structure: one pass over a graph's nodes builds the structure
//! that single-writer checking, head discovery, cycle checking, and wavefront
//! advancement all reuse, rather than four independent graph walks.

use crate::context::Context;
use crate::error::{Result, VxError};
use crate::node::NodeObject;
use crate::object::OverlapRegion;
use crate::reference::RefHandle;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which base data object a (node, parameter) binding ultimately resolves to, and the
/// region of that base object it occupies — computed once per node per verification
/// pass by walking the non-owning parent chain to its root.
#[derive(Debug, Clone)]
struct ResolvedBinding {
    node_index: usize,
    parameter_index: usize,
    base: RefHandle,
    region: OverlapRegion,
    is_output: bool,
}

/// The adjacency view over one graph's nodes: an edge list (producer node index →
/// consumer node index) derived from shared base objects, used by head discovery and
/// cycle checking, plus the per-base-object writer map single-writer checking needs.
pub struct Dataflow {
    pub edges: Vec<(usize, usize)>,
    pub in_degree: Vec<usize>,
    pub out_edges: Vec<Vec<usize>>,
}

/// Walks `handle`'s non-owning parent chain to the root data object it ultimately
/// views, returning the root handle and this object's region relative to it.
fn resolve_base(ctx: &Context, handle: RefHandle) -> Result<(RefHandle, OverlapRegion)> {
    let mut current = handle;
    loop {
        let parent = ctx.with_entity(current, |entity| {
            Ok(entity.as_data().and_then(|d| d.parent))
        })?;
        match parent {
            Some(parent_handle) => current = parent_handle,
            None => {
                let region = ctx.with_entity(handle, |entity| {
                    Ok(entity
                        .as_data()
                        .map(|d| d.region.clone())
                        .unwrap_or(OverlapRegion::Whole))
                })?;
                return Ok((current, region));
            }
        }
    }
}

/// Builds the shared adjacency structure for one verification/execution pass.
///
/// An edge `(p, c)` means node `p` writes a base object that node `c` reads — the
/// data-dependency edges the wavefront executor advances along and cycle checking
/// inspects for back-edges.
pub fn build(ctx: &Context, nodes: &[Arc<NodeObject>]) -> Result<Dataflow> {
    let mut bindings = Vec::new();
    for (node_index, node) in nodes.iter().enumerate() {
        for (parameter_index, binding) in node.parameters.iter().enumerate() {
            let Some(handle) = binding.get() else { continue };
            if !handle.kind.is_data_object() {
                continue;
            }
            let (base, region) = resolve_base(ctx, handle)?;
            let is_output = matches!(
                node.kernel.signature[parameter_index].direction,
                crate::kernel::Direction::Output | crate::kernel::Direction::Bidirectional
            );
            bindings.push(ResolvedBinding {
                node_index,
                parameter_index,
                base,
                region,
                is_output,
            });
        }
    }

    // Per base object, the set of (node, region) pairs that write it; used both for
    // single-writer checking and for producer->consumer edge derivation.
    let mut writers: HashMap<RefHandle, Vec<&ResolvedBinding>> = HashMap::new();
    let mut readers: HashMap<RefHandle, Vec<&ResolvedBinding>> = HashMap::new();
    for binding in &bindings {
        if binding.is_output {
            writers.entry(binding.base).or_default().push(binding);
        } else {
            readers.entry(binding.base).or_default().push(binding);
        }
    }

    for writes in writers.values() {
        for i in 0..writes.len() {
            for j in (i + 1)..writes.len() {
                if writes[i].node_index != writes[j].node_index && writes[i].region.overlaps(&writes[j].region) {
                    return Err(VxError::MultipleWriters {
                        first_node: nodes[writes[i].node_index]
                            .name()
                            .unwrap_or_else(|| format!("node#{}", writes[i].node_index)),
                        second_node: nodes[writes[j].node_index]
                            .name()
                            .unwrap_or_else(|| format!("node#{}", writes[j].node_index)),
                    });
                }
            }
        }
    }

    let mut edge_set: HashSet<(usize, usize)> = HashSet::new();
    for (base, writes) in &writers {
        let Some(reads) = readers.get(base) else { continue };
        for writer in writes {
            for reader in reads {
                if writer.region.overlaps(&reader.region) && writer.node_index != reader.node_index {
                    edge_set.insert((writer.node_index, reader.node_index));
                }
            }
        }
    }

    let mut out_edges = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    let mut edges: Vec<(usize, usize)> = edge_set.into_iter().collect();
    edges.sort_unstable();
    for &(p, c) in &edges {
        out_edges[p].push(c);
        in_degree[c] += 1;
    }

    Ok(Dataflow {
        edges,
        in_degree,
        out_edges,
    })
}
