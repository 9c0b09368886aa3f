//! Pipelining and streaming: running a graph repeatedly with queued parameter
//! bindings instead of one bind-verify-process cycle per run.

pub mod queue;
pub mod schedule;
pub mod streaming;

pub use schedule::{ScheduleConfig, ScheduleMode};
pub use streaming::StreamingState;

use crate::context::Context;
use crate::error::{Result, VxError};
use crate::event::Event;
use crate::graph::{Graph, GraphObject, GraphParameter};
use crate::reference::RefHandle;
use tracing::instrument;

impl Graph {
    /// Enables pipelining for this graph with the given scheduling mode, replacing
    /// any previous schedule configuration.
    pub fn set_schedule_mode(&self, ctx: &Context, mode: ScheduleMode) -> Result<()> {
        let graph = self.object_for_pipeline(ctx)?;
        *graph.schedule.write().unwrap() = Some(ScheduleConfig::new(mode, ctx.config().pipeline_queue_capacity));
        Ok(())
    }

    /// Registers `(node_index, parameter_index)` as graph parameter `graph_parameter`,
    /// exposing it for pipelined queuing.
    pub fn add_parameter(&self, ctx: &Context, node_index: usize, parameter_index: usize) -> Result<usize> {
        let graph = self.object_for_pipeline(ctx)?;
        let mut params = graph.parameters.write().unwrap();
        params.push(GraphParameter { node_index, parameter_index });
        Ok(params.len() - 1)
    }

    /// Queues `handle` as the next value for graph parameter `graph_parameter_index`.
    /// Under `QueueAuto`, once every enqueueable parameter has at least one pending
    /// reference this drives the next run itself.
    #[instrument(skip(self, ctx))]
    pub async fn enqueue_parameter(&self, ctx: &Context, graph_parameter_index: usize, handle: RefHandle) -> Result<()> {
        let graph = self.object_for_pipeline(ctx)?;
        check_meta_equal_with_binding(ctx, &graph, graph_parameter_index, handle)?;
        let mut schedule_guard = graph.schedule.write().unwrap();
        let schedule = schedule_guard
            .as_mut()
            .ok_or_else(|| crate::error::VxError::InvalidScope("graph has no schedule configured".into()))?;
        let queue = schedule.queue_for(graph_parameter_index);
        drop(schedule_guard);
        queue.enqueue(handle).await?;

        loop {
            let snapshot: Option<(ScheduleMode, Vec<std::sync::Arc<queue::ParameterQueue>>)> = {
                let schedule_guard = graph.schedule.read().unwrap();
                schedule_guard
                    .as_ref()
                    .map(|schedule| (schedule.mode, schedule.queues.values().cloned().collect()))
            };
            let Some((mode, queues)) = snapshot else { break };
            if mode != ScheduleMode::QueueAuto || !schedule::queues_ready(&queues).await {
                break;
            }
            self.process(ctx).await?;
        }
        Ok(())
    }

    /// Blocking dequeue of the next completed reference for a graph parameter.
    pub async fn dequeue_done_parameter(
        &self,
        ctx: &Context,
        graph_parameter_index: usize,
        timeout: std::time::Duration,
    ) -> Result<RefHandle> {
        let graph = self.object_for_pipeline(ctx)?;
        let schedule_guard = graph.schedule.read().unwrap();
        let schedule = schedule_guard
            .as_ref()
            .ok_or_else(|| crate::error::VxError::InvalidScope("graph has no schedule configured".into()))?;
        let queue = schedule
            .queues
            .get(&graph_parameter_index)
            .cloned()
            .ok_or_else(|| crate::error::VxError::InvalidParameters(format!("no such graph parameter {graph_parameter_index}")))?;
        drop(schedule_guard);
        queue.dequeue_done(timeout).await
    }

    fn object_for_pipeline(&self, ctx: &Context) -> Result<std::sync::Arc<crate::graph::GraphObject>> {
        ctx.with_entity(self.handle, |e| {
            e.as_graph()
                .cloned()
                .ok_or_else(|| crate::error::VxError::invalid_reference("graph"))
        })
    }

    /// Starts a streaming worker loop for this graph, driven by `trigger_node_name`
    /// for logging purposes.
    pub fn start_streaming(&self, ctx: &Context, trigger_node_name: Option<String>) -> Result<()> {
        let graph = self.object_for_pipeline(ctx)?;
        let state = StreamingState::start(ctx.clone(), *self, trigger_node_name);
        *graph.streaming.write().unwrap() = Some(state);
        Ok(())
    }

    pub async fn stop_streaming(&self, ctx: &Context) -> Result<()> {
        let graph = self.object_for_pipeline(ctx)?;
        let mut state = graph.streaming.write().unwrap().take();
        if let Some(state) = &mut state {
            state.stop(ctx, self, ctx.config().streaming_stop_timeout).await;
        }
        Ok(())
    }

    /// Non-blocking count of completed references waiting to be dequeued for a graph
    /// parameter.
    pub async fn parameter_check_done(&self, ctx: &Context, graph_parameter_index: usize) -> Result<usize> {
        let graph = self.object_for_pipeline(ctx)?;
        let schedule_guard = graph.schedule.read().unwrap();
        let schedule = schedule_guard
            .as_ref()
            .ok_or_else(|| VxError::InvalidScope("graph has no schedule configured".into()))?;
        let queue = schedule
            .queues
            .get(&graph_parameter_index)
            .cloned()
            .ok_or_else(|| VxError::InvalidParameters(format!("no such graph parameter {graph_parameter_index}")))?;
        drop(schedule_guard);
        Ok(queue.done_len().await)
    }
}

/// Rejects `candidate` if the graph parameter already has a reference bound and the
/// two are not meta-equal. A graph parameter with nothing bound
/// yet, or a `candidate` that is the very reference already bound, always passes.
fn check_meta_equal_with_binding(
    ctx: &Context,
    graph: &GraphObject,
    graph_parameter_index: usize,
    candidate: RefHandle,
) -> Result<()> {
    let node_handle = {
        let params = graph.parameters.read().unwrap();
        let param = params.get(graph_parameter_index).ok_or_else(|| {
            VxError::InvalidParameters(format!("no such graph parameter {graph_parameter_index}"))
        })?;
        let nodes = graph.nodes.read().unwrap();
        let node_handle = *nodes
            .get(param.node_index)
            .ok_or_else(|| VxError::invalid_reference("graph node"))?;
        (node_handle, param.parameter_index)
    };
    let (node_handle, parameter_index) = node_handle;

    let existing = ctx.with_entity(node_handle, |e| {
        let node = e.as_node().ok_or_else(|| VxError::invalid_reference("graph node"))?;
        Ok(node.parameters[parameter_index].get())
    })?;
    let Some(existing_handle) = existing else { return Ok(()) };
    if existing_handle == candidate {
        return Ok(());
    }

    let existing_data = ctx.with_entity(existing_handle, |e| Ok(e.as_data().cloned()))?;
    let candidate_data = ctx.with_entity(candidate, |e| Ok(e.as_data().cloned()))?;
    if let (Some(existing_data), Some(candidate_data)) = (existing_data, candidate_data) {
        let existing_shape = existing_data.shape.read().unwrap().clone();
        if !crate::meta::meta_equal_refs(&existing_shape, &candidate_data) {
            return Err(VxError::InvalidValue(format!(
                "reference enqueued for graph parameter {graph_parameter_index} is not meta-equal to the reference already bound there"
            )));
        }
    }
    Ok(())
}

/// Rebinds every enqueueable graph parameter to its queue's next pending reference,
/// at the start of a top-level `process` call, consuming the head of each
/// parameter's ready queue. A graph parameter with no schedule configured, or whose
/// queue has nothing pending yet, keeps its current binding untouched.
pub(crate) async fn rebind_enqueueable_parameters(ctx: &Context, graph: &GraphObject) -> Result<()> {
    let queues: Vec<(usize, std::sync::Arc<queue::ParameterQueue>)> = {
        let schedule_guard = graph.schedule.read().unwrap();
        match schedule_guard.as_ref() {
            Some(schedule) => schedule.queues.iter().map(|(&i, q)| (i, q.clone())).collect(),
            None => return Ok(()),
        }
    };
    if queues.is_empty() {
        return Ok(());
    }

    let params = graph.parameters.read().unwrap().clone();
    let nodes = graph.nodes.read().unwrap().clone();
    for (graph_parameter_index, queue) in queues {
        let Some(handle) = queue.advance().await else { continue };
        let param = params.get(graph_parameter_index).ok_or_else(|| {
            VxError::InvalidParameters(format!("no such graph parameter {graph_parameter_index}"))
        })?;
        let node_handle = *nodes
            .get(param.node_index)
            .ok_or_else(|| VxError::invalid_reference("graph node"))?;
        let node = ctx.with_entity(node_handle, |e| {
            e.as_node().cloned().ok_or_else(|| VxError::invalid_reference("graph node"))
        })?;
        node.bind(ctx, param.parameter_index, handle)?;
    }
    Ok(())
}

/// Retires every enqueueable graph parameter's current binding to its queue's `done`
/// FIFO at the end of a top-level run, raising a `GraphParameterConsumed` event per
/// parameter.
pub(crate) async fn complete_enqueueable_parameters(ctx: &Context, graph: &GraphObject) {
    let queues: Vec<(usize, std::sync::Arc<queue::ParameterQueue>)> = {
        let schedule_guard = graph.schedule.read().unwrap();
        match schedule_guard.as_ref() {
            Some(schedule) => schedule.queues.iter().map(|(&i, q)| (i, q.clone())).collect(),
            None => return,
        }
    };
    for (graph_parameter_index, queue) in queues {
        if queue.current().await.is_some() {
            queue.mark_current_done().await;
            let (event_type, payload) = Event::parameter_consumed(graph_parameter_index);
            ctx.raise_event(None, event_type, payload).await;
        }
    }
}
