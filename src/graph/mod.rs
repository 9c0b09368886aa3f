//! The Graph Engine: verification and wavefront execution.

pub mod dataflow;
pub mod execute;
pub mod types;
pub mod verify;

use crate::context::Context;
use crate::error::Result;
use crate::kernel::KernelObject;
use crate::node::NodeObject;
use crate::object::ObjectKind;
use crate::reference::{RefHandle, ReferenceHeader, Scope};
use std::sync::Arc;
pub use types::{GraphObject, GraphParameter, GraphState};

/// A thin, `Copy`-handle-based client view over a registered graph: callers hold a
/// `RefHandle`, not a `GraphObject` directly, and go through `Context` for every
/// mutation.
#[derive(Clone, Copy)]
pub struct Graph {
    pub handle: RefHandle,
}

impl Graph {
    pub fn create(ctx: &Context) -> Result<Self> {
        let handle = ctx.register(ObjectKind::Graph, Scope::Context, false, |header| {
            crate::context::Entity::Graph(Arc::new(GraphObject::new(header)))
        })?;
        Ok(Self { handle })
    }

    fn object(&self, ctx: &Context) -> Result<Arc<GraphObject>> {
        ctx.with_entity(self.handle, |e| {
            e.as_graph()
                .cloned()
                .ok_or_else(|| crate::error::VxError::invalid_reference("graph"))
        })
    }

    /// Creates a node from `kernel` and appends it to this graph, returning its
    /// index among the graph's nodes (stable across re-verification). Finalizes
    /// `kernel` here, at bind time, per spec.md's "unfinalized kernels cannot be bound
    /// into nodes": a kernel's signature and validator are fixed from the moment any
    /// node is created from it, not merely on first `verify`.
    pub fn create_node(&self, ctx: &Context, kernel: Arc<KernelObject>) -> Result<RefHandle> {
        kernel.finalize();
        let graph_handle = self.handle;
        let node_handle = ctx.register(ObjectKind::Node, Scope::Graph(graph_handle), false, |header| {
            crate::context::Entity::Node(Arc::new(NodeObject::new(header, kernel)))
        })?;
        let graph = self.object(ctx)?;
        graph.add_node(node_handle);
        Ok(node_handle)
    }

    pub async fn verify(&self, ctx: &Context) -> Result<()> {
        let graph = self.object(ctx)?;
        verify::verify(ctx, &graph).await
    }

    pub async fn process(&self, ctx: &Context) -> Result<()> {
        let graph = self.object(ctx)?;
        execute::process(ctx, &graph).await
    }

    pub fn state(&self, ctx: &Context) -> Result<GraphState> {
        Ok(self.object(ctx)?.state())
    }

    /// Accepts the graph for asynchronous execution via the context's graph queue,
    /// returning immediately with `GraphScheduled`.
    pub async fn schedule(&self, ctx: &Context) -> Result<()> {
        ctx.enqueue_graph(self.handle).await?;
        Err(crate::error::VxError::GraphScheduled)
    }

    /// Creates a Delay object over `items` (one data object handle per ring slot) and
    /// registers it with this graph so it ages at the end of every run.
    pub fn create_delay(&self, ctx: &Context, items: Vec<RefHandle>) -> Result<RefHandle> {
        let delay_handle = ctx.register(ObjectKind::Delay, Scope::Graph(self.handle), false, |header| {
            crate::context::Entity::Delay(Arc::new(crate::delay::DelayObject::new(header, items)))
        })?;
        let graph = self.object(ctx)?;
        graph.delays.write().unwrap().push(delay_handle);
        Ok(delay_handle)
    }

    /// Associates `node`'s `parameter_index` with `delay`'s ring slot at `slot_offset`,
    /// binding it immediately and keeping it in sync on every subsequent age.
    pub fn associate_delay_parameter(
        &self,
        ctx: &Context,
        delay: RefHandle,
        slot_offset: i32,
        node: RefHandle,
        parameter_index: usize,
    ) -> Result<()> {
        ctx.with_entity(delay, |e| {
            let delay = e.as_delay().ok_or_else(|| crate::error::VxError::invalid_reference("delay"))?;
            delay.associate(ctx, node, parameter_index, slot_offset)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphEngineConfig;
    use crate::kernel::{
        BorderMode, Direction, KernelAttributes, KernelBody, ParamRequirement, ParamSignature, Validator,
        WholeNodeValidator,
    };
    use crate::node::NodeBinding;
    use crate::object::{ObjectKind, ScalarType};
    use crate::target::LocalTarget;
    use std::future::Future;
    use std::pin::Pin;

    struct NoopValidator;
    impl WholeNodeValidator for NoopValidator {
        fn validate(&self, _node: &NodeBinding<'_>, _metas: &mut [crate::meta::MetaFormat]) -> Result<()> {
            Ok(())
        }
    }

    struct NoopBody;
    impl KernelBody for NoopBody {
        fn run<'a>(&'a self, _node: &'a NodeBinding<'a>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn make_kernel(ctx: &Context, name: &str) -> Arc<KernelObject> {
        let header = Arc::new(ReferenceHeader::new(ObjectKind::Kernel, Scope::Context, false));
        Arc::new(KernelObject::new(
            header,
            name,
            ctx.allocate_kernel_id(),
            vec![ParamSignature {
                direction: Direction::Output,
                kind: ObjectKind::Scalar,
                requirement: ParamRequirement::Required,
            }],
            Validator::WholeNode(Arc::new(NoopValidator)),
            Arc::new(NoopBody),
            KernelAttributes {
                local_data_size: 0,
                border_mode: BorderMode::Undefined,
                reset_valid_rectangle: true,
                pipeup_depth: 1,
            },
        ))
    }

    #[tokio::test]
    async fn single_node_graph_verifies_and_runs() {
        let ctx = Context::new(GraphEngineConfig::default());
        ctx.load_target(Arc::new(LocalTarget::new()));

        let data_handle = ctx
            .register(ObjectKind::Scalar, Scope::Context, false, |header| {
                crate::context::Entity::Data(Arc::new(crate::object::DataObject::new(
                    header,
                    crate::object::ObjectShape::Scalar { data_type: ScalarType::Int32 },
                    None,
                    crate::object::OverlapRegion::Whole,
                )))
            })
            .unwrap();

        let kernel = make_kernel(&ctx, "test.scalar_source");
        let graph = Graph::create(&ctx).unwrap();
        let node_handle = graph.create_node(&ctx, kernel).unwrap();
        let node = ctx
            .with_entity(node_handle, |e| Ok(e.as_node().unwrap().clone()))
            .unwrap();
        node.bind(&ctx, 0, data_handle).unwrap();

        graph.verify(&ctx).await.unwrap();
        assert_eq!(graph.state(&ctx).unwrap(), GraphState::Verified);

        graph.process(&ctx).await.unwrap();
        assert_eq!(graph.state(&ctx).unwrap(), GraphState::Completed);
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_verification() {
        let ctx = Context::new(GraphEngineConfig::default());
        ctx.load_target(Arc::new(LocalTarget::new()));

        let kernel = make_kernel(&ctx, "test.unbound");
        let graph = Graph::create(&ctx).unwrap();
        graph.create_node(&ctx, kernel).unwrap();

        let err = graph.verify(&ctx).await.unwrap_err();
        assert!(matches!(err, crate::error::VxError::NotSufficient { .. }));
    }
}
