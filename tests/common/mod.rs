//! Shared test harness: minimal kernels and data-object builders used across the
//! end-to-end scenario tests. Concrete storage is out of scope for the
//! engine, so these test kernels carry their own `Arc<Mutex<_>>` payload rather than
//! writing through a `DataObject` — the same shape a real back-end's kernel body
//! would take, since the engine never looks at the bytes behind a reference.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vxgraph_core::config::GraphEngineConfig;
use vxgraph_core::context::{Context, Entity};
use vxgraph_core::error::Result;
use vxgraph_core::kernel::{
    BorderMode, Direction, InputValidator, KernelAttributes, KernelBody, KernelObject, OutputValidator,
    ParamRequirement, ParamSignature, Validator, WholeNodeValidator,
};
use vxgraph_core::meta::MetaFormat;
use vxgraph_core::node::NodeBinding;
use vxgraph_core::object::{DataObject, ImageFormat, ObjectKind, ObjectShape, OverlapRegion, ScalarType};
use vxgraph_core::reference::{RefHandle, ReferenceHeader, Scope};
use vxgraph_core::target::LocalTarget;

pub fn new_context() -> Context {
    let ctx = Context::new(GraphEngineConfig::default());
    ctx.load_target(Arc::new(LocalTarget::new()));
    ctx
}

pub fn register_scalar(ctx: &Context, data_type: ScalarType, scope: Scope) -> RefHandle {
    let is_virtual = matches!(scope, Scope::Graph(_));
    ctx.register(ObjectKind::Scalar, scope, is_virtual, |header| {
        Entity::Data(Arc::new(DataObject::new(
            header,
            ObjectShape::Scalar { data_type },
            None,
            OverlapRegion::Whole,
        )))
    })
    .unwrap()
}

/// Registers a (possibly virtual) image. A virtual image's scope must be the owning
/// `Graph`; `width`/`height` of `0` with `ImageFormat::Virt` is the "shape not yet known"
/// sentinel a virtual image starts with before verification specializes it.
pub fn register_image(ctx: &Context, width: u32, height: u32, format: ImageFormat, scope: Scope) -> RefHandle {
    let is_virtual = matches!(scope, Scope::Graph(_));
    ctx.register(ObjectKind::Image, scope, is_virtual, |header| {
        Entity::Data(Arc::new(DataObject::new(
            header,
            ObjectShape::Image { width, height, format },
            None,
            OverlapRegion::Whole,
        )))
    })
    .unwrap()
}

/// A whole-node validator that copies input 0's shape onto every output slot,
/// standing in for a kernel whose output meta is "same shape as my first input".
pub struct SameAsInput0;
impl WholeNodeValidator for SameAsInput0 {
    fn validate(&self, node: &NodeBinding<'_>, metas: &mut [MetaFormat]) -> Result<()> {
        let input = node.data_object(0)?;
        let shape = input.shape.read().unwrap().clone();
        for meta in metas.iter_mut() {
            if meta.kind == shape.kind() {
                meta.set_shape(shape.clone());
            }
        }
        Ok(())
    }
}

/// A whole-node validator that writes a fixed image meta-format, modeling a source
/// kernel whose output shape is known from its own configuration rather than from an
/// input.
pub struct FixedImageMeta {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}
impl WholeNodeValidator for FixedImageMeta {
    fn validate(&self, _node: &NodeBinding<'_>, metas: &mut [MetaFormat]) -> Result<()> {
        for meta in metas.iter_mut() {
            if meta.kind == ObjectKind::Image {
                meta.set_shape(ObjectShape::Image {
                    width: self.width,
                    height: self.height,
                    format: self.format,
                });
            }
        }
        Ok(())
    }
}

/// A whole-node validator that writes nothing, for kernels whose parameters are all
/// already-specified (non-virtual) objects needing no meta reconciliation at all.
pub struct NoopValidator;
impl WholeNodeValidator for NoopValidator {
    fn validate(&self, _node: &NodeBinding<'_>, _metas: &mut [MetaFormat]) -> Result<()> {
        Ok(())
    }
}

pub struct NoopInputValidator;
impl InputValidator for NoopInputValidator {
    fn validate(&self, _node: &NodeBinding<'_>, _parameter_index: usize) -> Result<()> {
        Ok(())
    }
}

pub struct SameAsInput0Output;
impl OutputValidator for SameAsInput0Output {
    fn validate(&self, node: &NodeBinding<'_>, _parameter_index: usize, meta: &mut MetaFormat) -> Result<()> {
        let input = node.data_object(0)?;
        meta.set_shape(input.shape.read().unwrap().clone());
        Ok(())
    }
}

/// Kernel body that copies an `i64` from its shared `input` cell to its shared
/// `output` cell and bumps `runs`, standing in for a "copy scalar" kernel. Shares
/// state by `Arc<Mutex<_>>` rather than through the (out-of-scope)
/// `DataObject` storage.
pub struct CopyScalarBody {
    pub input: Arc<Mutex<i64>>,
    pub output: Arc<Mutex<i64>>,
    pub runs: Arc<AtomicUsize>,
}
impl KernelBody for CopyScalarBody {
    fn run<'a>(&'a self, _node: &'a NodeBinding<'a>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let value = *self.input.lock().unwrap();
            *self.output.lock().unwrap() = value;
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

pub struct NoopBody;
impl KernelBody for NoopBody {
    fn run<'a>(&'a self, _node: &'a NodeBinding<'a>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}

/// Kernel body that always requests `Abandon` by returning an error, used to exercise
/// `GraphAbandoned`/`NodeError` adjacent failure paths.
pub struct AlwaysFailBody;
impl KernelBody for AlwaysFailBody {
    fn run<'a>(&'a self, node: &'a NodeBinding<'a>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            Err(vxgraph_core::error::VxError::Failure(format!(
                "kernel at node '{}' always fails",
                node.node.name().unwrap_or_default()
            )))
        })
    }
}

pub fn make_kernel(
    ctx: &Context,
    name: &str,
    signature: Vec<ParamSignature>,
    validator: Validator,
    body: Arc<dyn KernelBody>,
) -> Arc<KernelObject> {
    let header = Arc::new(ReferenceHeader::new(ObjectKind::Kernel, Scope::Context, false));
    Arc::new(KernelObject::new(
        header,
        name,
        ctx.allocate_kernel_id(),
        signature,
        validator,
        body,
        KernelAttributes {
            local_data_size: 0,
            border_mode: BorderMode::Undefined,
            reset_valid_rectangle: true,
            pipeup_depth: 1,
        },
    ))
}

pub fn input_sig(kind: ObjectKind) -> ParamSignature {
    ParamSignature {
        direction: Direction::Input,
        kind,
        requirement: ParamRequirement::Required,
    }
}

pub fn output_sig(kind: ObjectKind) -> ParamSignature {
    ParamSignature {
        direction: Direction::Output,
        kind,
        requirement: ParamRequirement::Required,
    }
}

pub fn bind(ctx: &Context, node: RefHandle, parameter_index: usize, handle: RefHandle) {
    let node = ctx.with_entity(node, |e| Ok(e.as_node().unwrap().clone())).unwrap();
    node.bind(ctx, parameter_index, handle).unwrap()
}
