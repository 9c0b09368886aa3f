//! Kernel: a registered function signature plus the validator(s), body, and lifecycle
//! hooks a `Target` runs it through.

use crate::error::Result;
use crate::meta::MetaFormat;
use crate::node::NodeBinding;
use crate::object::ObjectKind;
use crate::reference::ReferenceHeader;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Whether a kernel parameter is read, written, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Bidirectional,
}

/// Whether a parameter slot must be bound before a graph can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRequirement {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSignature {
    pub direction: Direction,
    pub kind: ObjectKind,
    pub requirement: ParamRequirement,
}

/// A validator that inspects the whole parameter list at once and fills in every
/// output meta-format in a single call — the newer of the two validator shapes this
/// engine keeps alongside each other.
pub trait WholeNodeValidator: Send + Sync {
    fn validate(&self, node: &NodeBinding<'_>, metas: &mut [MetaFormat]) -> Result<()>;
}

/// Validates one input parameter in isolation — the legacy shape, kept alongside
/// `WholeNodeValidator` rather than migrated away.
pub trait InputValidator: Send + Sync {
    fn validate(&self, node: &NodeBinding<'_>, parameter_index: usize) -> Result<()>;
}

/// Computes one output parameter's meta-format from the node's already-validated
/// inputs — the legacy shape's output-side half.
pub trait OutputValidator: Send + Sync {
    fn validate(&self, node: &NodeBinding<'_>, parameter_index: usize, meta: &mut MetaFormat) -> Result<()>;
}

/// The two ways a kernel can declare its verification-time behavior. Both are kept
/// as first-class, rather than collapsing to one, because existing kernels written
/// against the legacy per-parameter shape should not need to be rewritten just to
/// register under this engine.
pub enum Validator {
    WholeNode(Arc<dyn WholeNodeValidator>),
    Legacy {
        inputs: Vec<Arc<dyn InputValidator>>,
        outputs: Vec<Arc<dyn OutputValidator>>,
    },
}

/// A kernel's executable body. Takes the manual `Pin<Box<dyn Future>>` shape (rather
/// than `#[async_trait]`) so a single vtable call can be made per wave without extra
/// boxing at the call site — the same shape node-execution takes elsewhere in this
/// codebase's async trait objects.
pub trait KernelBody: Send + Sync {
    fn run<'a>(&'a self, node: &'a NodeBinding<'a>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

pub trait InitializeHook: Send + Sync {
    fn initialize(&self, node: &NodeBinding<'_>) -> Result<()>;
}

pub trait DeinitializeHook: Send + Sync {
    fn deinitialize(&self, node: &NodeBinding<'_>) -> Result<()>;
}

/// Recomputes a node's output valid-rectangle from its inputs' valid-rectangles
/// (image/pyramid kinds only).
pub trait ValidRectangleCallback: Send + Sync {
    fn compute(&self, node: &NodeBinding<'_>, parameter_index: usize) -> Result<crate::object::Rectangle>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderMode {
    Undefined,
    Constant(f64),
    Replicate,
}

#[derive(Debug, Clone)]
pub struct KernelAttributes {
    pub local_data_size: usize,
    pub border_mode: BorderMode,
    pub reset_valid_rectangle: bool,
    /// Depth a pipelined graph may pipe this node up to.
    pub pipeup_depth: usize,
}

impl Default for KernelAttributes {
    fn default() -> Self {
        Self {
            local_data_size: 0,
            border_mode: BorderMode::Undefined,
            reset_valid_rectangle: true,
            pipeup_depth: 1,
        }
    }
}

/// A registered kernel: signature, validator, executable body, and lifecycle hooks.
/// Immutable after [`KernelObject::finalize`] is called: a kernel's signature and
/// validator are fixed once any node is created from it.
pub struct KernelObject {
    pub header: Arc<ReferenceHeader>,
    pub name: String,
    pub enumeration: u32,
    pub signature: Vec<ParamSignature>,
    validator: RwLock<Option<Validator>>,
    pub body: Arc<dyn KernelBody>,
    pub initialize: Option<Arc<dyn InitializeHook>>,
    pub deinitialize: Option<Arc<dyn DeinitializeHook>>,
    pub valid_rectangle_cb: Option<Arc<dyn ValidRectangleCallback>>,
    pub attributes: KernelAttributes,
    finalized: AtomicBool,
}

impl KernelObject {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        header: Arc<ReferenceHeader>,
        name: impl Into<String>,
        enumeration: u32,
        signature: Vec<ParamSignature>,
        validator: Validator,
        body: Arc<dyn KernelBody>,
        attributes: KernelAttributes,
    ) -> Self {
        Self {
            header,
            name: name.into(),
            enumeration,
            signature,
            validator: RwLock::new(Some(validator)),
            body,
            initialize: None,
            deinitialize: None,
            valid_rectangle_cb: None,
            attributes,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.signature.len()
    }

    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::Release);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn with_validator<R>(&self, f: impl FnOnce(&Validator) -> R) -> Option<R> {
        self.validator.read().unwrap().as_ref().map(f)
    }
}
