//! Error types for graph construction, verification, and execution.
//!
//! [`VxError`] is the crate's single closed error taxonomy. Every fallible operation in
//! the engine — reference validation, graph verification, wavefront execution,
//! pipelining, and the event queue — returns a variant from this enum rather than an
//! ad-hoc string or status code. Failures are sticky at verification, abandoning at
//! execution, and never masked for resource errors (see `GraphEngineConfig` and the
//! module docs on `graph::verify`).
//!
//! # Matching on verification failures
//!
//! ```rust
//! use vxgraph_core::error::VxError;
//!
//! fn describe(err: &VxError) -> &'static str {
//!     match err {
//!         VxError::MultipleWriters { .. } => "two nodes write the same region",
//!         VxError::InvalidGraph(_) => "the graph is cyclic or has no heads",
//!         VxError::NotSufficient { .. } => "a required parameter is unbound",
//!         _ => "other",
//!     }
//! }
//! ```

use thiserror::Error;

/// Convenience result type using [`VxError`].
pub type Result<T> = std::result::Result<T, VxError>;

/// The closed error taxonomy for this crate.
///
/// Success is represented by `Ok(_)` rather than a variant, so this enum only lists
/// the failure kinds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VxError {
    /// Unspecified failure with no more specific classification.
    #[error("failure: {0}")]
    Failure(String),

    /// A reference handle failed validation: null, foreign, stale generation, or
    /// type-tag mismatch against the expected [`crate::object::ObjectKind`].
    #[error("invalid reference{}", node.as_ref().map(|n| format!(" (node '{n}')")).unwrap_or_default())]
    InvalidReference {
        /// Node context, when the invalid reference was encountered while binding a
        /// parameter.
        node: Option<String>,
    },

    /// An API call received arguments that are structurally invalid (wrong arity,
    /// out-of-range index, null where required).
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A parameter or attribute value is out of its valid domain.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A bound reference's object type does not match what the kernel signature or
    /// meta-format requires.
    #[error("invalid type at node '{node}' parameter {parameter}: {detail}")]
    InvalidType {
        node: String,
        parameter: usize,
        detail: String,
    },

    /// A bound reference's format (e.g. image pixel format) does not match the
    /// inferred meta-format.
    #[error("invalid format at node '{node}' parameter {parameter}: {detail}")]
    InvalidFormat {
        node: String,
        parameter: usize,
        detail: String,
    },

    /// A bound reference's dimensions do not match the inferred meta-format.
    #[error("invalid dimension at node '{node}' parameter {parameter}: {detail}")]
    InvalidDimension {
        node: String,
        parameter: usize,
        detail: String,
    },

    /// An edge or binding refers to a node, parameter index, or graph that doesn't
    /// exist or isn't reachable the way the caller assumed.
    #[error("invalid link: {0}")]
    InvalidLink(String),

    /// The graph itself is structurally invalid: zero heads (cyclic), an unvisited
    /// node after traversal, or a topology the executor refuses to run.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A reference's scope does not match what the operation requires (e.g. a virtual
    /// object's scope is not a `Graph`).
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// A `Required` parameter slot was left unbound at verification time.
    #[error("not sufficient: node '{node}' parameter {parameter} is required but unbound")]
    NotSufficient { node: String, parameter: usize },

    /// No loaded target supports the requested kernel, or a target's `verify` rejected
    /// the binding.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Memory allocation for a parameter's backing storage failed.
    #[error("no memory: {0}")]
    NoMemory(String),

    /// A bounded resource (reference table slot, graph queue slot, worker pool
    /// capacity) was exhausted.
    #[error("no resources: {0}")]
    NoResources(String),

    /// A virtual object was accessed outside the window during which its owning
    /// kernel invocation has it open.
    #[error("optimized away: virtual object '{0}' is not currently accessible")]
    OptimizedAway(String),

    /// Two nodes write to overlapping regions of the same base object.
    #[error("multiple writers: node '{second_node}' overlaps an output already written by '{first_node}'")]
    MultipleWriters {
        first_node: String,
        second_node: String,
    },

    /// A kernel returned `Abandon` during execution; the current run was aborted.
    #[error("graph abandoned at node '{node}': {reason}")]
    GraphAbandoned { node: String, reason: String },

    /// A run was accepted for asynchronous scheduling (not itself a failure; used as
    /// the return status of `schedule`).
    #[error("graph scheduled")]
    GraphScheduled,
}

impl VxError {
    pub fn invalid_reference(node: impl Into<String>) -> Self {
        Self::InvalidReference {
            node: Some(node.into()),
        }
    }
}
