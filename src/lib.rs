//! A dataflow graph engine for OpenVX-family runtimes: reference counting,
//! verification, wavefront execution, and pipelined/streaming scheduling.
//!
//! This crate implements the *engine* — the part of an OpenVX-style runtime that is
//! data-oblivious. It tracks references, checks that a graph's nodes are wired
//! together consistently, decides in what order and how concurrently to run them, and
//! keeps a pipelined graph fed across runs. It never looks at a pixel: concrete
//! storage for images/tensors/arrays, the kernels that process them, and the targets
//! that run those kernels are all external collaborators reached only through the
//! traits in [`kernel`] and [`target`].
//!
//! # Layering
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ context::Context          — the registry: slot table, targets,  │
//! │                              graph queue, event queue            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ reference::{RefHandle,     — opaque Copy handles + generation-   │
//! │   ReferenceHeader,           counted slot table + dual refcounts │
//! │   SlotTable}                                                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ object, meta               — data-object shapes and the meta-    │
//! │                              format carrier verification uses    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ kernel, target, node       — registered kernels, back-ends, and  │
//! │                              kernel instances bound into a graph │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ graph::{verify, execute}   — the twelve verification phases and  │
//! │                              the wavefront executor               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ pipeline::{queue, schedule,│ — pending/ready/done queues, QueueAuto│
//! │   streaming}                 /QueueManual, the streaming worker   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ event                     — bounded, drop-oldest notifications   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vxgraph_core::config::GraphEngineConfig;
//! use vxgraph_core::context::Context;
//! use vxgraph_core::graph::Graph;
//! use vxgraph_core::target::LocalTarget;
//!
//! # async fn run() -> vxgraph_core::error::Result<()> {
//! let ctx = Context::new(GraphEngineConfig::default());
//! ctx.load_target(Arc::new(LocalTarget::new()));
//!
//! let graph = Graph::create(&ctx)?;
//! graph.verify(&ctx).await?;
//! graph.process(&ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod delay;
pub mod error;
pub mod event;
pub mod graph;
pub mod kernel;
pub mod meta;
pub mod node;
pub mod object;
pub mod pipeline;
pub mod reference;
pub mod target;
