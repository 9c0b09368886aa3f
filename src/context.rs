//! The root registry: the single slot table, target list, and shared tables every
//! other entity is created and validated through.

use crate::config::GraphEngineConfig;
use crate::delay::DelayObject;
use crate::error::{Result, VxError};
use crate::event::{Event, EventPayload, EventQueue, EventType};
use crate::graph::types::GraphObject;
use crate::kernel::KernelObject;
use crate::meta::MetaFormat;
use crate::node::NodeObject;
use crate::object::ObjectKind;
use crate::reference::{RefHandle, ReferenceHeader, Scope, SlotTable};
use crate::target::Target;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// The closed set of concrete entities a [`Context`] can hold in its slot table.
/// Everything reachable from a [`RefHandle`] is one of these.
pub enum Entity {
    Graph(Arc<GraphObject>),
    Node(Arc<NodeObject>),
    Kernel(Arc<KernelObject>),
    Target(Arc<dyn Target>),
    Data(Arc<crate::object::DataObject>),
    Delay(Arc<DelayObject>),
    MetaFormat(Arc<RwLock<MetaFormat>>),
}

impl Entity {
    pub fn header(&self) -> &Arc<ReferenceHeader> {
        match self {
            Entity::Graph(g) => &g.header,
            Entity::Node(n) => &n.header,
            Entity::Kernel(k) => &k.header,
            Entity::Target(_) => unreachable!("targets are not slot-table entities"),
            Entity::Data(d) => &d.header,
            Entity::Delay(d) => &d.header,
            Entity::MetaFormat(_) => unreachable!("meta-formats are not slot-table entities"),
        }
    }

    pub fn as_graph(&self) -> Option<&Arc<GraphObject>> {
        match self {
            Entity::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Arc<NodeObject>> {
        match self {
            Entity::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_kernel(&self) -> Option<&Arc<KernelObject>> {
        match self {
            Entity::Kernel(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Arc<crate::object::DataObject>> {
        match self {
            Entity::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_delay(&self) -> Option<&Arc<DelayObject>> {
        match self {
            Entity::Delay(d) => Some(d),
            _ => None,
        }
    }
}

struct ContextInner {
    config: GraphEngineConfig,
    table: RwLock<SlotTable<Entity>>,
    targets: RwLock<Vec<Arc<dyn Target>>>,
    next_kernel_id: AtomicU32,
    next_library_id: AtomicU32,
    graph_queue: tokio::sync::Mutex<VecDeque<RefHandle>>,
    events: EventQueue,
    reentrancy_depth: AtomicUsize,
}

/// The root registry and scheduling surface, shared by `Arc` clone between every
/// `Graph`/`Node`/`Kernel`/`Target`/data object created under it.
///
/// One global registry behind one lock: structural mutations (insert/remove, target
/// registration) take the table's `RwLock`; reference count mutation never does (see
/// [`crate::reference::ReferenceHeader`]).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(config: GraphEngineConfig) -> Self {
        let events = EventQueue::new(config.event_queue_capacity);
        Self {
            inner: Arc::new(ContextInner {
                table: RwLock::new(SlotTable::new(config.max_references)),
                targets: RwLock::new(Vec::new()),
                next_kernel_id: AtomicU32::new(1),
                next_library_id: AtomicU32::new(1),
                graph_queue: tokio::sync::Mutex::new(VecDeque::new()),
                events,
                reentrancy_depth: AtomicUsize::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &GraphEngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventQueue {
        &self.inner.events
    }

    /// Registers a new entity. `build` receives the freshly allocated shared header
    /// so the concrete object (Graph/Node/Kernel/Data) can embed the very same
    /// `Arc<ReferenceHeader>` the slot table tracks — the header, not the table slot,
    /// is the single source of truth for refcounts.
    #[instrument(skip(self, build), fields(kind = ?kind))]
    pub fn register(
        &self,
        kind: ObjectKind,
        scope: Scope,
        is_virtual: bool,
        build: impl FnOnce(Arc<ReferenceHeader>) -> Entity,
    ) -> Result<RefHandle> {
        let header = Arc::new(ReferenceHeader::new(kind, scope, is_virtual));
        let entity = build(header);
        let mut table = self.inner.table.write().unwrap();
        let handle = table
            .insert(kind, entity)
            .ok_or_else(|| VxError::NoResources(format!("reference table full (max {})", self.inner.config.max_references)))?;
        debug!(index = handle.index, generation = handle.generation, "registered entity");
        Ok(handle)
    }

    /// `O(1)` validation: the handle must still resolve in the table and, if
    /// `expected_kind` is given, match it.
    pub fn validate(&self, handle: RefHandle, expected_kind: Option<ObjectKind>) -> bool {
        let table = self.inner.table.read().unwrap();
        match table.get(handle) {
            Some(entity) => expected_kind.map(|k| entity.header().kind == k).unwrap_or(true),
            None => false,
        }
    }

    pub fn get_entity(&self, handle: RefHandle) -> Result<Arc<ReferenceHeader>> {
        let table = self.inner.table.read().unwrap();
        table
            .get(handle)
            .map(|e| e.header().clone())
            .ok_or_else(|| VxError::invalid_reference(format!("{:?}", handle.kind)))
    }

    pub fn with_entity<R>(&self, handle: RefHandle, f: impl FnOnce(&Entity) -> Result<R>) -> Result<R> {
        let table = self.inner.table.read().unwrap();
        let entity = table
            .get(handle)
            .ok_or_else(|| VxError::invalid_reference(format!("{:?}", handle.kind)))?;
        f(entity)
    }

    /// An external client's read of a data object, enforcing virtual-object access
    /// windowing: a virtual object is only touchable while the executor has it marked
    /// accessible (inside the kernel invocation that currently owns it); any other
    /// external read returns `OptimizedAway` rather than whatever stale shape it last
    /// held.
    pub fn access_data(&self, handle: RefHandle) -> Result<Arc<crate::object::DataObject>> {
        let header = self.get_entity(handle)?;
        if header.is_virtual() && !header.is_accessible() {
            return Err(VxError::OptimizedAway(format!("{:?}", handle.kind)));
        }
        self.with_entity(handle, |e| {
            e.as_data().cloned().ok_or_else(|| VxError::invalid_reference(format!("{:?}", handle.kind)))
        })
    }

    /// Increments a reference's external count (the client-visible count returned to
    /// an API caller holding the handle).
    pub fn retain(&self, handle: RefHandle) -> Result<()> {
        self.get_entity(handle)?.retain_external();
        Ok(())
    }

    /// Decrements a reference's external count, removing it from the table and
    /// running any kind-specific teardown if this was the last reference overall.
    #[instrument(skip(self))]
    pub fn release(&self, handle: RefHandle) -> Result<()> {
        let header = self.get_entity(handle)?;
        if header.release_external() {
            let entity = {
                let mut table = self.inner.table.write().unwrap();
                table.remove(handle)
            };
            if let Some(entity) = entity {
                self.teardown(entity);
            }
        }
        Ok(())
    }

    /// Increments a reference's internal count: a framework binding (a node parameter
    /// slot) holding onto it, as opposed to a client's external retain. Used by
    /// [`crate::node::NodeObject::bind`] so a data object bound into a node cannot be
    /// torn down by the client's external release alone while the node still holds it.
    pub(crate) fn retain_internal(&self, handle: RefHandle) -> Result<()> {
        self.get_entity(handle)?.retain_internal();
        Ok(())
    }

    /// Decrements a reference's internal count, tearing the entity down if this was
    /// the last reference overall (external and internal both zero). A handle that no
    /// longer resolves is silently ignored — whatever it named has already been torn
    /// down through some other path.
    pub(crate) fn release_internal(&self, handle: RefHandle) {
        let Ok(header) = self.get_entity(handle) else { return };
        if header.release_internal() {
            let entity = {
                let mut table = self.inner.table.write().unwrap();
                table.remove(handle)
            };
            if let Some(entity) = entity {
                self.teardown(entity);
            }
        }
    }

    fn teardown(&self, entity: Entity) {
        match entity {
            Entity::Data(data) => {
                let children: Vec<RefHandle> = data.children.read().unwrap().clone();
                drop(data);
                for child in children {
                    let _ = self.release(child);
                }
            }
            Entity::Node(node) => {
                for binding in &node.parameters {
                    if let Some(handle) = binding.get() {
                        self.release_internal(handle);
                    }
                }
                debug!(name = ?node.name(), "node torn down");
            }
            Entity::Kernel(kernel) => {
                debug!(name = %kernel.name, "kernel torn down");
            }
            _ => {}
        }
    }

    pub fn load_target(&self, target: Arc<dyn Target>) {
        let mut targets = self.inner.targets.write().unwrap();
        targets.push(target);
        targets.sort_by_key(|t| std::cmp::Reverse(t.priority()));
    }

    pub fn targets(&self) -> Vec<Arc<dyn Target>> {
        self.inner.targets.read().unwrap().clone()
    }

    /// Finds the highest-priority loaded target that supports `kernel_name`.
    pub fn find_target(&self, kernel_name: &str) -> Option<Arc<dyn Target>> {
        self.inner
            .targets
            .read()
            .unwrap()
            .iter()
            .find(|t| t.supports(kernel_name).is_some())
            .cloned()
    }

    pub fn allocate_kernel_id(&self) -> u32 {
        self.inner.next_kernel_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn allocate_library_id(&self) -> u32 {
        self.inner.next_library_id.fetch_add(1, Ordering::AcqRel)
    }

    pub async fn enqueue_graph(&self, handle: RefHandle) -> Result<()> {
        let mut queue = self.inner.graph_queue.lock().await;
        if queue.len() >= self.inner.config.graph_queue_capacity {
            return Err(VxError::NoResources("graph queue is at capacity".into()));
        }
        queue.push_back(handle);
        Ok(())
    }

    pub async fn dequeue_graph(&self) -> Option<RefHandle> {
        self.inner.graph_queue.lock().await.pop_front()
    }

    /// Re-entrancy depth: incremented across a graph's `process` body, read by the
    /// executor to decide whether a nested `process` call (a kernel scheduling a
    /// sub-graph) must fall back to serial dispatch.
    pub fn enter_process(&self) -> usize {
        self.inner.reentrancy_depth.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn exit_process(&self) {
        self.inner.reentrancy_depth.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn reentrancy_depth(&self) -> usize {
        self.inner.reentrancy_depth.load(Ordering::Acquire)
    }

    /// Enables the event queue. No-op if already enabled.
    pub fn enable_events(&self) {
        self.inner.events.enable();
    }

    pub fn disable_events(&self) {
        self.inner.events.disable();
    }

    /// Raises a `User` event with an application-chosen value.
    pub async fn send_user_event(&self, user_value: u32) {
        self.inner.events.send_user(user_value).await;
    }

    /// Blocking (bounded by `timeout`) or non-blocking (`timeout` of zero) wait for the
    /// next queued event.
    pub async fn wait_event(&self, timeout: std::time::Duration) -> Option<Event> {
        self.inner.events.wait(timeout).await
    }

    /// Registers an `app_value` override for events of `event_type` raised against
    /// `reference`.
    pub async fn register_event(&self, reference: RefHandle, event_type: EventType, graph_parameter: Option<usize>, app_value: u32) {
        self.inner.events.register(reference_tag(reference), event_type, graph_parameter, app_value).await;
    }

    /// Raises a framework-originated event (`NodeCompleted`, `NodeError`,
    /// `GraphCompleted`, `GraphParameterConsumed`), applying any registration bound to
    /// `reference` if given.
    pub(crate) async fn raise_event(&self, reference: Option<RefHandle>, event_type: EventType, payload: EventPayload) {
        self.inner
            .events
            .push_for_reference(reference.map(reference_tag), event_type, payload, 0)
            .await;
    }
}

/// Packs a `RefHandle`'s `(index, generation)` into the opaque `u64` tag the event
/// queue's registration table keys on, so `event.rs` stays free of a dependency on
/// `crate::reference`.
fn reference_tag(handle: RefHandle) -> u64 {
    ((handle.index as u64) << 32) | handle.generation as u64
}
