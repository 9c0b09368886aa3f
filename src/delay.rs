//! Delay: a fixed-length ring of data objects used to express temporal dependencies
//! between graph runs. Grounded in `original_source/framework/include/vx_delay.h`'s
//! `Delay` class: a `count`-sized ring of `refs`, a rotating `index`, and a `set` of
//! associated node parameters that get rebound on each age.

use crate::context::Context;
use crate::error::{Result, VxError};
use crate::reference::{RefHandle, ReferenceHeader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// One node parameter kept in sync with a delay slot: on every `age`, `node`'s
/// `parameter_index` is rebound to whichever ring slot now sits at `slot_offset`
/// relative to the delay's newly-advanced head.
struct Association {
    node: RefHandle,
    parameter_index: usize,
    slot_offset: i32,
}

/// The engine's view of a Delay object: a ring of `RefHandle`s to the underlying data
/// objects (all the same shape/kind, allocated once at delay creation) plus the
/// bookkeeping needed to rotate it and keep registered node parameters pointed at the
/// right slot.
pub struct DelayObject {
    pub header: Arc<ReferenceHeader>,
    items: Vec<RefHandle>,
    /// Index of the slot currently considered "slot 0" (the most recent write).
    head: AtomicUsize,
    associations: RwLock<Vec<Association>>,
}

impl DelayObject {
    pub fn new(header: Arc<ReferenceHeader>, items: Vec<RefHandle>) -> Self {
        assert!(!items.is_empty(), "a delay must have at least one slot");
        Self {
            header,
            items,
            head: AtomicUsize::new(0),
            associations: RwLock::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// The underlying data object handle currently at `slot_offset` relative to the
    /// head (slot 0 is the most recently written, negative offsets reach back into
    /// history, per `vxGetReferenceFromDelay`'s signed index).
    pub fn slot(&self, slot_offset: i32) -> RefHandle {
        let count = self.items.len() as i32;
        let head = self.head.load(Ordering::Acquire) as i32;
        let index = (head + slot_offset).rem_euclid(count);
        self.items[index as usize]
    }

    /// Registers that `node`'s `parameter_index` should track `slot_offset`, binding it
    /// immediately to the slot's current occupant. Mirrors `vxAssociateDelayWithNode`.
    pub fn associate(&self, ctx: &Context, node: RefHandle, parameter_index: usize, slot_offset: i32) -> Result<()> {
        let handle = self.slot(slot_offset);
        bind_parameter(ctx, node, parameter_index, handle)?;
        self.associations.write().unwrap().push(Association {
            node,
            parameter_index,
            slot_offset,
        });
        Ok(())
    }

    /// Advances the ring by one slot and rebinds every associated node parameter to
    /// its (now-shifted) slot, run at the end of each graph run.
    pub fn age(&self, ctx: &Context) -> Result<()> {
        let count = self.items.len();
        self.head.fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| Some((h + count - 1) % count)).ok();
        let associations = self.associations.read().unwrap();
        for assoc in associations.iter() {
            let handle = self.slot(assoc.slot_offset);
            bind_parameter(ctx, assoc.node, assoc.parameter_index, handle)?;
        }
        Ok(())
    }
}

fn bind_parameter(ctx: &Context, node: RefHandle, parameter_index: usize, handle: RefHandle) -> Result<()> {
    let node = ctx.with_entity(node, |e| {
        e.as_node().cloned().ok_or_else(|| VxError::invalid_reference("graph node"))
    })?;
    node.bind(ctx, parameter_index, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphEngineConfig;
    use crate::context::Entity;
    use crate::kernel::{BorderMode, Direction, KernelAttributes, KernelBody, KernelObject, ParamRequirement, ParamSignature, Validator, WholeNodeValidator};
    use crate::node::{NodeBinding, NodeObject};
    use crate::object::{DataObject, ObjectKind, ObjectShape, OverlapRegion, ScalarType};
    use crate::reference::Scope;
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

    fn make_scalar(ctx: &Context) -> RefHandle {
        ctx.register(ObjectKind::Scalar, Scope::Context, false, |header| {
            Entity::Data(Arc::new(DataObject::new(
                header,
                ObjectShape::Scalar { data_type: ScalarType::Int32 },
                None,
                OverlapRegion::Whole,
            )))
        })
        .unwrap()
    }

    fn make_node(ctx: &Context) -> RefHandle {
        let kernel_header = Arc::new(ReferenceHeader::new(ObjectKind::Kernel, Scope::Context, false));
        let kernel = Arc::new(KernelObject::new(
            kernel_header,
            "test.delay_consumer",
            ctx.allocate_kernel_id(),
            vec![ParamSignature {
                direction: Direction::Input,
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
        ));
        ctx.register(ObjectKind::Node, Scope::Context, false, |header| {
            Entity::Node(Arc::new(NodeObject::new(header, kernel)))
        })
        .unwrap()
    }

    #[test]
    fn aging_rotates_slots_in_ring_order() {
        let ctx = Context::new(GraphEngineConfig::default());
        let slots: Vec<RefHandle> = (0..3).map(|_| make_scalar(&ctx)).collect();
        let header = Arc::new(ReferenceHeader::new(ObjectKind::Delay, Scope::Context, false));
        let delay = DelayObject::new(header, slots.clone());

        assert_eq!(delay.slot(0), slots[0]);
        delay.age(&ctx).unwrap();
        assert_eq!(delay.slot(0), slots[2]);
        delay.age(&ctx).unwrap();
        assert_eq!(delay.slot(0), slots[1]);
        delay.age(&ctx).unwrap();
        assert_eq!(delay.slot(0), slots[0]);
    }

    #[test]
    fn associated_parameter_tracks_slot_across_aging() {
        let ctx = Context::new(GraphEngineConfig::default());
        let slots: Vec<RefHandle> = (0..2).map(|_| make_scalar(&ctx)).collect();
        let header = Arc::new(ReferenceHeader::new(ObjectKind::Delay, Scope::Context, false));
        let delay = DelayObject::new(header, slots.clone());
        let node = make_node(&ctx);

        delay.associate(&ctx, node, 0, 0).unwrap();
        let bound = ctx.with_entity(node, |e| Ok(e.as_node().unwrap().parameters[0].get())).unwrap();
        assert_eq!(bound, Some(slots[0]));

        delay.age(&ctx).unwrap();
        let bound = ctx.with_entity(node, |e| Ok(e.as_node().unwrap().parameters[0].get())).unwrap();
        assert_eq!(bound, Some(slots[1]));
    }
}
