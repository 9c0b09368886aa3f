//! The reference substrate: opaque handles, per-object dual refcounts, and the
//! generation-counted slot table they are validated against.
//!
//! Validating a reference by scanning the pointed-to struct for a magic tag at a fixed
//! offset is how the embedded original does this, and it's undefined behavior to
//! reproduce in safe Rust: a stale or forged pointer can't be dereferenced at all. The
//! generation-counted slot table is the safe analogue — a [`RefHandle`] carries a slot
//! index, a generation counter, and a type tag, and [`SlotTable::get`] rejects any
//! handle whose generation or tag doesn't match the slot's current occupant in `O(1)`,
//! without ever dereferencing unchecked memory.

use crate::object::ObjectKind;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

/// An opaque, `Copy` handle to an entity in a [`crate::context::Context`]'s slot
/// table. Two handles are equal iff they name the same live object: a stale handle
/// (its slot was freed and reused) compares unequal to the fresh handle for that slot,
/// because the generation differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
    pub kind: ObjectKind,
}

/// Where a reference's lifetime is anchored. Virtual objects scope to the graph that
/// declared them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Context,
    Graph(RefHandle),
    Parent(RefHandle),
}

/// Shared reference-counting and accessibility state for one entity. Embedded via
/// `Arc<ReferenceHeader>` in both the slot table's entry and the object's own struct,
/// so count mutation never needs to go back through the table.
#[derive(Debug)]
pub struct ReferenceHeader {
    pub kind: ObjectKind,
    scope: RwLock<Scope>,
    external: AtomicU32,
    internal: AtomicU32,
    is_virtual: bool,
    accessible: AtomicBool,
    name: RwLock<Option<String>>,
}

impl ReferenceHeader {
    pub fn new(kind: ObjectKind, scope: Scope, is_virtual: bool) -> Self {
        Self {
            kind,
            scope: RwLock::new(scope),
            external: AtomicU32::new(1),
            internal: AtomicU32::new(0),
            is_virtual,
            // Non-virtual objects are always externally accessible; a virtual object
            // starts inaccessible and is only opened for the duration of the kernel
            // invocation that owns it.
            accessible: AtomicBool::new(!is_virtual),
            name: RwLock::new(None),
        }
    }

    pub fn retain_external(&self) {
        self.external.fetch_add(1, Ordering::AcqRel);
    }

    pub fn retain_internal(&self) {
        self.internal.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the external count and reports whether this call observed both
    /// counts reach zero. At most one caller across all concurrent releases will see
    /// `true` for a given header, since the check reads both counters only after the
    /// atomic decrement that could have zeroed the one it owns — callers use this to
    /// decide whether *they* run the destructor.
    pub fn release_external(&self) -> bool {
        let prev = self.external.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "external refcount underflow");
        prev == 1 && self.internal.load(Ordering::Acquire) == 0
    }

    pub fn release_internal(&self) -> bool {
        let prev = self.internal.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "internal refcount underflow");
        prev == 1 && self.external.load(Ordering::Acquire) == 0
    }

    pub fn external_count(&self) -> u32 {
        self.external.load(Ordering::Acquire)
    }

    pub fn internal_count(&self) -> u32 {
        self.internal.load(Ordering::Acquire)
    }

    pub fn total_count(&self) -> u32 {
        self.external_count() + self.internal_count()
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn is_accessible(&self) -> bool {
        self.accessible.load(Ordering::Acquire)
    }

    pub fn set_accessible(&self, accessible: bool) {
        self.accessible.store(accessible, Ordering::Release);
    }

    pub fn scope(&self) -> Scope {
        *self.scope.read().unwrap()
    }

    pub fn set_scope(&self, scope: Scope) {
        *self.scope.write().unwrap() = scope;
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = Some(name.into());
    }
}

struct Slot<T> {
    generation: u32,
    occupant: Option<T>,
}

/// A generation-counted, free-list-backed table mapping [`RefHandle`] to `T`.
///
/// Removing an entry bumps its slot's generation and pushes the index onto the free
/// list, so a handle minted before the removal will fail [`SlotTable::get`] even after
/// the slot is reused for an unrelated object.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `value` under `kind`, returning its handle, or `None` if the table is
    /// already at `capacity` (the caller maps this to `VxError::NoResources`).
    pub fn insert(&mut self, kind: ObjectKind, value: T) -> Option<RefHandle> {
        if self.len >= self.capacity {
            return None;
        }
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            self.slots.push(Slot {
                generation: 0,
                occupant: None,
            });
            (self.slots.len() - 1) as u32
        };
        let slot = &mut self.slots[index as usize];
        slot.occupant = Some(value);
        self.len += 1;
        Some(RefHandle {
            index,
            generation: slot.generation,
            kind,
        })
    }

    pub fn get(&self, handle: RefHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.occupant.as_ref()
    }

    pub fn get_mut(&mut self, handle: RefHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.occupant.as_mut()
    }

    pub fn contains(&self, handle: RefHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Removes and returns the occupant, bumping the slot's generation so any
    /// outstanding handle to it becomes stale.
    pub fn remove(&mut self, handle: RefHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.occupant.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|s| s.occupant.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_rejected_after_reuse() {
        let mut table: SlotTable<&'static str> = SlotTable::new(8);
        let h1 = table.insert(ObjectKind::Image, "first").unwrap();
        table.remove(h1).unwrap();
        let h2 = table.insert(ObjectKind::Image, "second").unwrap();
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1.generation, h2.generation);
        assert!(table.get(h1).is_none());
        assert_eq!(*table.get(h2).unwrap(), "second");
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table: SlotTable<u32> = SlotTable::new(2);
        assert!(table.insert(ObjectKind::Scalar, 1).is_some());
        assert!(table.insert(ObjectKind::Scalar, 2).is_some());
        assert!(table.insert(ObjectKind::Scalar, 3).is_none());
    }

    #[test]
    fn dual_refcount_destroys_on_last_release_either_side() {
        let header = ReferenceHeader::new(ObjectKind::Graph, Scope::Context, false);
        header.retain_internal();
        assert!(!header.release_external());
        assert!(header.release_internal());
    }
}
