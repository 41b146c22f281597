use std::num::NonZeroUsize;

use crate::{RootId, WeakHandle};

/// Opaque, address-like identity of a heap object.
///
/// The host decides what the bits mean; the only requirement is that the
/// value is stable for the duration of a snapshot and aligned to the
/// [`HeapRegion`](crate::HeapRegion) it belongs to. It is never dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectRef(NonZeroUsize);

impl ObjectRef {
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match NonZeroUsize::new(addr) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    #[inline(always)]
    pub const fn addr(self) -> usize {
        self.0.get()
    }
}

impl core::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Obj(0x{:x})", self.addr())
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.addr())
    }
}

/// Location of a single reference slot.
///
/// Two edges are the same edge exactly when their references are equal;
/// within one stable snapshot a slot can only point at one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A GC root slot as handed out by the root enumerator.
    Root(RootId),
    /// Instance field `index` of `holder`.
    Field { holder: ObjectRef, index: u32 },
    /// Element `index` of the object array `holder`.
    Element { holder: ObjectRef, index: u32 },
    /// The sampler's own weak slot. Only used for top-level registrations
    /// of samples that no chain reached.
    Sample(WeakHandle),
}

impl Reference {
    #[inline]
    pub const fn is_root(&self) -> bool {
        matches!(self, Reference::Root(_))
    }

    /// The object holding this slot, if the slot lives inside an object.
    pub const fn holder(&self) -> Option<ObjectRef> {
        match *self {
            Reference::Field { holder, .. }
            | Reference::Element { holder, .. } => Some(holder),
            Reference::Root(_) | Reference::Sample(_) => None,
        }
    }
}

/// One step of a discovered path: a slot and the object it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub reference: Reference,
    pub pointee: ObjectRef,
}

impl Edge {
    #[inline]
    pub const fn new(reference: Reference, pointee: ObjectRef) -> Self {
        Self { reference, pointee }
    }

    #[inline]
    pub const fn root(root: RootId, pointee: ObjectRef) -> Self {
        Self::new(Reference::Root(root), pointee)
    }
}

/// Identifier of a [`StoredEdge`](crate::StoredEdge). Ids start at 1 and are
/// handed out in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl EdgeId {
    #[inline(always)]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize, "edge id overflow");
        Self(index as u32 + 1)
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        debug_assert!(self.0 != 0, "edge id zero is reserved");
        (self.0 - 1) as usize
    }
}

impl core::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
