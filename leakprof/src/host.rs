//! Collaborator interfaces implemented by the host runtime.
//!
//! The core never walks real memory. Everything it knows about the object
//! graph comes through these traits, and it only calls them while the host
//! guarantees a stable view of the graph.

use crate::{HeapRegion, ObjectRef, Reference};

// ── Roots ─────────────────────────────────────────────────────────────

/// Host-assigned identity of a GC root slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(pub u64);

/// Which subsystem owns a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSystem {
    Threads,
    Globals,
    NativeHandles,
    ClassLoaders,
    CodeCache,
    Internal,
    Unknown,
}

/// What kind of slot a root is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    StackVariable,
    LocalHandle,
    GlobalHandle,
    HandleArea,
    Unknown,
}

impl RootSystem {
    pub fn name(self) -> &'static str {
        match self {
            RootSystem::Threads => "Threads",
            RootSystem::Globals => "Globals",
            RootSystem::NativeHandles => "Native Handles",
            RootSystem::ClassLoaders => "Class Loaders",
            RootSystem::CodeCache => "Code Cache",
            RootSystem::Internal => "Internal",
            RootSystem::Unknown => "<unknown>",
        }
    }
}

impl RootKind {
    pub fn name(self) -> &'static str {
        match self {
            RootKind::StackVariable => "Stack Variable",
            RootKind::LocalHandle => "Local Handle",
            RootKind::GlobalHandle => "Global Handle",
            RootKind::HandleArea => "Handle Area",
            RootKind::Unknown => "<unknown>",
        }
    }
}

/// Classification of a root, resolved lazily when a chain is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    pub id: RootId,
    pub system: RootSystem,
    pub kind: RootKind,
    pub description: Option<String>,
}

impl RootInfo {
    pub fn unknown(id: RootId) -> Self {
        Self {
            id,
            system: RootSystem::Unknown,
            kind: RootKind::Unknown,
            description: None,
        }
    }
}

/// Consumers implement this to hand out GC roots.
///
/// The sequence must be finite. It may be requested more than once per
/// session (a root-marking pass followed by the full search) and must yield
/// the same roots both times.
pub trait RootEnumerator {
    fn for_each_root(&self, visitor: &mut dyn FnMut(RootId, Option<ObjectRef>));

    fn describe_root(&self, root: RootId) -> RootInfo {
        RootInfo::unknown(root)
    }
}

// ── Object graph ──────────────────────────────────────────────────────

/// How the search should walk an object's outgoing references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectShape {
    /// Fixed set of reference fields, visited in one go.
    Instance,
    /// Array of references, visited in chunks.
    ObjectArray { length: usize },
    /// No outgoing references (primitive arrays, strings, ...).
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescription {
    pub type_name: String,
    pub size: usize,
    pub detail: Option<String>,
}

/// Enumerates the outgoing references of heap objects.
///
/// `visitor` receives the slot and its current target; empty slots are
/// passed as `None` so hosts don't have to filter them.
pub trait ReferenceIterator {
    /// The address range all objects of this graph live in.
    fn region(&self) -> HeapRegion;

    fn shape(&self, object: ObjectRef) -> ObjectShape;

    fn for_each_outgoing_reference(
        &self,
        object: ObjectRef,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    );

    /// Visits array elements `begin..end`. Only called for
    /// [`ObjectShape::ObjectArray`] objects, with `end <= length`.
    fn for_each_outgoing_reference_range(
        &self,
        object: ObjectRef,
        begin: usize,
        end: usize,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    );

    /// Objects already reclaimed but still reachable through a stale slot
    /// are skipped by the search.
    fn is_live(&self, object: ObjectRef) -> bool {
        let _ = object;
        true
    }

    fn describe_object(&self, object: ObjectRef) -> Option<ObjectDescription> {
        let _ = object;
        None
    }

    fn field_name(&self, holder: ObjectRef, index: u32) -> Option<String> {
        let _ = (holder, index);
        None
    }
}

// ── Weak references ───────────────────────────────────────────────────

/// Opaque handle to a weak slot owned by a [`WeakReferenceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakHandle(pub u64);

/// Storage for the sampler's weak references.
///
/// `register` and `release` are called from allocating threads, so the
/// registry must be shareable. The collector clears slots on its own and
/// reports that through `ObjectSampler::notify_dead_samples`.
pub trait WeakReferenceRegistry: Send + Sync {
    fn register(&self, object: ObjectRef) -> WeakHandle;

    fn resolve(&self, handle: WeakHandle) -> Option<ObjectRef>;

    fn is_dead(&self, handle: WeakHandle) -> bool {
        self.resolve(handle).is_none()
    }

    fn release(&self, handle: WeakHandle);
}
