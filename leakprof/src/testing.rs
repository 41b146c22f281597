//! In-memory stand-ins for the host collaborators, shared by unit tests.

use parking_lot::Mutex;

use crate::{
    HeapRegion, ObjectDescription, ObjectRef, ObjectShape, Reference,
    ReferenceIterator, RootEnumerator, RootId, RootInfo, RootKind, RootSystem,
    WeakHandle, WeakReferenceRegistry,
};

const BASE: usize = 0x1000;
const ALIGN: usize = 16;
const MAX_OBJECTS: usize = 1 << 16;

/// Address of the `n`th test object. `n` starts at 1.
pub(crate) fn obj(n: usize) -> ObjectRef {
    ObjectRef::new(BASE + n * ALIGN).expect("test object address is non-zero")
}

// ── Weak references ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    target: Option<ObjectRef>,
    released: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TestRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl TestRegistry {
    /// Clears every weak slot pointing at `object`, like a collector would.
    pub(crate) fn kill(&self, object: ObjectRef) {
        for slot in self.slots.lock().iter_mut() {
            if slot.target == Some(object) {
                slot.target = None;
            }
        }
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.slots.lock().iter().filter(|s| !s.released).count()
    }
}

impl WeakReferenceRegistry for TestRegistry {
    fn register(&self, object: ObjectRef) -> WeakHandle {
        let mut slots = self.slots.lock();
        slots.push(Slot {
            target: Some(object),
            released: false,
        });
        WeakHandle(slots.len() as u64 - 1)
    }

    fn resolve(&self, handle: WeakHandle) -> Option<ObjectRef> {
        let slots = self.slots.lock();
        let slot = slots.get(handle.0 as usize)?;
        if slot.released { None } else { slot.target }
    }

    fn release(&self, handle: WeakHandle) {
        if let Some(slot) = self.slots.lock().get_mut(handle.0 as usize) {
            assert!(!slot.released, "weak handle released twice");
            slot.released = true;
        }
    }
}

// ── Object graph ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Node {
    slots: Vec<Option<ObjectRef>>,
    array: bool,
    live: bool,
}

/// A tiny object graph: instances with an append-only field list, object
/// arrays with fixed length, and root slots.
#[derive(Debug, Default)]
pub(crate) struct TestGraph {
    nodes: Vec<Node>,
    roots: Vec<Option<ObjectRef>>,
}

impl TestGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn node(&self, object: ObjectRef) -> &Node {
        &self.nodes[(object.addr() - BASE) / ALIGN - 1]
    }

    fn node_mut(&mut self, object: ObjectRef) -> &mut Node {
        &mut self.nodes[(object.addr() - BASE) / ALIGN - 1]
    }

    pub(crate) fn object(&mut self) -> ObjectRef {
        self.nodes.push(Node {
            slots: Vec::new(),
            array: false,
            live: true,
        });
        obj(self.nodes.len())
    }

    pub(crate) fn array(&mut self, length: usize) -> ObjectRef {
        self.nodes.push(Node {
            slots: vec![None; length],
            array: true,
            live: true,
        });
        obj(self.nodes.len())
    }

    /// Adds a field to `from` pointing at `to`. Returns the field index.
    pub(crate) fn link(&mut self, from: ObjectRef, to: ObjectRef) -> u32 {
        let node = self.node_mut(from);
        assert!(!node.array, "use set_element for arrays");
        node.slots.push(Some(to));
        node.slots.len() as u32 - 1
    }

    pub(crate) fn set_element(&mut self, array: ObjectRef, index: usize, to: ObjectRef) {
        self.node_mut(array).slots[index] = Some(to);
    }

    pub(crate) fn root(&mut self, to: ObjectRef) -> RootId {
        self.roots.push(Some(to));
        RootId(self.roots.len() as u64 - 1)
    }

    pub(crate) fn empty_root(&mut self) -> RootId {
        self.roots.push(None);
        RootId(self.roots.len() as u64 - 1)
    }

    pub(crate) fn kill(&mut self, object: ObjectRef) {
        self.node_mut(object).live = false;
    }

    /// Builds `root -> o[0] -> o[1] -> ... -> o[len - 1]` and returns the
    /// objects root-nearest first.
    pub(crate) fn chain(&mut self, len: usize) -> (RootId, Vec<ObjectRef>) {
        let objects: Vec<_> = (0..len).map(|_| self.object()).collect();
        for pair in objects.windows(2) {
            self.link(pair[0], pair[1]);
        }
        let root = self.root(objects[0]);
        (root, objects)
    }
}

impl RootEnumerator for TestGraph {
    fn for_each_root(&self, visitor: &mut dyn FnMut(RootId, Option<ObjectRef>)) {
        for (i, target) in self.roots.iter().enumerate() {
            visitor(RootId(i as u64), *target);
        }
    }

    fn describe_root(&self, root: RootId) -> RootInfo {
        RootInfo {
            id: root,
            system: RootSystem::Globals,
            kind: RootKind::GlobalHandle,
            description: Some(format!("test root {}", root.0)),
        }
    }
}

impl ReferenceIterator for TestGraph {
    fn region(&self) -> HeapRegion {
        HeapRegion::new(BASE, MAX_OBJECTS * ALIGN, ALIGN)
    }

    fn shape(&self, object: ObjectRef) -> ObjectShape {
        let node = self.node(object);
        if node.array {
            ObjectShape::ObjectArray {
                length: node.slots.len(),
            }
        } else if node.slots.is_empty() {
            ObjectShape::Leaf
        } else {
            ObjectShape::Instance
        }
    }

    fn for_each_outgoing_reference(
        &self,
        object: ObjectRef,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    ) {
        for (i, target) in self.node(object).slots.iter().enumerate() {
            let reference = Reference::Field {
                holder: object,
                index: i as u32,
            };
            visitor(reference, *target);
        }
    }

    fn for_each_outgoing_reference_range(
        &self,
        object: ObjectRef,
        begin: usize,
        end: usize,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    ) {
        for (i, target) in self.node(object).slots[begin..end].iter().enumerate() {
            let reference = Reference::Element {
                holder: object,
                index: (begin + i) as u32,
            };
            visitor(reference, *target);
        }
    }

    fn is_live(&self, object: ObjectRef) -> bool {
        self.node(object).live
    }

    fn describe_object(&self, object: ObjectRef) -> Option<ObjectDescription> {
        let node = self.node(object);
        Some(ObjectDescription {
            type_name: if node.array { "Array" } else { "Node" }.to_string(),
            size: ALIGN * (1 + node.slots.len()),
            detail: None,
        })
    }

    fn field_name(&self, _holder: ObjectRef, index: u32) -> Option<String> {
        Some(format!("f{index}"))
    }
}
