use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use leakprof::{
    HeapRegion, ObjectRef, ObjectSampler, RootId, RootKind, RootSystem,
    StackTraceId, ThreadId,
};
use log::trace;
use parking_lot::RwLock;

use crate::{Class, ClassId, Header, HeaderFlags, ObjectType, WeakTable};

pub const OBJECT_ALIGNMENT: usize = 16;
const HEADER_SIZE: usize = 16;
const WORD_SIZE: usize = 8;

/// Header plus length word plus `payload` bytes, `None` on overflow.
fn with_length_header(payload: usize) -> Option<usize> {
    payload.checked_add(HEADER_SIZE + WORD_SIZE)
}

// ── Settings & errors ─────────────────────────────────────────────────

/// Address range of the simulated heap.
#[derive(Debug, Clone)]
pub struct SpaceSettings {
    /// First address handed out. Must be non-zero and aligned.
    pub base: usize,
    /// Bytes available for allocation. Addresses are never reused, so this
    /// bounds the total allocation volume of the space.
    pub capacity: usize,
}

impl Default for SpaceSettings {
    fn default() -> Self {
        Self {
            base: 0x1000_0000,
            capacity: 256 * 1024 * 1024,
        }
    }
}

impl SpaceSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.base == 0 || self.base % OBJECT_ALIGNMENT != 0 {
            return Err("base must be a non-zero multiple of the object alignment");
        }
        if self.capacity == 0 || self.capacity % OBJECT_ALIGNMENT != 0 {
            return Err("capacity must be a non-zero multiple of the object alignment");
        }
        if self.base.checked_add(self.capacity).is_none() {
            return Err("heap range overflows the address space");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    InvalidSettings(&'static str),
    OutOfSpace { requested: usize, available: usize },
    NoSuchObject(ObjectRef),
    NoSuchRoot(RootId),
    NoSuchClass(ClassId),
    NoSuchField { object: ObjectRef, name: String },
    WrongType { object: ObjectRef, found: ObjectType },
    IndexOutOfBounds { object: ObjectRef, index: usize, length: usize },
}

impl std::fmt::Display for SpaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpaceError::InvalidSettings(msg) => write!(f, "invalid space settings: {msg}"),
            SpaceError::OutOfSpace {
                requested,
                available,
            } => write!(
                f,
                "out of space: requested {requested} bytes, {available} available"
            ),
            SpaceError::NoSuchObject(object) => write!(f, "no object at {object}"),
            SpaceError::NoSuchRoot(root) => write!(f, "no root with id {}", root.0),
            SpaceError::NoSuchClass(class) => write!(f, "no class with id {}", class.0),
            SpaceError::NoSuchField { object, name } => {
                write!(f, "object {object} has no field named {name:?}")
            }
            SpaceError::WrongType { object, found } => {
                write!(f, "object {object} has unexpected type {found:?}")
            }
            SpaceError::IndexOutOfBounds {
                object,
                index,
                length,
            } => write!(f, "index {index} out of bounds for {object} of length {length}"),
        }
    }
}

impl std::error::Error for SpaceError {}

// ── Objects ───────────────────────────────────────────────────────────

/// Who allocated an object, as reported to the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocSite {
    pub thread: ThreadId,
    pub stack_trace: Option<StackTraceId>,
}

impl AllocSite {
    pub const fn thread(thread: u64) -> Self {
        Self {
            thread: ThreadId(thread),
            stack_trace: None,
        }
    }

    pub const fn at(self, stack_trace: u64) -> Self {
        Self {
            stack_trace: Some(StackTraceId(stack_trace)),
            ..self
        }
    }
}

#[derive(Debug)]
pub(crate) enum Body {
    Instance {
        class: ClassId,
        fields: Vec<Option<ObjectRef>>,
    },
    ObjectArray(Vec<Option<ObjectRef>>),
    Bytes(usize),
    Str(String),
}

#[derive(Debug)]
pub(crate) struct Object {
    pub(crate) header: Header,
    pub(crate) body: Body,
}

impl Object {
    /// Reference slots of this object; empty for leaf objects.
    pub(crate) fn references(&self) -> &[Option<ObjectRef>] {
        match &self.body {
            Body::Instance { fields, .. } => fields,
            Body::ObjectArray(elements) => elements,
            Body::Bytes(_) | Body::Str(_) => &[],
        }
    }

    fn references_mut(&mut self) -> &mut [Option<ObjectRef>] {
        match &mut self.body {
            Body::Instance { fields, .. } => fields,
            Body::ObjectArray(elements) => elements,
            Body::Bytes(_) | Body::Str(_) => &mut [],
        }
    }
}

#[derive(Debug)]
pub(crate) struct RootSlot {
    pub(crate) target: Option<ObjectRef>,
    pub(crate) system: RootSystem,
    pub(crate) kind: RootKind,
    pub(crate) description: String,
}

#[derive(Debug)]
pub(crate) struct SpaceInner {
    pub(crate) objects: AHashMap<ObjectRef, Object>,
    /// Indexed by `RootId`; removed roots leave a hole.
    pub(crate) roots: Vec<Option<RootSlot>>,
    pub(crate) classes: Vec<Class>,
    cursor: usize,
    pub(crate) used: usize,
}

impl SpaceInner {
    pub(crate) fn object(&self, object: ObjectRef) -> Result<&Object, SpaceError> {
        self.objects
            .get(&object)
            .ok_or(SpaceError::NoSuchObject(object))
    }

    fn object_mut(&mut self, object: ObjectRef) -> Result<&mut Object, SpaceError> {
        self.objects
            .get_mut(&object)
            .ok_or(SpaceError::NoSuchObject(object))
    }

    pub(crate) fn class(&self, class: ClassId) -> Option<&Class> {
        self.classes.get(class.0 as usize)
    }
}

// ── Space ─────────────────────────────────────────────────────────────

/// A simulated managed heap.
///
/// Objects get bump-allocated, aligned addresses inside a fixed range and
/// never move. All state sits behind one reader-writer lock: mutation and
/// collection take it exclusively, a [`Safepoint`](crate::Safepoint) holds
/// it shared and so keeps the graph stable.
#[derive(Debug)]
pub struct ObjectSpace {
    pub(crate) inner: RwLock<SpaceInner>,
    pub(crate) weak: Arc<WeakTable>,
    pub(crate) sampler: OnceLock<Arc<ObjectSampler>>,
    settings: SpaceSettings,
}

impl ObjectSpace {
    pub fn new(settings: SpaceSettings) -> Result<Self, SpaceError> {
        settings.validate().map_err(SpaceError::InvalidSettings)?;
        Ok(Self {
            inner: RwLock::new(SpaceInner {
                objects: AHashMap::new(),
                roots: Vec::new(),
                classes: Vec::new(),
                cursor: settings.base,
                used: 0,
            }),
            weak: Arc::new(WeakTable::new()),
            sampler: OnceLock::new(),
            settings,
        })
    }

    pub fn settings(&self) -> &SpaceSettings {
        &self.settings
    }

    pub fn region(&self) -> HeapRegion {
        HeapRegion::new(self.settings.base, self.settings.capacity, OBJECT_ALIGNMENT)
    }

    /// The weak table sampled objects are registered in. Pass it to the
    /// sampler so the collector can clear its references.
    pub fn weak_references(&self) -> Arc<WeakTable> {
        self.weak.clone()
    }

    /// Offers every subsequent allocation to `sampler`. Returns `false` if a
    /// sampler was already attached.
    pub fn attach_sampler(&self, sampler: Arc<ObjectSampler>) -> bool {
        self.sampler.set(sampler).is_ok()
    }

    pub fn sampler(&self) -> Option<&Arc<ObjectSampler>> {
        self.sampler.get()
    }

    pub fn define_class(&self, class: Class) -> ClassId {
        let mut inner = self.inner.write();
        inner.classes.push(class);
        ClassId(inner.classes.len() as u32 - 1)
    }

    pub fn class(&self, class: ClassId) -> Option<Class> {
        self.inner.read().class(class).cloned()
    }

    // ── allocation ─────────────────────────────────────────────────

    pub fn alloc_instance(
        &self,
        class: ClassId,
        site: AllocSite,
    ) -> Result<ObjectRef, SpaceError> {
        let field_count = self
            .inner
            .read()
            .class(class)
            .ok_or(SpaceError::NoSuchClass(class))?
            .field_count();
        self.allocate(
            ObjectType::Instance,
            field_count
                .checked_mul(WORD_SIZE)
                .and_then(|fields| fields.checked_add(HEADER_SIZE)),
            || Body::Instance {
                class,
                fields: vec![None; field_count],
            },
            site,
        )
    }

    pub fn alloc_array(
        &self,
        length: usize,
        site: AllocSite,
    ) -> Result<ObjectRef, SpaceError> {
        self.allocate(
            ObjectType::ObjectArray,
            length.checked_mul(WORD_SIZE).and_then(with_length_header),
            || Body::ObjectArray(vec![None; length]),
            site,
        )
    }

    pub fn alloc_bytes(
        &self,
        length: usize,
        site: AllocSite,
    ) -> Result<ObjectRef, SpaceError> {
        self.allocate(
            ObjectType::ByteArray,
            with_length_header(length),
            || Body::Bytes(length),
            site,
        )
    }

    pub fn alloc_str(&self, value: &str, site: AllocSite) -> Result<ObjectRef, SpaceError> {
        self.allocate(
            ObjectType::Str,
            with_length_header(value.len()),
            || Body::Str(value.to_string()),
            site,
        )
    }

    /// Reserves `size` bytes, rounded up to the alignment, and only then
    /// builds the body. `None` stands for a size that overflowed.
    fn allocate(
        &self,
        object_type: ObjectType,
        size: Option<usize>,
        body: impl FnOnce() -> Body,
        site: AllocSite,
    ) -> Result<ObjectRef, SpaceError> {
        let size = size.and_then(|size| size.checked_next_multiple_of(OBJECT_ALIGNMENT));
        let (object, size) = {
            let mut inner = self.inner.write();
            let limit = self.settings.base + self.settings.capacity;
            let available = limit - inner.cursor;
            let size = match size {
                Some(size) if size <= available => size,
                requested => {
                    return Err(SpaceError::OutOfSpace {
                        requested: requested.unwrap_or(usize::MAX),
                        available,
                    });
                }
            };
            let object = ObjectRef::new(inner.cursor).ok_or(SpaceError::OutOfSpace {
                requested: size,
                available,
            })?;
            inner.cursor += size;
            inner.used += size;
            inner.objects.insert(
                object,
                Object {
                    header: Header::new(object_type, size),
                    body: body(),
                },
            );
            (object, size)
        };
        trace!("allocated {object_type:?} of {size} bytes at {object}");

        // outside the heap lock: the sampler never waits for it
        if let Some(sampler) = self.sampler.get() {
            sampler.add_with_stack_trace(object, size as u64, site.thread, site.stack_trace);
        }
        Ok(object)
    }

    // ── references ─────────────────────────────────────────────────

    pub fn set_field(
        &self,
        object: ObjectRef,
        index: usize,
        target: Option<ObjectRef>,
    ) -> Result<(), SpaceError> {
        self.store(object, ObjectType::Instance, index, target)
    }

    pub fn field(&self, object: ObjectRef, index: usize) -> Result<Option<ObjectRef>, SpaceError> {
        self.load(object, ObjectType::Instance, index)
    }

    /// Sets the field called `name`, looked up in the object's class.
    pub fn set_named_field(
        &self,
        object: ObjectRef,
        name: &str,
        target: Option<ObjectRef>,
    ) -> Result<(), SpaceError> {
        let index = {
            let inner = self.inner.read();
            let found = inner.object(object)?;
            let Body::Instance { class, .. } = &found.body else {
                return Err(SpaceError::WrongType {
                    object,
                    found: found.header.object_type(),
                });
            };
            inner
                .class(*class)
                .and_then(|c| c.field_index(name))
                .ok_or_else(|| SpaceError::NoSuchField {
                    object,
                    name: name.to_string(),
                })?
        };
        self.set_field(object, index, target)
    }

    pub fn set_element(
        &self,
        array: ObjectRef,
        index: usize,
        target: Option<ObjectRef>,
    ) -> Result<(), SpaceError> {
        self.store(array, ObjectType::ObjectArray, index, target)
    }

    pub fn element(&self, array: ObjectRef, index: usize) -> Result<Option<ObjectRef>, SpaceError> {
        self.load(array, ObjectType::ObjectArray, index)
    }

    pub fn array_length(&self, array: ObjectRef) -> Result<usize, SpaceError> {
        let inner = self.inner.read();
        let found = inner.object(array)?;
        match &found.body {
            Body::ObjectArray(elements) => Ok(elements.len()),
            _ => Err(SpaceError::WrongType {
                object: array,
                found: found.header.object_type(),
            }),
        }
    }

    fn store(
        &self,
        object: ObjectRef,
        expected: ObjectType,
        index: usize,
        target: Option<ObjectRef>,
    ) -> Result<(), SpaceError> {
        let mut inner = self.inner.write();
        if let Some(target) = target {
            inner.object(target)?;
        }
        let found = inner.object_mut(object)?;
        let object_type = found.header.object_type();
        if object_type != expected {
            return Err(SpaceError::WrongType {
                object,
                found: object_type,
            });
        }
        let slots = found.references_mut();
        let length = slots.len();
        let slot = slots.get_mut(index).ok_or(SpaceError::IndexOutOfBounds {
            object,
            index,
            length,
        })?;
        *slot = target;
        Ok(())
    }

    fn load(
        &self,
        object: ObjectRef,
        expected: ObjectType,
        index: usize,
    ) -> Result<Option<ObjectRef>, SpaceError> {
        let inner = self.inner.read();
        let found = inner.object(object)?;
        let object_type = found.header.object_type();
        if object_type != expected {
            return Err(SpaceError::WrongType {
                object,
                found: object_type,
            });
        }
        let slots = found.references();
        slots
            .get(index)
            .copied()
            .ok_or(SpaceError::IndexOutOfBounds {
                object,
                index,
                length: slots.len(),
            })
    }

    /// Keeps `object` alive regardless of reachability.
    pub fn pin(&self, object: ObjectRef) -> Result<(), SpaceError> {
        let mut inner = self.inner.write();
        inner.object_mut(object)?.header.add_flag(HeaderFlags::PINNED);
        Ok(())
    }

    // ── roots ──────────────────────────────────────────────────────

    pub fn add_root(
        &self,
        system: RootSystem,
        kind: RootKind,
        description: impl Into<String>,
        target: Option<ObjectRef>,
    ) -> RootId {
        let mut inner = self.inner.write();
        inner.roots.push(Some(RootSlot {
            target,
            system,
            kind,
            description: description.into(),
        }));
        RootId(inner.roots.len() as u64 - 1)
    }

    pub fn set_root(&self, root: RootId, target: Option<ObjectRef>) -> Result<(), SpaceError> {
        let mut inner = self.inner.write();
        let slot = inner
            .roots
            .get_mut(root.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(SpaceError::NoSuchRoot(root))?;
        slot.target = target;
        Ok(())
    }

    pub fn remove_root(&self, root: RootId) -> Result<(), SpaceError> {
        let mut inner = self.inner.write();
        inner
            .roots
            .get_mut(root.0 as usize)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(SpaceError::NoSuchRoot(root))
    }

    // ── statistics ─────────────────────────────────────────────────

    pub fn contains(&self, object: ObjectRef) -> bool {
        self.inner.read().objects.contains_key(&object)
    }

    pub fn object_count(&self) -> usize {
        self.inner.read().objects.len()
    }

    /// Bytes held by objects that have not been reclaimed.
    pub fn used_bytes(&self) -> usize {
        self.inner.read().used
    }
}
