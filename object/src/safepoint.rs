use leakprof::{
    HeapRegion, ObjectDescription, ObjectRef, ObjectShape, Reference,
    ReferenceIterator, RootEnumerator, RootId, RootInfo,
};
use parking_lot::RwLockReadGuard;

use crate::{
    ObjectSpace,
    space::{Body, SpaceInner},
};

/// A stable view of an [`ObjectSpace`].
///
/// Holds the space's lock shared: allocation, mutation and collection all
/// wait until the safepoint is dropped. Allocating threads never block the
/// sampler, so a session can run while holding one.
pub struct Safepoint<'a> {
    inner: RwLockReadGuard<'a, SpaceInner>,
    region: HeapRegion,
}

impl ObjectSpace {
    pub fn safepoint(&self) -> Safepoint<'_> {
        Safepoint {
            inner: self.inner.read(),
            region: self.region(),
        }
    }
}

impl RootEnumerator for Safepoint<'_> {
    fn for_each_root(&self, visitor: &mut dyn FnMut(RootId, Option<ObjectRef>)) {
        for (index, slot) in self.inner.roots.iter().enumerate() {
            if let Some(slot) = slot {
                visitor(RootId(index as u64), slot.target);
            }
        }
    }

    fn describe_root(&self, root: RootId) -> RootInfo {
        match self.inner.roots.get(root.0 as usize) {
            Some(Some(slot)) => RootInfo {
                id: root,
                system: slot.system,
                kind: slot.kind,
                description: Some(slot.description.clone()),
            },
            _ => RootInfo::unknown(root),
        }
    }
}

impl ReferenceIterator for Safepoint<'_> {
    fn region(&self) -> HeapRegion {
        self.region
    }

    fn shape(&self, object: ObjectRef) -> ObjectShape {
        match self.inner.objects.get(&object).map(|o| &o.body) {
            Some(Body::Instance { fields, .. }) if !fields.is_empty() => ObjectShape::Instance,
            Some(Body::ObjectArray(elements)) => ObjectShape::ObjectArray {
                length: elements.len(),
            },
            _ => ObjectShape::Leaf,
        }
    }

    fn for_each_outgoing_reference(
        &self,
        object: ObjectRef,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    ) {
        let Some(found) = self.inner.objects.get(&object) else {
            return;
        };
        match &found.body {
            Body::Instance { fields, .. } => {
                for (index, target) in fields.iter().enumerate() {
                    let reference = Reference::Field {
                        holder: object,
                        index: index as u32,
                    };
                    visitor(reference, *target);
                }
            }
            Body::ObjectArray(elements) => {
                self.for_each_outgoing_reference_range(object, 0, elements.len(), visitor)
            }
            Body::Bytes(_) | Body::Str(_) => {}
        }
    }

    fn for_each_outgoing_reference_range(
        &self,
        object: ObjectRef,
        begin: usize,
        end: usize,
        visitor: &mut dyn FnMut(Reference, Option<ObjectRef>),
    ) {
        let Some(Body::ObjectArray(elements)) =
            self.inner.objects.get(&object).map(|o| &o.body)
        else {
            return;
        };
        let end = end.min(elements.len());
        for (offset, target) in elements[begin.min(end)..end].iter().enumerate() {
            let reference = Reference::Element {
                holder: object,
                index: (begin + offset) as u32,
            };
            visitor(reference, *target);
        }
    }

    fn is_live(&self, object: ObjectRef) -> bool {
        self.inner.objects.contains_key(&object)
    }

    fn describe_object(&self, object: ObjectRef) -> Option<ObjectDescription> {
        let found = self.inner.objects.get(&object)?;
        let (type_name, detail) = match &found.body {
            Body::Instance { class, .. } => (
                self.inner
                    .class(*class)
                    .map_or_else(|| "<unknown class>".to_string(), |c| c.name().to_string()),
                None,
            ),
            Body::ObjectArray(elements) => {
                ("Object[]".to_string(), Some(format!("length {}", elements.len())))
            }
            Body::Bytes(length) => ("byte[]".to_string(), Some(format!("length {length}"))),
            Body::Str(value) => {
                let mut preview: String = value.chars().take(32).collect();
                if preview.len() < value.len() {
                    preview.push_str("...");
                }
                ("String".to_string(), Some(format!("{preview:?}")))
            }
        };
        let age = found.header.age();
        let detail = match detail {
            Some(detail) => Some(format!("{detail}, age {age}")),
            None => Some(format!("age {age}")),
        };
        Some(ObjectDescription {
            type_name,
            size: found.header.size(),
            detail,
        })
    }

    fn field_name(&self, holder: ObjectRef, index: u32) -> Option<String> {
        let Body::Instance { class, .. } = &self.inner.objects.get(&holder)?.body else {
            return None;
        };
        self.inner
            .class(*class)?
            .field_name(index as usize)
            .map(str::to_string)
    }
}
