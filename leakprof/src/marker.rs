use ahash::AHashMap;

use crate::{EdgeId, ObjectRef};

/// Per-object tag store used during a search pass.
///
/// Candidates start out *sampled*. Once a chain is stored for one, the tag
/// is replaced by its leak-context edge, which both answers
/// [`leak_context`](Self::leak_context) in O(1) and keeps the search from
/// recording a second chain for the same object.
pub trait LeakCandidateMarker {
    fn mark_sampled(&mut self, object: ObjectRef);

    fn is_sampled(&self, object: ObjectRef) -> bool;

    fn clear(&mut self, object: ObjectRef);

    fn associate(&mut self, object: ObjectRef, edge: EdgeId);

    fn leak_context(&self, object: ObjectRef) -> Option<EdgeId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Sampled,
    LeakContext(EdgeId),
}

/// Side-table marker keyed by object identity. Nothing is written into the
/// objects themselves, so dropping the table is the whole cleanup.
#[derive(Debug, Default)]
pub struct SampleMarker {
    tags: AHashMap<ObjectRef, Tag>,
}

impl SampleMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.tags.clear();
    }
}

impl LeakCandidateMarker for SampleMarker {
    fn mark_sampled(&mut self, object: ObjectRef) {
        self.tags.insert(object, Tag::Sampled);
    }

    #[inline]
    fn is_sampled(&self, object: ObjectRef) -> bool {
        self.tags.get(&object) == Some(&Tag::Sampled)
    }

    fn clear(&mut self, object: ObjectRef) {
        self.tags.remove(&object);
    }

    fn associate(&mut self, object: ObjectRef, edge: EdgeId) {
        self.tags.insert(object, Tag::LeakContext(edge));
    }

    fn leak_context(&self, object: ObjectRef) -> Option<EdgeId> {
        match self.tags.get(&object)? {
            Tag::LeakContext(edge) => Some(*edge),
            Tag::Sampled => None,
        }
    }
}
