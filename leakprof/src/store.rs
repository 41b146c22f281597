//! Deduplicated storage for reference chains.
//!
//! A chain found by the search can be thousands of edges long. Only the
//! `leak_context` edges nearest the candidate and the `root_context` edges
//! nearest the root are kept; everything in between collapses into a single
//! *skip* link that remembers how many hops it stands for. Edges are keyed
//! by their reference slot, so chains that share a suffix share storage.

use ahash::AHashMap;

use crate::{Edge, EdgeId, LeakCandidateMarker, Reference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEdge {
    id: EdgeId,
    edge: Edge,
    parent: Option<EdgeId>,
    gc_root_id: Option<EdgeId>,
    skip_length: usize,
}

impl StoredEdge {
    #[inline]
    pub fn id(&self) -> EdgeId {
        self.id
    }

    #[inline]
    pub fn edge(&self) -> &Edge {
        &self.edge
    }

    #[inline]
    pub fn reference(&self) -> &Reference {
        &self.edge.reference
    }

    /// The next edge towards the root.
    #[inline]
    pub fn parent(&self) -> Option<EdgeId> {
        self.parent
    }

    /// Cached root of the chain. Only set on root edges and on the
    /// leak-context edge of each chain.
    #[inline]
    pub fn gc_root_id(&self) -> Option<EdgeId> {
        self.gc_root_id
    }

    /// Hops elided between this edge and its parent, in addition to the
    /// link itself.
    #[inline]
    pub fn skip_length(&self) -> usize {
        self.skip_length
    }

    #[inline]
    pub fn is_skip_edge(&self) -> bool {
        self.skip_length > 0
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.edge.reference.is_root()
    }
}

#[derive(Debug)]
pub struct EdgeStore {
    edges: Vec<StoredEdge>,
    index: AHashMap<Reference, EdgeId>,
    leak_context: usize,
    root_context: usize,
}

impl EdgeStore {
    pub fn new(leak_context: usize, root_context: usize) -> Self {
        debug_assert!(leak_context > 0 && root_context > 0);
        Self {
            edges: Vec::new(),
            index: AHashMap::new(),
            leak_context: leak_context.max(1),
            root_context: root_context.max(1),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn get(&self, reference: &Reference) -> Option<EdgeId> {
        self.index.get(reference).copied()
    }

    #[inline]
    pub fn edge(&self, id: EdgeId) -> Option<&StoredEdge> {
        self.edges.get(id.index())
    }

    /// Stored edges in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StoredEdge> + '_ {
        self.edges.iter()
    }

    pub fn get_or_put(&mut self, edge: &Edge) -> EdgeId {
        self.insert(edge).0
    }

    /// Registers a parentless edge for a sample no chain reached.
    pub fn put_top_level(&mut self, edge: Edge) -> EdgeId {
        self.get_or_put(&edge)
    }

    /// Stores `chain` (leak edge first, root edge last) and tags the leaked
    /// object with its leak-context edge.
    ///
    /// Returns the leak-context edge.
    pub fn put_chain(
        &mut self,
        chain: &[Edge],
        marker: &mut dyn LeakCandidateMarker,
    ) -> Option<EdgeId> {
        let (leak, ancestors) = chain.split_first()?;
        let (leak_id, created) = self.insert(leak);
        marker.associate(leak.pointee, leak_id);

        let rooted = chain.last().is_some_and(|e| e.reference.is_root());
        if !rooted {
            // Nothing to anchor the chain to; the leak edge is its own root.
            if created {
                self.at_mut(leak_id).gc_root_id = Some(leak_id);
            }
            return Some(leak_id);
        }
        if created {
            self.link_ancestors(leak_id, chain.len() - 1, ancestors);
        }

        let root = self.root_of(leak_id);
        if self.at(root).edge.reference.is_root() {
            self.at_mut(root).gc_root_id = Some(root);
            self.at_mut(leak_id).gc_root_id = Some(root);
        }
        Some(leak_id)
    }

    /// `ancestors[i]` sits at distance `distance - 1 - i` from the root.
    fn link_ancestors(&mut self, leak_id: EdgeId, distance: usize, ancestors: &[Edge]) {
        let mut current = leak_id;
        let mut pos = 0;

        // leak context: the edges nearest the candidate
        let context = (self.leak_context - 1).min(ancestors.len());
        while pos < context {
            let (id, created) = self.insert(&ancestors[pos]);
            self.at_mut(current).parent = Some(id);
            if !created {
                return;
            }
            current = id;
            pos += 1;
        }
        if pos == ancestors.len() {
            return;
        }

        // root context, with a skip over the middle if the rest is too long
        let first_unstored = distance - 1 - pos;
        if first_unstored > self.root_context {
            let skip = first_unstored - (self.root_context - 1);
            self.at_mut(current).skip_length = skip;
            pos += skip;
        }
        while pos < ancestors.len() {
            let (id, created) = self.insert(&ancestors[pos]);
            self.at_mut(current).parent = Some(id);
            if !created {
                return;
            }
            current = id;
            pos += 1;
        }
    }

    /// Walks parent links to the top of `id`'s chain.
    pub fn root_of(&self, id: EdgeId) -> EdgeId {
        let mut current = id;
        while let Some(parent) = self.at(current).parent {
            current = parent;
        }
        current
    }

    /// True length of the path from the root to `id`, counting every hop a
    /// skip link stands for.
    pub fn distance_to_root(&self, id: EdgeId) -> usize {
        let mut distance = 0;
        let mut current = self.at(id);
        while let Some(parent) = current.parent {
            distance += 1 + current.skip_length;
            current = self.at(parent);
        }
        distance
    }

    fn insert(&mut self, edge: &Edge) -> (EdgeId, bool) {
        if let Some(&id) = self.index.get(&edge.reference) {
            debug_assert_eq!(self.at(id).edge.pointee, edge.pointee);
            return (id, false);
        }
        let id = EdgeId::from_index(self.edges.len());
        self.edges.push(StoredEdge {
            id,
            edge: *edge,
            parent: None,
            gc_root_id: None,
            skip_length: 0,
        });
        self.index.insert(edge.reference, id);
        (id, true)
    }

    #[inline(always)]
    fn at(&self, id: EdgeId) -> &StoredEdge {
        &self.edges[id.index()]
    }

    #[inline(always)]
    fn at_mut(&mut self, id: EdgeId) -> &mut StoredEdge {
        &mut self.edges[id.index()]
    }
}
