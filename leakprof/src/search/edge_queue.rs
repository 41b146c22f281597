use std::ops::Range;

use crate::{Edge, LeakError};

#[derive(Debug, Clone, Copy)]
pub(super) struct QueuedEdge {
    pub(super) edge: Edge,
    /// Index of the edge this one was discovered from. `None` for roots.
    pub(super) parent: Option<usize>,
    pub(super) depth: usize,
}

/// Bump-allocated FIFO of discovered edges.
///
/// Entries are never reused: a dequeued edge stays in place so later edges
/// can walk their parent indices back to the root.
#[derive(Debug)]
pub(super) struct EdgeQueue {
    edges: Vec<QueuedEdge>,
    head: usize,
    capacity: usize,
}

impl EdgeQueue {
    pub(super) fn try_with_capacity(capacity: usize) -> Result<Self, LeakError> {
        let mut edges = Vec::new();
        edges
            .try_reserve_exact(capacity)
            .map_err(|_| LeakError::out_of_memory::<QueuedEdge>("edge queue", capacity))?;
        Ok(Self {
            edges,
            head: 0,
            capacity,
        })
    }

    /// Returns the new entry's index, or `None` if the queue is full.
    pub(super) fn add(
        &mut self,
        edge: Edge,
        parent: Option<usize>,
        depth: usize,
    ) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.edges.push(QueuedEdge {
            edge,
            parent,
            depth,
        });
        Some(self.edges.len() - 1)
    }

    /// Dequeues the next entry, leaving it in place.
    pub(super) fn remove(&mut self) -> Option<usize> {
        if self.head == self.edges.len() {
            return None;
        }
        self.head += 1;
        Some(self.head - 1)
    }

    #[inline]
    pub(super) fn get(&self, index: usize) -> &QueuedEdge {
        &self.edges[index]
    }

    #[inline]
    pub(super) fn is_full(&self) -> bool {
        self.edges.len() >= self.capacity
    }

    /// Indices that were enqueued but not dequeued yet.
    pub(super) fn remaining(&self) -> Range<usize> {
        self.head..self.edges.len()
    }

    /// The path from the root to entry `index`, root first.
    pub(super) fn ancestry(&self, index: usize) -> Vec<Edge> {
        let mut path = Vec::with_capacity(self.edges[index].depth + 1);
        let mut current = Some(index);
        while let Some(idx) = current {
            let entry = &self.edges[idx];
            path.push(entry.edge);
            current = entry.parent;
        }
        path.reverse();
        path
    }
}
