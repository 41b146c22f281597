use log::warn;

use super::{
    SearchContext,
    dfs::DepthFirstSearch,
    edge_queue::{EdgeQueue, QueuedEdge},
};
use crate::{Edge, LeakError, ObjectShape};

/// Breadth-first engine. Finds shortest chains while the edge queue has
/// room; once it fills up the rest of the graph is searched depth-first.
struct BreadthFirstSearch {
    queue: EdgeQueue,
    max_depth: usize,
    overflowed: bool,
}

pub(crate) fn find_leaks(ctx: &mut SearchContext<'_>) -> Result<(), LeakError> {
    let mut bfs = BreadthFirstSearch {
        queue: EdgeQueue::try_with_capacity(ctx.settings.edge_queue_capacity)?,
        max_depth: ctx.settings.max_dfs_depth,
        overflowed: false,
    };

    let dropped_roots = bfs.add_roots(ctx);
    let current = if bfs.overflowed {
        None
    } else {
        bfs.process_queue(ctx)
    };
    if bfs.overflowed {
        bfs.dfs_fallback(ctx, current, &dropped_roots)?;
    }
    Ok(())
}

impl BreadthFirstSearch {
    /// Returns the root edges that did not fit into the queue.
    fn add_roots(&mut self, ctx: &mut SearchContext<'_>) -> Vec<Edge> {
        let mut dropped = Vec::new();
        let roots = ctx.roots;
        roots.for_each_root(&mut |root, target| {
            let Some(target) = target else {
                return;
            };
            ctx.stats.roots += 1;
            let edge = Edge::root(root, target);
            if !self.add(ctx, edge, None, 0) {
                dropped.push(edge);
            }
        });
        dropped
    }

    /// Expands queued edges frontier by frontier. Returns the entry being
    /// expanded when the queue overflowed.
    fn process_queue(&mut self, ctx: &mut SearchContext<'_>) -> Option<usize> {
        while let Some(index) = self.queue.remove() {
            if ctx.timer.is_finished() {
                ctx.stats.timed_out = true;
                return None;
            }
            self.expand(ctx, index);
            if self.overflowed {
                return Some(index);
            }
        }
        None
    }

    fn expand(&mut self, ctx: &mut SearchContext<'_>, index: usize) {
        let QueuedEdge { edge, depth, .. } = *self.queue.get(index);
        let object = edge.pointee;
        let graph = ctx.graph;
        match graph.shape(object) {
            ObjectShape::Leaf => {}
            ObjectShape::Instance => {
                graph.for_each_outgoing_reference(object, &mut |reference, target| {
                    if let Some(target) = target {
                        self.add(ctx, Edge::new(reference, target), Some(index), depth + 1);
                    }
                });
            }
            ObjectShape::ObjectArray { length } => {
                let chunk = ctx.settings.array_chunk_size;
                let mut begin = 0;
                while begin < length {
                    let end = begin.saturating_add(chunk).min(length);
                    graph.for_each_outgoing_reference_range(
                        object,
                        begin,
                        end,
                        &mut |reference, target| {
                            if let Some(target) = target {
                                self.add(
                                    ctx,
                                    Edge::new(reference, target),
                                    Some(index),
                                    depth + 1,
                                );
                            }
                        },
                    );
                    begin = end;
                }
            }
        }
    }

    /// Marks and checks the pointee of `edge` and queues it for expansion.
    /// Returns `false` if the edge was dropped because the queue is full;
    /// dropped edges stay unmarked so the fallback can still reach them.
    fn add(
        &mut self,
        ctx: &mut SearchContext<'_>,
        edge: Edge,
        parent: Option<usize>,
        depth: usize,
    ) -> bool {
        let object = edge.pointee;
        if ctx.mark_bits.is_marked(object) || !ctx.graph.is_live(object) {
            return true;
        }
        let expand = depth + 1 < self.max_depth;
        if expand && (self.overflowed || self.queue.is_full()) {
            ctx.stats.edge_queue_full += 1;
            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    "edge queue full, continuing depth-first from {} queued edges",
                    self.queue.remaining().len()
                );
            }
            return false;
        }

        ctx.mark_bits.mark(object);
        ctx.stats.objects_visited += 1;
        if ctx.marker.is_sampled(object) {
            let mut path = parent.map(|p| self.queue.ancestry(p)).unwrap_or_default();
            path.push(edge);
            ctx.record_chain(&path);
        }
        if expand {
            self.queue.add(edge, parent, depth);
        } else {
            ctx.stats.max_depth_reached += 1;
        }
        true
    }

    /// Continues depth-first from the partially expanded entry, every entry
    /// still queued, and every root that did not fit.
    fn dfs_fallback(
        &self,
        ctx: &mut SearchContext<'_>,
        current: Option<usize>,
        dropped_roots: &[Edge],
    ) -> Result<(), LeakError> {
        let remaining = self.queue.remaining();
        ctx.stats.dfs_fallbacks +=
            usize::from(current.is_some()) + remaining.len() + dropped_roots.len();

        let mut dfs = DepthFirstSearch::new(ctx)?;
        for index in current.into_iter().chain(remaining) {
            let entry = self.queue.get(index);
            let prefix = entry
                .parent
                .map(|p| self.queue.ancestry(p))
                .unwrap_or_default();
            dfs.search_from(&prefix, entry.edge);
        }
        for &root in dropped_roots {
            dfs.search_from(&[], root);
        }
        Ok(())
    }
}
