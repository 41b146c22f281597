use log::warn;

use super::SearchContext;
use crate::{Edge, LeakError, ObjectRef, ObjectShape};

#[derive(Debug, Clone, Copy)]
struct ProbeItem {
    edge: Edge,
    depth: u32,
    /// 0 for an unvisited object. For a partially visited object array,
    /// the first element index still to be pushed.
    chunk: u32,
}

/// Depth-first engine with a fixed-capacity probe stack.
///
/// The current path is kept separately from the stack: an item popped at
/// depth `d` truncates the path to `d` entries and appends its own edge, so
/// the path always reads root first when a candidate is found.
pub(crate) struct DepthFirstSearch<'c, 'a> {
    ctx: &'c mut SearchContext<'a>,
    stack: Vec<ProbeItem>,
    capacity: usize,
    path: Vec<Edge>,
    max_depth: usize,
    /// Items at this depth are expanded even if their object is marked.
    revisit_depth: Option<usize>,
    warned: bool,
}

pub(crate) fn find_leaks(ctx: &mut SearchContext<'_>) -> Result<(), LeakError> {
    let mut dfs = DepthFirstSearch::new(ctx)?;
    // mark and check everything directly reachable from a root first, so
    // no candidate gets a chain through another root's subgraph
    dfs.run_roots(1, None);
    let max_depth = dfs.ctx.settings.max_dfs_depth;
    dfs.run_roots(max_depth, Some(0));
    Ok(())
}

impl<'c, 'a> DepthFirstSearch<'c, 'a> {
    pub(crate) fn new(ctx: &'c mut SearchContext<'a>) -> Result<Self, LeakError> {
        let capacity = ctx.settings.probe_stack_capacity;
        let mut stack = Vec::new();
        stack
            .try_reserve_exact(capacity)
            .map_err(|_| LeakError::out_of_memory::<ProbeItem>("probe stack", capacity))?;

        let max_depth = ctx.settings.max_dfs_depth;
        let mut path = Vec::new();
        path.try_reserve_exact(max_depth)
            .map_err(|_| LeakError::out_of_memory::<Edge>("path buffer", max_depth))?;

        Ok(Self {
            ctx,
            stack,
            capacity,
            path,
            max_depth,
            revisit_depth: None,
            warned: false,
        })
    }

    fn run_roots(&mut self, max_depth: usize, revisit_depth: Option<usize>) {
        self.max_depth = max_depth;
        self.revisit_depth = revisit_depth;
        let first_phase = revisit_depth.is_none();
        let roots = self.ctx.roots;
        roots.for_each_root(&mut |root, target| {
            let Some(target) = target else {
                return;
            };
            if first_phase {
                self.ctx.stats.roots += 1;
            }
            self.start(&[], Edge::root(root, target));
        });
    }

    /// Searches below `edge`, whose ancestors (root first) are `prefix`.
    /// `edge`'s own object may already be marked.
    pub(crate) fn search_from(&mut self, prefix: &[Edge], edge: Edge) {
        self.max_depth = self.ctx.settings.max_dfs_depth;
        self.revisit_depth = Some(prefix.len());
        self.start(prefix, edge);
    }

    fn start(&mut self, prefix: &[Edge], edge: Edge) {
        if self.ctx.timer.expired() {
            return;
        }
        self.path.clear();
        self.path.extend_from_slice(prefix);
        self.push(edge, prefix.len());
        self.drain();
    }

    fn drain(&mut self) {
        while let Some(item) = self.stack.pop() {
            if self.ctx.timer.is_finished() {
                self.ctx.stats.timed_out = true;
                self.stack.clear();
                return;
            }
            let depth = item.depth as usize;
            self.path.truncate(depth);
            self.path.push(item.edge);
            let object = item.edge.pointee;

            if item.chunk > 0 {
                self.push_array_chunk(object, item.chunk as usize, depth);
                continue;
            }
            if !self.ctx.graph.is_live(object) {
                continue;
            }
            let newly_marked = self.ctx.mark_bits.mark(object);
            if !newly_marked && self.revisit_depth != Some(depth) {
                continue;
            }
            if newly_marked {
                self.ctx.stats.objects_visited += 1;
            }
            if self.ctx.marker.is_sampled(object) {
                self.ctx.record_chain(&self.path);
            }

            if depth + 1 >= self.max_depth {
                if self.max_depth > 1 {
                    self.ctx.stats.max_depth_reached += 1;
                }
                continue;
            }
            self.push_children(object, depth);
        }
    }

    fn push_children(&mut self, object: ObjectRef, depth: usize) {
        let graph = self.ctx.graph;
        match graph.shape(object) {
            ObjectShape::Leaf => {}
            ObjectShape::Instance => {
                graph.for_each_outgoing_reference(object, &mut |reference, target| {
                    if let Some(target) = target {
                        self.push(Edge::new(reference, target), depth + 1);
                    }
                });
            }
            ObjectShape::ObjectArray { .. } => self.push_array_chunk(object, 0, depth),
        }
    }

    /// Pushes elements `begin..begin + chunk` of `array` (sitting at
    /// `depth`), preceded by a continuation for the rest.
    fn push_array_chunk(&mut self, array: ObjectRef, begin: usize, depth: usize) {
        let graph = self.ctx.graph;
        let ObjectShape::ObjectArray { length } = graph.shape(array) else {
            return;
        };
        let end = begin
            .saturating_add(self.ctx.settings.array_chunk_size)
            .min(length);
        if end < length {
            let item = ProbeItem {
                edge: self.path[depth],
                depth: depth as u32,
                chunk: end as u32,
            };
            if self.stack.len() < self.capacity {
                self.stack.push(item);
            } else {
                self.stack_full();
            }
        }
        graph.for_each_outgoing_reference_range(array, begin, end, &mut |reference, target| {
            if let Some(target) = target {
                self.push(Edge::new(reference, target), depth + 1);
            }
        });
    }

    fn push(&mut self, edge: Edge, depth: usize) {
        let revisit = self.revisit_depth == Some(depth);
        if !revisit && self.ctx.mark_bits.is_marked(edge.pointee) {
            return;
        }
        if self.stack.len() >= self.capacity {
            self.stack_full();
            return;
        }
        self.stack.push(ProbeItem {
            edge,
            depth: depth as u32,
            chunk: 0,
        });
    }

    fn stack_full(&mut self) {
        self.ctx.stats.probe_stack_full += 1;
        if !self.warned {
            self.warned = true;
            warn!(
                "probe stack full ({} entries), some paths will not be explored",
                self.capacity
            );
        }
    }
}
