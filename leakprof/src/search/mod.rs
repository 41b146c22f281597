//! Path-to-gc-roots search over a stable object graph.

mod bfs;
mod dfs;
mod edge_queue;

use log::debug;

use crate::{
    BitSet, Edge, EdgeStore, GranularTimer, LeakCandidateMarker, LeakError,
    LeakSettings, ReferenceIterator, RootEnumerator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Bounded depth-first search. Small fixed memory footprint.
    #[default]
    DepthFirst,
    /// Breadth-first search over a bounded edge queue, finding shorter
    /// chains. Switches to depth-first when the queue fills.
    BreadthFirst,
}

/// Counters for one search pass. None of these are errors; they describe
/// how much of the graph the pass could see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub roots: usize,
    pub objects_visited: usize,
    pub chains_found: usize,
    /// Objects whose children were not explored because of the depth limit.
    pub max_depth_reached: usize,
    /// Pushes dropped because the probe stack was full.
    pub probe_stack_full: usize,
    /// Edges not enqueued because the edge queue was full.
    pub edge_queue_full: usize,
    /// Depth-first searches started after the edge queue filled.
    pub dfs_fallbacks: usize,
    pub timed_out: bool,
    /// The pass failed before it could run.
    pub aborted: bool,
}

/// State shared by all engines of one pass.
pub(crate) struct SearchContext<'a> {
    pub(crate) roots: &'a dyn RootEnumerator,
    pub(crate) graph: &'a dyn ReferenceIterator,
    pub(crate) marker: &'a mut dyn LeakCandidateMarker,
    pub(crate) store: &'a mut EdgeStore,
    pub(crate) settings: &'a LeakSettings,
    pub(crate) mark_bits: BitSet,
    pub(crate) timer: GranularTimer,
    pub(crate) stats: SearchStats,
}

impl SearchContext<'_> {
    /// Stores `path_root_first` as a chain for the candidate at its end.
    pub(crate) fn record_chain(&mut self, path_root_first: &[Edge]) {
        let chain: Vec<Edge> = path_root_first.iter().rev().copied().collect();
        if self.store.put_chain(&chain, &mut *self.marker).is_some() {
            self.stats.chains_found += 1;
        }
    }
}

/// Finds reference chains from GC roots to every marked leak candidate.
pub struct PathToGcRoots<'a> {
    roots: &'a dyn RootEnumerator,
    graph: &'a dyn ReferenceIterator,
    settings: &'a LeakSettings,
}

impl<'a> PathToGcRoots<'a> {
    pub fn new(
        roots: &'a dyn RootEnumerator,
        graph: &'a dyn ReferenceIterator,
        settings: &'a LeakSettings,
    ) -> Self {
        Self {
            roots,
            graph,
            settings,
        }
    }

    /// Runs one pass. Every candidate the pass reaches is associated with
    /// its leak-context edge in `marker`.
    pub fn find(
        &self,
        marker: &mut dyn LeakCandidateMarker,
        store: &mut EdgeStore,
    ) -> Result<SearchStats, LeakError> {
        let settings = self.settings.checked()?;
        let mut ctx = SearchContext {
            roots: self.roots,
            graph: self.graph,
            marker,
            store,
            settings,
            mark_bits: BitSet::try_new(self.graph.region())?,
            timer: GranularTimer::start(
                settings.time_budget,
                settings.timer_granularity,
            ),
            stats: SearchStats::default(),
        };

        match settings.strategy {
            SearchStrategy::DepthFirst => dfs::find_leaks(&mut ctx)?,
            SearchStrategy::BreadthFirst => bfs::find_leaks(&mut ctx)?,
        }

        let stats = ctx.stats;
        debug!(
            "{:?} pass: {} roots, {} objects, {} chains, {} edges stored",
            settings.strategy,
            stats.roots,
            stats.objects_visited,
            stats.chains_found,
            ctx.store.len()
        );
        if stats.max_depth_reached + stats.probe_stack_full + stats.edge_queue_full > 0 {
            debug!(
                "pass truncated: depth limit {}, probe stack full {}, edge queue full {}, dfs fallbacks {}",
                stats.max_depth_reached,
                stats.probe_stack_full,
                stats.edge_queue_full,
                stats.dfs_fallbacks
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{SampleMarker, testing::TestGraph};

    fn run(
        graph: &TestGraph,
        settings: &LeakSettings,
        marker: &mut SampleMarker,
    ) -> (EdgeStore, SearchStats) {
        let mut store = EdgeStore::new(settings.leak_context, settings.root_context);
        let stats = PathToGcRoots::new(graph, graph, settings)
            .find(marker, &mut store)
            .unwrap();
        (store, stats)
    }

    fn both_strategies() -> [LeakSettings; 2] {
        [
            LeakSettings::default(),
            LeakSettings {
                strategy: SearchStrategy::BreadthFirst,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn finds_chain_through_cycle() {
        for settings in both_strategies() {
            let mut graph = TestGraph::new();
            let (_, objects) = graph.chain(4);
            // back edge closing a cycle
            graph.link(objects[3], objects[1]);
            let leaked = graph.object();
            graph.link(objects[2], leaked);

            let mut marker = SampleMarker::new();
            marker.mark_sampled(leaked);
            let (store, stats) = run(&graph, &settings, &mut marker);

            assert_eq!(stats.chains_found, 1);
            let leak = marker.leak_context(leaked).unwrap();
            assert_eq!(store.distance_to_root(leak), 3);
            assert_eq!(stats.objects_visited, 5);
        }
    }

    #[test]
    fn sampled_root_object_gets_single_edge_chain() {
        for settings in both_strategies() {
            let mut graph = TestGraph::new();
            let leaked = graph.object();
            let root = graph.root(leaked);

            let mut marker = SampleMarker::new();
            marker.mark_sampled(leaked);
            let (store, _) = run(&graph, &settings, &mut marker);

            let leak = marker.leak_context(leaked).unwrap();
            let stored = store.edge(leak).unwrap();
            assert!(stored.is_root());
            assert_eq!(store.get(&crate::Reference::Root(root)), Some(leak));
        }
    }

    #[test]
    fn unreachable_candidates_get_no_chain() {
        for settings in both_strategies() {
            let mut graph = TestGraph::new();
            graph.chain(3);
            graph.empty_root();
            let orphan = graph.object();

            let mut marker = SampleMarker::new();
            marker.mark_sampled(orphan);
            let (store, stats) = run(&graph, &settings, &mut marker);

            assert!(marker.leak_context(orphan).is_none());
            assert!(store.is_empty());
            assert_eq!(stats.chains_found, 0);
            assert_eq!(stats.roots, 1);
        }
    }

    #[test]
    fn dead_objects_are_not_traversed() {
        for settings in both_strategies() {
            let mut graph = TestGraph::new();
            let (_, objects) = graph.chain(3);
            let leaked = graph.object();
            graph.link(objects[2], leaked);
            graph.kill(objects[1]);

            let mut marker = SampleMarker::new();
            marker.mark_sampled(leaked);
            let (_, stats) = run(&graph, &settings, &mut marker);
            assert_eq!(stats.chains_found, 0);
        }
    }

    #[test]
    fn depth_limit_cuts_long_chains() {
        for mut settings in both_strategies() {
            settings.max_dfs_depth = 4;
            let mut graph = TestGraph::new();
            let (_, objects) = graph.chain(10);

            let mut marker = SampleMarker::new();
            marker.mark_sampled(objects[3]);
            marker.mark_sampled(objects[9]);
            let (_, stats) = run(&graph, &settings, &mut marker);

            assert!(marker.leak_context(objects[3]).is_some());
            assert!(marker.leak_context(objects[9]).is_none());
            assert!(stats.max_depth_reached > 0);
        }
    }

    #[test]
    fn chunked_arrays_are_fully_visited() {
        for mut settings in both_strategies() {
            settings.array_chunk_size = 3;
            let mut graph = TestGraph::new();
            let array = graph.array(10);
            graph.root(array);
            let elements: Vec<_> = (0..10).map(|_| graph.object()).collect();
            for (i, &element) in elements.iter().enumerate() {
                graph.set_element(array, i, element);
            }

            let mut marker = SampleMarker::new();
            for &element in &elements {
                marker.mark_sampled(element);
            }
            let (store, stats) = run(&graph, &settings, &mut marker);

            assert_eq!(stats.chains_found, 10);
            for (i, &element) in elements.iter().enumerate() {
                let leak = marker.leak_context(element).unwrap();
                let stored = store.edge(leak).unwrap();
                assert_eq!(
                    *stored.reference(),
                    crate::Reference::Element {
                        holder: array,
                        index: i as u32
                    }
                );
                assert_eq!(store.distance_to_root(leak), 1);
            }
        }
    }

    #[test]
    fn chains_never_pass_through_another_roots_target() {
        for settings in both_strategies() {
            let mut graph = TestGraph::new();
            let (_, objects) = graph.chain(3);
            let shared = graph.object();
            graph.link(objects[2], shared);
            let leaked = graph.object();
            graph.link(shared, leaked);
            // enumerated after the longer path's root
            let near = graph.root(shared);

            let mut marker = SampleMarker::new();
            marker.mark_sampled(leaked);
            let (store, stats) = run(&graph, &settings, &mut marker);

            assert_eq!(stats.chains_found, 1);
            let leak = marker.leak_context(leaked).unwrap();
            let top = store.edge(store.root_of(leak)).unwrap();
            assert_eq!(*top.reference(), crate::Reference::Root(near));
            assert_eq!(store.distance_to_root(leak), 1);
        }
    }

    #[test]
    fn empty_probe_stack_finds_nothing() {
        let settings = LeakSettings {
            probe_stack_capacity: 0,
            ..Default::default()
        };
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(3);

        let mut marker = SampleMarker::new();
        marker.mark_sampled(objects[2]);
        let (store, stats) = run(&graph, &settings, &mut marker);

        assert_eq!(stats.chains_found, 0);
        assert!(stats.probe_stack_full > 0);
        assert!(store.is_empty());
    }

    #[test]
    fn small_probe_stack_degrades_gracefully() {
        let settings = LeakSettings {
            probe_stack_capacity: 2,
            ..Default::default()
        };
        let mut graph = TestGraph::new();
        let hub = graph.object();
        graph.root(hub);
        let children: Vec<_> = (0..8).map(|_| graph.object()).collect();
        for &child in &children {
            graph.link(hub, child);
        }

        let mut marker = SampleMarker::new();
        for &child in &children {
            marker.mark_sampled(child);
        }
        let (_, stats) = run(&graph, &settings, &mut marker);

        assert!(stats.probe_stack_full > 0);
        assert!(stats.chains_found < children.len());
    }

    #[test]
    fn expired_budget_stops_the_pass() {
        let settings = LeakSettings {
            time_budget: Some(Duration::ZERO),
            timer_granularity: 1,
            ..Default::default()
        };
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(50);

        let mut marker = SampleMarker::new();
        marker.mark_sampled(objects[49]);
        let (_, stats) = run(&graph, &settings, &mut marker);

        assert!(stats.timed_out);
        assert_eq!(stats.chains_found, 0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = LeakSettings {
            max_dfs_depth: 0,
            ..Default::default()
        };
        let graph = TestGraph::new();
        let mut marker = SampleMarker::new();
        let mut store = EdgeStore::new(1, 1);
        let err = PathToGcRoots::new(&graph, &graph, &settings)
            .find(&mut marker, &mut store)
            .unwrap_err();
        assert!(matches!(err, LeakError::InvalidSettings(_)));
    }

    #[test]
    fn small_edge_queue_falls_back_to_depth_first() {
        let settings = LeakSettings {
            strategy: SearchStrategy::BreadthFirst,
            edge_queue_capacity: 3,
            ..Default::default()
        };
        let mut graph = TestGraph::new();
        let hub = graph.object();
        graph.root(hub);
        let mut leaves = Vec::new();
        for _ in 0..6 {
            let middle = graph.object();
            graph.link(hub, middle);
            let leaf = graph.object();
            graph.link(middle, leaf);
            leaves.push(leaf);
        }

        let mut marker = SampleMarker::new();
        for &leaf in &leaves {
            marker.mark_sampled(leaf);
        }
        let (store, stats) = run(&graph, &settings, &mut marker);

        assert!(stats.edge_queue_full > 0);
        assert!(stats.dfs_fallbacks > 0);
        assert_eq!(stats.chains_found, leaves.len());
        for &leaf in &leaves {
            let leak = marker.leak_context(leaf).unwrap();
            assert_eq!(store.distance_to_root(leak), 2);
            assert!(store.edge(store.root_of(leak)).unwrap().is_root());
        }
    }
}
