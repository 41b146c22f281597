use std::time::{Duration, Instant};

use log::{info, warn};

use crate::{
    Edge, EdgeId, EdgeStore, Emitter, EventEmitter, LeakCandidateMarker,
    LeakError, LeakSettings, ObjectRef, ObjectSample, ObjectSampler,
    PathToGcRoots, Reference, ReferenceIterator, RootEnumerator, SampleMarker,
    SamplerGuard, SearchStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Samples written to the emitter.
    pub samples: usize,
    /// Samples a chain to a root was found for.
    pub chains: usize,
    /// Stored edges written to the emitter.
    pub edges: usize,
    pub stats: SearchStats,
    pub elapsed: Duration,
}

/// One leak-profiling snapshot: collects the old samples, searches for
/// their paths to gc roots and writes everything out.
///
/// The caller must keep the object graph stable for the whole `run`, i.e.
/// hold whatever the host uses as a safepoint.
pub struct SamplingSession<'s> {
    sampler: &'s ObjectSampler,
    settings: &'s LeakSettings,
}

impl<'s> SamplingSession<'s> {
    pub fn new(
        sampler: &'s ObjectSampler,
        settings: &'s LeakSettings,
    ) -> Result<Self, LeakError> {
        settings.checked()?;
        Ok(Self { sampler, settings })
    }

    pub fn run<V>(&self, view: &V, emitter: &mut dyn Emitter) -> SessionSummary
    where
        V: RootEnumerator + ReferenceIterator,
    {
        let started = Instant::now();
        let mut sampler = self.sampler.lock();
        sampler.scavenge();

        let candidates = self.candidates(&sampler, view);
        let mut marker = SampleMarker::new();
        for &(object, _) in &candidates {
            marker.mark_sampled(object);
        }

        let new_store =
            || EdgeStore::new(self.settings.leak_context, self.settings.root_context);
        let mut store = new_store();
        let search = PathToGcRoots::new(view, view, self.settings);
        let stats = match search.find(&mut marker, &mut store) {
            Ok(stats) => stats,
            Err(err) => {
                warn!("path-to-gc-roots search aborted: {err}");
                // drop whatever the pass stored before it failed
                store = new_store();
                marker.clear_all();
                SearchStats {
                    aborted: true,
                    ..Default::default()
                }
            }
        };

        let mut chains = 0;
        let edges: Vec<EdgeId> = candidates
            .iter()
            .map(|(object, sample)| match marker.leak_context(*object) {
                Some(edge) => {
                    chains += 1;
                    edge
                }
                None => store.put_top_level(Edge::new(
                    Reference::Sample(sample.handle()),
                    *object,
                )),
            })
            .collect();

        let writer = EventEmitter::new(&store, view, view);
        for ((object, sample), edge) in candidates.iter().zip(edges) {
            writer.write_sample(sample, *object, edge, emitter);
        }
        let edge_count = writer.write_references(emitter);
        marker.clear_all();
        drop(sampler);

        let summary = SessionSummary {
            samples: candidates.len(),
            chains,
            edges: edge_count,
            stats,
            elapsed: started.elapsed(),
        };
        info!(
            "leak profile: {} samples, {} with chains, {} edges in {:?}",
            summary.samples, summary.chains, summary.edges, summary.elapsed
        );
        summary
    }

    /// Live samples old enough to be reported, newest first.
    fn candidates(
        &self,
        sampler: &SamplerGuard<'_>,
        graph: &dyn ReferenceIterator,
    ) -> Vec<(ObjectRef, ObjectSample)> {
        let last_sweep = self.sampler.last_sweep();
        sampler
            .iter()
            .filter(|sample| {
                self.settings.emit_all
                    || last_sweep.is_some_and(|sweep| sample.is_older_than(sweep))
            })
            .filter_map(|sample| {
                let object = sampler.registry().resolve(sample.handle())?;
                graph.is_live(object).then(|| (object, sample.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        ReferenceContext, ReportCollector, ThreadId,
        testing::{TestGraph, TestRegistry},
    };

    const T: ThreadId = ThreadId(7);

    fn setup(capacity: usize) -> (ObjectSampler, Arc<TestRegistry>) {
        let registry = Arc::new(TestRegistry::default());
        (ObjectSampler::new(capacity, registry.clone()), registry)
    }

    #[test]
    fn reports_chained_and_unreachable_samples() {
        let mut graph = TestGraph::new();
        let (root, objects) = graph.chain(3);
        let orphan = graph.object();

        let (sampler, _) = setup(8);
        sampler.add(objects[2], 100, T);
        sampler.add(orphan, 50, T);
        sampler.gc_completed();

        let settings = LeakSettings::default();
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        let report = collector.into_report();

        assert_eq!(summary.samples, 2);
        assert_eq!(summary.chains, 1);
        assert_eq!(summary.edges, 4);
        assert!(!summary.stats.aborted);

        // newest first
        let unreachable = &report.samples[0];
        assert_eq!(unreachable.object, orphan);
        assert!(unreachable.root.is_none());
        let top = report.chain(unreachable);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].context, ReferenceContext::Sample);

        let leaked = &report.samples[1];
        assert_eq!(leaked.object, objects[2]);
        assert_eq!(leaked.span, 100);
        assert_eq!(leaked.root.as_ref().map(|r| r.id), Some(root));
        assert_eq!(report.chain(leaked).len(), 3);
        assert_eq!(report.distance_to_root(leaked), 2);
    }

    #[test]
    fn young_samples_need_emit_all() {
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(2);
        let (sampler, _) = setup(8);
        sampler.add(objects[1], 10, T);

        let settings = LeakSettings::default();
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        assert_eq!(summary.samples, 0);
        assert_eq!(summary.edges, 0);

        let settings = LeakSettings {
            emit_all: true,
            ..Default::default()
        };
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.chains, 1);
    }

    #[test]
    fn dead_samples_are_excluded() {
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(3);
        let (sampler, registry) = setup(8);
        sampler.add(objects[1], 10, T);
        sampler.add(objects[2], 10, T);
        sampler.gc_completed();

        // one cleared by the collector, one only reported dead by the view
        registry.kill(objects[1]);
        sampler.notify_dead_samples();
        graph.kill(objects[2]);

        let settings = LeakSettings::default();
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        assert_eq!(summary.samples, 0);
        assert_eq!(sampler.lock().count(), 1);
    }

    #[test]
    fn failed_search_still_reports_samples() {
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(3);
        let (sampler, _) = setup(8);
        sampler.add(objects[2], 10, T);
        sampler.gc_completed();

        let settings = LeakSettings {
            probe_stack_capacity: usize::MAX,
            ..Default::default()
        };
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        let report = collector.into_report();

        assert!(summary.stats.aborted);
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.chains, 0);
        assert_eq!(report.chain(&report.samples[0]).len(), 1);
    }

    #[test]
    fn empty_probe_stack_reports_samples_without_chains() {
        let mut graph = TestGraph::new();
        let (_, objects) = graph.chain(3);
        let (sampler, _) = setup(8);
        sampler.add(objects[1], 10, T);
        sampler.add(objects[2], 20, T);
        sampler.gc_completed();

        let settings = LeakSettings {
            probe_stack_capacity: 0,
            ..Default::default()
        };
        let mut collector = ReportCollector::new();
        let summary = SamplingSession::new(&sampler, &settings)
            .unwrap()
            .run(&graph, &mut collector);
        let report = collector.into_report();

        assert!(!summary.stats.aborted);
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.chains, 0);
        for sample in &report.samples {
            assert!(sample.root.is_none());
            let chain = report.chain(sample);
            assert_eq!(chain.len(), 1);
            assert_eq!(chain[0].context, ReferenceContext::Sample);
        }
    }

    #[test]
    fn invalid_settings_fail_up_front() {
        let (sampler, _) = setup(1);
        let settings = LeakSettings {
            leak_context: 0,
            ..Default::default()
        };
        assert!(matches!(
            SamplingSession::new(&sampler, &settings),
            Err(LeakError::InvalidSettings(_))
        ));
    }
}
