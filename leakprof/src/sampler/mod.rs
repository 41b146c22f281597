//! Size-weighted reservoir of allocation samples.
//!
//! Every allocation offered to the sampler is accounted for: it is either
//! kept as a sample, or its bytes are folded into the span of the next sample
//! that is kept. Samples with the smallest span are evicted first, so large
//! allocations (and long stretches of small ones) are the ones that survive.

mod list;
mod pool;
mod queue;
mod sample;

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard};

pub use sample::{ObjectSample, SampleId, StackTraceId, ThreadId};

use crate::{ObjectRef, WeakReferenceRegistry};
use list::SampleList;
use pool::SamplePool;
use queue::SamplePriorityQueue;

/// What happened to an allocation offered to the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Kept; the cache had room.
    Admitted,
    /// Kept after evicting the sample with the smallest span.
    Evicted { span: u64 },
    /// Not kept; its bytes stay unattributed.
    Rejected,
    /// Another thread held the sampler; the allocation was not counted.
    Contended,
    /// The sampler has no capacity.
    Disabled,
}

// ── Cache ─────────────────────────────────────────────────────────────

/// The sampler's state. Only reachable through [`ObjectSampler`], which
/// serializes access to it.
#[derive(Debug)]
pub struct SampleCache {
    pool: SamplePool,
    list: SampleList,
    queue: SamplePriorityQueue,
    capacity: usize,
    total_allocated: u64,
}

impl SampleCache {
    fn new(capacity: usize) -> Self {
        Self {
            pool: SamplePool::new(capacity),
            list: SampleList::default(),
            queue: SamplePriorityQueue::with_capacity(capacity),
            capacity,
            total_allocated: 0,
        }
    }

    fn add(
        &mut self,
        registry: &dyn WeakReferenceRegistry,
        object: ObjectRef,
        allocated: u64,
        thread: ThreadId,
        stack_trace: Option<StackTraceId>,
    ) -> SampleOutcome {
        if self.capacity == 0 {
            return SampleOutcome::Disabled;
        }
        self.total_allocated += allocated;

        let mut outcome = SampleOutcome::Admitted;
        if self.queue.count() == self.capacity {
            let current_span = self.total_allocated - self.queue.total();
            let Some(min) = self.queue.peek() else {
                return SampleOutcome::Rejected;
            };
            if current_span <= self.pool.get(min).span {
                trace!("rejected {object:?}: span {current_span} too small");
                return SampleOutcome::Rejected;
            }
            let evicted = self.remove(registry, min);
            outcome = SampleOutcome::Evicted { span: evicted.span };
        }

        // computed after eviction so the evicted span moves to the newcomer
        let span = self.total_allocated - self.queue.total();
        let handle = registry.register(object);
        let id = self.pool.acquire(ObjectSample::new(
            handle,
            span,
            allocated,
            thread,
            stack_trace,
            Instant::now(),
        ));
        self.list.link(&mut self.pool, id);
        self.queue.push(&mut self.pool, id);
        trace!("sampled {object:?} with span {span} ({outcome:?})");
        outcome
    }

    fn remove(
        &mut self,
        registry: &dyn WeakReferenceRegistry,
        id: SampleId,
    ) -> ObjectSample {
        self.queue.remove(&mut self.pool, id);
        self.list.unlink(&mut self.pool, id);
        let sample = self.pool.release(id);
        registry.release(sample.handle);
        sample
    }

    /// Drops every sample whose object has died.
    ///
    /// A dead sample's span is merged into the next newer sample, whose
    /// interval starts where the dead one's ended. The newest sample has no
    /// such neighbour; its span becomes unattributed and goes to the next
    /// admitted sample.
    fn scavenge(&mut self, registry: &dyn WeakReferenceRegistry) -> usize {
        let mut removed = 0;
        let mut cursor = self.list.head();
        while let Some(id) = cursor {
            let (handle, newer, older, span) = {
                let sample = self.pool.get(id);
                (sample.handle, sample.prev, sample.next, sample.span)
            };
            cursor = older;
            if !registry.is_dead(handle) {
                continue;
            }
            if let Some(newer) = newer {
                self.queue.remove(&mut self.pool, newer);
                self.pool.get_mut(newer).span += span;
                self.queue.push(&mut self.pool, newer);
            }
            self.remove(registry, id);
            removed += 1;
        }
        if removed > 0 {
            debug!("scavenged {removed} dead samples, {} left", self.count());
        }
        removed
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.list.count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Bytes offered to the sampler since it was created.
    #[inline]
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Sum of the spans of all retained samples.
    #[inline]
    pub fn attributed(&self) -> u64 {
        self.queue.total()
    }

    /// Bytes not (yet) represented by any sample.
    #[inline]
    pub fn unattributed(&self) -> u64 {
        self.total_allocated - self.queue.total()
    }

    /// Samples, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectSample> + '_ {
        self.list.iter(&self.pool).map(|id| self.pool.get(id))
    }

    /// Samples in eviction order: smallest span first.
    pub fn iter_by_priority(&self) -> impl Iterator<Item = &ObjectSample> + '_ {
        let mut ids = self.queue.ids().to_vec();
        ids.sort_unstable_by_key(|&id| (self.pool.get(id).span, id));
        ids.into_iter().map(|id| self.pool.get(id))
    }

    /// The next sample to be evicted.
    pub fn peek(&self) -> Option<&ObjectSample> {
        self.queue.peek().map(|id| self.pool.get(id))
    }

    pub fn get(&self, id: SampleId) -> Option<&ObjectSample> {
        self.pool.try_get(id)
    }
}

// ── Thread-safe front ─────────────────────────────────────────────────

/// Shared entry point for allocating threads.
///
/// [`add`](Self::add) never blocks: if another thread is inside the sampler
/// the allocation is skipped. Death notifications only raise a flag; the
/// cleanup happens on the next successful `add` or when a session locks
/// the sampler.
pub struct ObjectSampler {
    cache: Mutex<SampleCache>,
    registry: Arc<dyn WeakReferenceRegistry>,
    capacity: usize,
    dead_samples: AtomicBool,
    contended: AtomicU64,
    epoch: Instant,
    /// Nanoseconds after `epoch`; 0 until the first collection.
    last_sweep: AtomicU64,
}

impl ObjectSampler {
    pub fn new(capacity: usize, registry: Arc<dyn WeakReferenceRegistry>) -> Self {
        Self {
            cache: Mutex::new(SampleCache::new(capacity)),
            registry,
            capacity,
            dead_samples: AtomicBool::new(false),
            contended: AtomicU64::new(0),
            epoch: Instant::now(),
            last_sweep: AtomicU64::new(0),
        }
    }

    pub fn add(
        &self,
        object: ObjectRef,
        allocated: u64,
        thread: ThreadId,
    ) -> SampleOutcome {
        self.add_with_stack_trace(object, allocated, thread, None)
    }

    pub fn add_with_stack_trace(
        &self,
        object: ObjectRef,
        allocated: u64,
        thread: ThreadId,
        stack_trace: Option<StackTraceId>,
    ) -> SampleOutcome {
        if self.capacity == 0 {
            return SampleOutcome::Disabled;
        }
        let Some(mut cache) = self.cache.try_lock() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            trace!("sampler busy, dropped {object:?}");
            return SampleOutcome::Contended;
        };
        if self.dead_samples.swap(false, Ordering::AcqRel) {
            cache.scavenge(&*self.registry);
        }
        cache.add(&*self.registry, object, allocated, thread, stack_trace)
    }

    /// Called by the collector after it cleared weak references to sampled
    /// objects.
    pub fn notify_dead_samples(&self) {
        self.dead_samples.store(true, Ordering::Release);
    }

    /// Records the end of a collection. Samples allocated before the most
    /// recent one are old-object candidates.
    pub fn gc_completed(&self) {
        let nanos = self.epoch.elapsed().as_nanos().max(1);
        self.last_sweep
            .store(u64::try_from(nanos).unwrap_or(u64::MAX), Ordering::Release);
    }

    pub fn last_sweep(&self) -> Option<Instant> {
        match self.last_sweep.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(self.epoch + Duration::from_nanos(nanos)),
        }
    }

    /// Allocations skipped because the sampler was busy.
    pub fn contended(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn registry(&self) -> &dyn WeakReferenceRegistry {
        &*self.registry
    }

    /// Exclusive access for a session. Blocks; concurrent `add`s are
    /// dropped until the guard goes away.
    pub fn lock(&self) -> SamplerGuard<'_> {
        SamplerGuard {
            cache: self.cache.lock(),
            sampler: self,
        }
    }
}

impl std::fmt::Debug for ObjectSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSampler")
            .field("capacity", &self.capacity)
            .field("contended", &self.contended())
            .field("last_sweep", &self.last_sweep())
            .finish_non_exhaustive()
    }
}

pub struct SamplerGuard<'s> {
    cache: MutexGuard<'s, SampleCache>,
    sampler: &'s ObjectSampler,
}

impl SamplerGuard<'_> {
    /// Removes dead samples now instead of on the next `add`.
    pub fn scavenge(&mut self) -> usize {
        self.sampler.dead_samples.store(false, Ordering::Release);
        self.cache.scavenge(&*self.sampler.registry)
    }

    pub fn registry(&self) -> &dyn WeakReferenceRegistry {
        &*self.sampler.registry
    }
}

impl Deref for SamplerGuard<'_> {
    type Target = SampleCache;

    fn deref(&self) -> &SampleCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestRegistry, obj};

    const T: ThreadId = ThreadId(1);

    fn sampler(capacity: usize) -> (ObjectSampler, Arc<TestRegistry>) {
        let registry = Arc::new(TestRegistry::default());
        (ObjectSampler::new(capacity, registry.clone()), registry)
    }

    fn spans(sampler: &ObjectSampler) -> Vec<u64> {
        sampler.lock().iter().map(ObjectSample::span).collect()
    }

    #[test]
    fn evicted_span_moves_to_newcomer() {
        let (sampler, registry) = sampler(2);
        assert_eq!(sampler.add(obj(1), 10, T), SampleOutcome::Admitted);
        assert_eq!(sampler.add(obj(2), 20, T), SampleOutcome::Admitted);
        assert_eq!(
            sampler.add(obj(3), 30, T),
            SampleOutcome::Evicted { span: 10 }
        );

        assert_eq!(spans(&sampler), vec![40, 20]);
        let cache = sampler.lock();
        assert_eq!(cache.attributed(), 60);
        assert_eq!(cache.unattributed(), 0);
        assert_eq!(registry.live_handles(), 2);
    }

    #[test]
    fn small_allocation_is_rejected_when_full() {
        let (sampler, _) = sampler(2);
        sampler.add(obj(1), 10, T);
        sampler.add(obj(2), 20, T);
        assert_eq!(sampler.add(obj(3), 5, T), SampleOutcome::Rejected);

        let cache = sampler.lock();
        assert_eq!(cache.count(), 2);
        assert_eq!(cache.total_allocated(), 35);
        assert_eq!(cache.unattributed(), 5);
    }

    #[test]
    fn rejected_bytes_are_absorbed_later() {
        let (sampler, _) = sampler(2);
        sampler.add(obj(1), 10, T);
        sampler.add(obj(2), 20, T);
        assert_eq!(sampler.add(obj(3), 5, T), SampleOutcome::Rejected);
        assert_eq!(sampler.add(obj(4), 4, T), SampleOutcome::Rejected);
        // 5 + 4 + 2 unattributed > 10, so the 10 is evicted
        assert_eq!(
            sampler.add(obj(5), 2, T),
            SampleOutcome::Evicted { span: 10 }
        );
        assert_eq!(spans(&sampler), vec![21, 20]);
    }

    #[test]
    fn zero_capacity_is_a_no_op() {
        let (sampler, registry) = sampler(0);
        assert_eq!(sampler.add(obj(1), 100, T), SampleOutcome::Disabled);
        let cache = sampler.lock();
        assert!(cache.is_empty());
        assert_eq!(cache.total_allocated(), 0);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn zero_sized_allocations_only_fill_free_slots() {
        let (sampler, _) = sampler(2);
        assert_eq!(sampler.add(obj(1), 0, T), SampleOutcome::Admitted);
        assert_eq!(sampler.add(obj(2), 0, T), SampleOutcome::Admitted);
        assert_eq!(sampler.add(obj(3), 0, T), SampleOutcome::Rejected);
        assert_eq!(spans(&sampler), vec![0, 0]);
    }

    #[test]
    fn busy_sampler_drops_allocations() {
        let (sampler, _) = sampler(4);
        let guard = sampler.lock();
        assert_eq!(sampler.add(obj(1), 8, T), SampleOutcome::Contended);
        assert_eq!(sampler.contended(), 1);
        drop(guard);

        assert_eq!(sampler.add(obj(2), 8, T), SampleOutcome::Admitted);
        assert_eq!(sampler.lock().total_allocated(), 8);
    }

    #[test]
    fn dead_span_merges_into_newer_neighbour() {
        let (sampler, registry) = sampler(4);
        sampler.add(obj(1), 10, T);
        sampler.add(obj(2), 20, T);
        sampler.add(obj(3), 30, T);

        registry.kill(obj(2));
        sampler.notify_dead_samples();
        // the next add scavenges first
        sampler.add(obj(4), 40, T);

        assert_eq!(spans(&sampler), vec![40, 50, 10]);
        let cache = sampler.lock();
        assert_eq!(cache.attributed(), 100);
        assert_eq!(cache.total_allocated(), 100);
        assert_eq!(registry.live_handles(), 3);
    }

    #[test]
    fn dead_newest_sample_returns_span_to_pool() {
        let (sampler, registry) = sampler(4);
        sampler.add(obj(1), 10, T);
        sampler.add(obj(2), 20, T);
        registry.kill(obj(2));

        let mut cache = sampler.lock();
        assert_eq!(cache.scavenge(), 1);
        assert_eq!(cache.attributed(), 10);
        assert_eq!(cache.unattributed(), 20);
        drop(cache);

        sampler.add(obj(3), 1, T);
        assert_eq!(spans(&sampler), vec![21, 10]);
    }

    #[test]
    fn scavenge_without_deaths_keeps_everything() {
        let (sampler, _) = sampler(3);
        for i in 1..=3 {
            sampler.add(obj(i), i as u64, T);
        }
        assert_eq!(sampler.lock().scavenge(), 0);
        assert_eq!(spans(&sampler), vec![3, 2, 1]);
    }

    #[test]
    fn priority_order_is_ascending_span() {
        let (sampler, _) = sampler(4);
        for (i, size) in [30u64, 10, 40, 20].into_iter().enumerate() {
            sampler.add(obj(i + 1), size, T);
        }
        let cache = sampler.lock();
        let ordered: Vec<_> = cache.iter_by_priority().map(ObjectSample::span).collect();
        assert_eq!(ordered, vec![10, 20, 30, 40]);
        assert_eq!(cache.peek().map(ObjectSample::span), Some(10));
    }

    #[test]
    fn retained_spans_dominate_evicted_ones() {
        let (sampler, _) = sampler(8);
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut max_evicted = 0;
        let mut total = 0;

        for i in 0..2_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let size = state % 512;
            total += size;

            let outcome = sampler.add(obj(i + 1), size, T);
            if let SampleOutcome::Evicted { span } = outcome {
                max_evicted = max_evicted.max(span);
            }
            if matches!(outcome, SampleOutcome::Admitted | SampleOutcome::Evicted { .. }) {
                assert_eq!(sampler.lock().attributed(), total);
            }
        }

        let cache = sampler.lock();
        assert_eq!(cache.count(), 8);
        assert_eq!(cache.total_allocated(), total);
        let min_retained = cache.iter().map(ObjectSample::span).min().unwrap();
        assert!(min_retained >= max_evicted);
    }

    #[test]
    fn last_sweep_is_recorded() {
        let (sampler, _) = sampler(1);
        assert!(sampler.last_sweep().is_none());
        sampler.add(obj(1), 1, T);
        sampler.gc_completed();
        let sweep = sampler.last_sweep().unwrap();
        assert!(sampler.lock().iter().all(|s| s.is_older_than(sweep)));
    }
}
