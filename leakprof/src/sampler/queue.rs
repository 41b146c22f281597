use super::{SampleId, pool::SamplePool, sample::NOT_QUEUED};

/// Binary min-heap of samples ordered by span.
///
/// Every sample records its own heap position so arbitrary samples can be
/// removed in O(log n). The running `total` is the sum of all queued spans.
#[derive(Debug, Default)]
pub(crate) struct SamplePriorityQueue {
    heap: Vec<SampleId>,
    total: u64,
}

impl SamplePriorityQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            total: 0,
        }
    }

    pub(crate) fn push(&mut self, pool: &mut SamplePool, id: SampleId) {
        debug_assert_eq!(pool.get(id).queue_index, NOT_QUEUED, "already queued");
        let idx = self.heap.len();
        self.heap.push(id);
        pool.get_mut(id).queue_index = idx;
        self.total += pool.get(id).span;
        self.sift_up(pool, idx);
    }

    #[cfg(test)]
    pub(crate) fn pop(&mut self, pool: &mut SamplePool) -> Option<SampleId> {
        let top = *self.heap.first()?;
        self.remove(pool, top);
        Some(top)
    }

    #[inline]
    pub(crate) fn peek(&self) -> Option<SampleId> {
        self.heap.first().copied()
    }

    pub(crate) fn remove(&mut self, pool: &mut SamplePool, id: SampleId) {
        let idx = pool.get(id).queue_index;
        debug_assert!(idx < self.heap.len() && self.heap[idx] == id, "not queued");
        let last = self.heap.len() - 1;
        self.swap(pool, idx, last);
        self.heap.pop();
        {
            let sample = pool.get_mut(id);
            sample.queue_index = NOT_QUEUED;
            self.total -= sample.span;
        }
        if idx < self.heap.len() {
            self.sift_down(pool, idx);
            self.sift_up(pool, idx);
        }
    }

    #[inline]
    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn ids(&self) -> &[SampleId] {
        &self.heap
    }

    // ── heap maintenance ──────────────────────────────────────────────

    #[inline]
    fn less(pool: &SamplePool, a: SampleId, b: SampleId) -> bool {
        // ties broken by slot so the order is deterministic
        (pool.get(a).span, a) < (pool.get(b).span, b)
    }

    fn swap(&mut self, pool: &mut SamplePool, i: usize, j: usize) {
        self.heap.swap(i, j);
        pool.get_mut(self.heap[i]).queue_index = i;
        pool.get_mut(self.heap[j]).queue_index = j;
    }

    fn sift_up(&mut self, pool: &mut SamplePool, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !Self::less(pool, self.heap[idx], self.heap[parent]) {
                break;
            }
            self.swap(pool, idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, pool: &mut SamplePool, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = idx * 2 + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && Self::less(pool, self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < len && Self::less(pool, self.heap[right], self.heap[smallest])
            {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap(pool, idx, smallest);
            idx = smallest;
        }
    }
}
