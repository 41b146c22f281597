use super::{ObjectSample, SampleId};

/// Fixed-capacity arena the samples live in.
///
/// Slots are handed out with [`acquire`](Self::acquire) and returned with
/// [`release`](Self::release); a released slot is reused before the arena
/// grows, so at most `capacity` slots are ever allocated.
#[derive(Debug)]
pub(crate) struct SamplePool {
    slots: Vec<Option<ObjectSample>>,
    free: Vec<SampleId>,
    capacity: usize,
}

impl SamplePool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
        }
    }

    pub(crate) fn acquire(&mut self, sample: ObjectSample) -> SampleId {
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.0 as usize];
            debug_assert!(slot.is_none(), "free slot still occupied");
            *slot = Some(sample);
            return id;
        }
        assert!(self.slots.len() < self.capacity, "Sample pool exhausted");
        let id = SampleId(self.slots.len() as u32);
        self.slots.push(Some(sample));
        id
    }

    pub(crate) fn release(&mut self, id: SampleId) -> ObjectSample {
        let sample = self.slots[id.0 as usize]
            .take()
            .expect("released sample must be in use");
        self.free.push(id);
        sample
    }

    #[inline]
    pub(crate) fn get(&self, id: SampleId) -> &ObjectSample {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("sample must be in use")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: SampleId) -> &mut ObjectSample {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("sample must be in use")
    }

    #[inline]
    pub(crate) fn try_get(&self, id: SampleId) -> Option<&ObjectSample> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub(crate) fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{ThreadId, WeakHandle};

    fn sample(span: u64) -> ObjectSample {
        ObjectSample::new(WeakHandle(span), span, span, ThreadId(1), None, Instant::now())
    }

    #[test]
    fn released_slots_are_reused_first() {
        let mut pool = SamplePool::new(2);
        let a = pool.acquire(sample(1));
        let b = pool.acquire(sample(2));
        assert_eq!(pool.in_use(), 2);

        assert_eq!(pool.release(a).span, 1);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.try_get(a).is_none());

        let c = pool.acquire(sample(3));
        assert_eq!(c, a);
        assert_eq!(pool.get(c).span, 3);
        assert_eq!(pool.get(b).span, 2);
    }

    #[test]
    #[should_panic(expected = "Sample pool exhausted")]
    fn acquiring_past_capacity_panics() {
        let mut pool = SamplePool::new(1);
        pool.acquire(sample(1));
        pool.acquire(sample(2));
    }
}
