use super::{SampleId, pool::SamplePool};

/// Intrusive doubly linked list of in-use samples, newest first.
///
/// The links live in the samples themselves, so the list only keeps the two
/// ends. A sample's `prev` is the next newer one.
#[derive(Debug, Default)]
pub(crate) struct SampleList {
    head: Option<SampleId>,
    tail: Option<SampleId>,
    count: usize,
}

impl SampleList {
    /// Links `id` in as the newest sample.
    pub(crate) fn link(&mut self, pool: &mut SamplePool, id: SampleId) {
        {
            let sample = pool.get_mut(id);
            debug_assert!(sample.prev.is_none() && sample.next.is_none());
            sample.next = self.head;
        }
        match self.head {
            Some(head) => pool.get_mut(head).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.count += 1;
    }

    pub(crate) fn unlink(&mut self, pool: &mut SamplePool, id: SampleId) {
        let (prev, next) = {
            let sample = pool.get_mut(id);
            (sample.prev.take(), sample.next.take())
        };
        match prev {
            Some(prev) => pool.get_mut(prev).next = next,
            None => {
                debug_assert_eq!(self.head, Some(id), "unlinking foreign sample");
                self.head = next;
            }
        }
        match next {
            Some(next) => pool.get_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.count -= 1;
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<SampleId> {
        self.head
    }

    #[cfg(test)]
    #[inline]
    pub(crate) fn tail(&self) -> Option<SampleId> {
        self.tail
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn iter<'p>(&self, pool: &'p SamplePool) -> ListIter<'p> {
        ListIter {
            pool,
            current: self.head,
        }
    }
}

pub(crate) struct ListIter<'p> {
    pool: &'p SamplePool,
    current: Option<SampleId>,
}

impl Iterator for ListIter<'_> {
    type Item = SampleId;

    fn next(&mut self) -> Option<SampleId> {
        let id = self.current?;
        self.current = self.pool.get(id).next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{ObjectSample, ThreadId, WeakHandle};

    fn push(pool: &mut SamplePool, list: &mut SampleList, tag: u64) -> SampleId {
        let id = pool.acquire(ObjectSample::new(
            WeakHandle(tag),
            tag,
            tag,
            ThreadId(0),
            None,
            Instant::now(),
        ));
        list.link(pool, id);
        id
    }

    fn tags(pool: &SamplePool, list: &SampleList) -> Vec<u64> {
        list.iter(pool).map(|id| pool.get(id).span).collect()
    }

    #[test]
    fn link_prepends() {
        let mut pool = SamplePool::new(4);
        let mut list = SampleList::default();
        let a = push(&mut pool, &mut list, 1);
        push(&mut pool, &mut list, 2);
        let c = push(&mut pool, &mut list, 3);

        assert_eq!(tags(&pool, &list), vec![3, 2, 1]);
        assert_eq!(list.head(), Some(c));
        assert_eq!(list.tail(), Some(a));
        assert_eq!(list.count(), 3);
    }

    #[test]
    fn unlink_middle_head_and_tail() {
        let mut pool = SamplePool::new(4);
        let mut list = SampleList::default();
        let a = push(&mut pool, &mut list, 1);
        let b = push(&mut pool, &mut list, 2);
        let c = push(&mut pool, &mut list, 3);

        list.unlink(&mut pool, b);
        assert_eq!(tags(&pool, &list), vec![3, 1]);
        assert_eq!(pool.get(a).prev, Some(c));

        list.unlink(&mut pool, c);
        assert_eq!(tags(&pool, &list), vec![1]);
        assert_eq!(list.head(), Some(a));

        list.unlink(&mut pool, a);
        assert!(list.head().is_none());
        assert!(list.tail().is_none());
        assert_eq!(list.count(), 0);
    }
}
