//! Visited marks for one search pass.
//!
//! One bit per alignment unit of the heap region. References outside the
//! region (permanent objects, foreign memory) go to a small overflow set so
//! marking stays total.

use ahash::AHashSet;

use crate::{LeakError, ObjectRef};

/// Contiguous address range covered by a [`BitSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    pub start: usize,
    pub end: usize,
    /// log2 of the minimum object alignment; one bit covers `1 << shift`
    /// bytes.
    pub alignment_shift: u32,
}

impl HeapRegion {
    pub fn new(start: usize, size: usize, alignment: usize) -> Self {
        debug_assert!(alignment.is_power_of_two(), "alignment must be 2^n");
        Self {
            start,
            end: start + size,
            alignment_shift: alignment.trailing_zeros(),
        }
    }

    #[inline(always)]
    pub fn contains(&self, object: ObjectRef) -> bool {
        (self.start..self.end).contains(&object.addr())
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    #[inline(always)]
    fn bit_count(&self) -> usize {
        self.size() >> self.alignment_shift
    }

    #[inline(always)]
    fn bit_index(&self, object: ObjectRef) -> usize {
        (object.addr() - self.start) >> self.alignment_shift
    }
}

#[derive(Debug)]
pub struct BitSet {
    region: HeapRegion,
    words: Box<[u64]>,
    overflow: AHashSet<ObjectRef>,
    marked: usize,
}

impl BitSet {
    /// Reserves a cleared bitmap for `region`.
    ///
    /// Fails instead of aborting when the backing memory is not available.
    pub fn try_new(region: HeapRegion) -> Result<Self, LeakError> {
        let word_count = region.bit_count().div_ceil(64);
        let mut words: Vec<u64> = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| LeakError::out_of_memory::<u64>("mark bits", word_count))?;
        words.resize(word_count, 0);

        Ok(Self {
            region,
            words: words.into_boxed_slice(),
            overflow: AHashSet::new(),
            marked: 0,
        })
    }

    #[inline]
    pub fn region(&self) -> HeapRegion {
        self.region
    }

    /// Marks `object`. Returns `true` if it was not marked before.
    #[inline]
    pub fn mark(&mut self, object: ObjectRef) -> bool {
        let newly = if self.region.contains(object) {
            let idx = self.region.bit_index(object);
            let (word, bit) = (idx / 64, idx % 64);
            let mask = 1u64 << bit;
            let old = self.words[word];
            self.words[word] = old | mask;
            old & mask == 0
        } else {
            self.overflow.insert(object)
        };
        if newly {
            self.marked += 1;
        }
        newly
    }

    #[inline]
    pub fn is_marked(&self, object: ObjectRef) -> bool {
        if self.region.contains(object) {
            let idx = self.region.bit_index(object);
            self.words[idx / 64] & (1u64 << (idx % 64)) != 0
        } else {
            self.overflow.contains(&object)
        }
    }

    /// Number of distinct objects marked since creation or the last clear.
    #[inline]
    pub fn count(&self) -> usize {
        self.marked
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
        self.overflow.clear();
        self.marked = 0;
    }
}
