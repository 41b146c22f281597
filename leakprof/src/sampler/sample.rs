use std::time::Instant;

use crate::WeakHandle;

/// Index of a sample inside the sampler's pool. Stable while the sample is
/// in use, reused after it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackTraceId(pub u64);

pub(crate) const NOT_QUEUED: usize = usize::MAX;

/// One retained allocation observation.
///
/// `span` is the number of bytes this sample stands for: everything
/// allocated since the previous surviving sample, plus whatever was merged
/// into it when neighbours were evicted or died.
#[derive(Debug, Clone)]
pub struct ObjectSample {
    pub(crate) handle: WeakHandle,
    pub(crate) span: u64,
    pub(crate) allocated: u64,
    pub(crate) allocation_time: Instant,
    pub(crate) thread: ThreadId,
    pub(crate) stack_trace: Option<StackTraceId>,
    // newer neighbour
    pub(crate) prev: Option<SampleId>,
    // older neighbour
    pub(crate) next: Option<SampleId>,
    pub(crate) queue_index: usize,
}

impl ObjectSample {
    pub(crate) fn new(
        handle: WeakHandle,
        span: u64,
        allocated: u64,
        thread: ThreadId,
        stack_trace: Option<StackTraceId>,
        allocation_time: Instant,
    ) -> Self {
        Self {
            handle,
            span,
            allocated,
            allocation_time,
            thread,
            stack_trace,
            prev: None,
            next: None,
            queue_index: NOT_QUEUED,
        }
    }

    #[inline]
    pub fn handle(&self) -> WeakHandle {
        self.handle
    }

    #[inline]
    pub fn span(&self) -> u64 {
        self.span
    }

    /// Size of the sampled allocation itself.
    #[inline]
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    #[inline]
    pub fn allocation_time(&self) -> Instant {
        self.allocation_time
    }

    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    #[inline]
    pub fn stack_trace(&self) -> Option<StackTraceId> {
        self.stack_trace
    }

    #[inline]
    pub fn is_older_than(&self, time: Instant) -> bool {
        self.allocation_time < time
    }
}
