//! Old-object leak diagnostics.
//!
//! Keeps a bounded, size-weighted sample of allocated objects and, on demand,
//! finds a reference chain from a GC root to every sample that is still
//! alive. Chains are compressed into a shared edge store so the emitted
//! output stays bounded no matter how deep the real path is.
//!
//! This crate is decoupled from any specific VM. Consumers provide:
//! - A [`RootEnumerator`] to supply roots while the graph is stable.
//! - A [`ReferenceIterator`] to enumerate outgoing references of objects.
//! - A [`WeakReferenceRegistry`] that holds the sampler's weak references.

mod bitset;
mod edge;
mod emitter;
mod error;
mod host;
mod marker;
mod sampler;
mod search;
mod session;
mod settings;
mod store;
mod timer;

#[cfg(test)]
mod testing;

pub use bitset::{BitSet, HeapRegion};
pub use edge::{Edge, EdgeId, ObjectRef, Reference};
pub use emitter::{
    Emitter, EventEmitter, LeakReport, ReferenceContext, ReferenceRecord,
    ReportCollector, SampleRecord,
};
pub use error::LeakError;
pub use host::{
    ObjectDescription, ObjectShape, ReferenceIterator, RootEnumerator, RootId,
    RootInfo, RootKind, RootSystem, WeakHandle, WeakReferenceRegistry,
};
pub use marker::{LeakCandidateMarker, SampleMarker};
pub use sampler::{
    ObjectSample, ObjectSampler, SampleCache, SampleId, SampleOutcome,
    SamplerGuard, StackTraceId, ThreadId,
};
pub use search::{PathToGcRoots, SearchStats, SearchStrategy};
pub use session::{SamplingSession, SessionSummary};
pub use settings::LeakSettings;
pub use store::{EdgeStore, StoredEdge};
pub use timer::GranularTimer;
