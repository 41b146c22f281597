//! Turns the result of a session into report records.
//!
//! The wire format is the consumer's business: records are handed to an
//! [`Emitter`] one at a time. [`ReportCollector`] is the in-memory consumer
//! used by the CLI and the tests.

use std::time::{Duration, Instant};

use crate::{
    EdgeId, EdgeStore, ObjectDescription, ObjectRef, ObjectSample, ObjectShape,
    Reference, ReferenceIterator, RootEnumerator, RootInfo, StackTraceId,
    StoredEdge, ThreadId,
};

/// One old-object sample that survived to the session.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub object: ObjectRef,
    pub description: Option<ObjectDescription>,
    pub span: u64,
    pub allocated: u64,
    pub allocation_time: Instant,
    pub age: Duration,
    pub thread: ThreadId,
    pub stack_trace: Option<StackTraceId>,
    /// The sample's leak-context edge, or its top-level edge when no chain
    /// was found.
    pub edge: EdgeId,
    /// The root the chain starts at, if there is one.
    pub root: Option<RootInfo>,
}

/// Where a stored edge's reference lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceContext {
    Root(RootInfo),
    Field {
        holder: ObjectRef,
        index: u32,
        name: Option<String>,
    },
    Element {
        holder: ObjectRef,
        index: u32,
        length: Option<usize>,
    },
    /// The sampler's own slot; the sample was not reached from any root.
    Sample,
}

#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub id: EdgeId,
    pub parent: Option<EdgeId>,
    /// Hops elided between this edge and its parent.
    pub skip: usize,
    /// Root edge of the chain. Set on root edges and leak edges only.
    pub gc_root: Option<EdgeId>,
    pub pointee: ObjectRef,
    pub description: Option<ObjectDescription>,
    pub context: ReferenceContext,
}

pub trait Emitter {
    fn emit_sample(&mut self, record: &SampleRecord);

    fn emit_reference(&mut self, record: &ReferenceRecord);
}

/// Resolves samples and stored edges against the live graph and writes them.
pub struct EventEmitter<'a> {
    store: &'a EdgeStore,
    roots: &'a dyn RootEnumerator,
    graph: &'a dyn ReferenceIterator,
    now: Instant,
}

impl<'a> EventEmitter<'a> {
    pub fn new(
        store: &'a EdgeStore,
        roots: &'a dyn RootEnumerator,
        graph: &'a dyn ReferenceIterator,
    ) -> Self {
        Self {
            store,
            roots,
            graph,
            now: Instant::now(),
        }
    }

    pub fn write_sample(
        &self,
        sample: &ObjectSample,
        object: ObjectRef,
        edge: EdgeId,
        emitter: &mut dyn Emitter,
    ) {
        let root = self
            .store
            .edge(edge)
            .and_then(StoredEdge::gc_root_id)
            .and_then(|root| self.store.edge(root))
            .and_then(|root| match root.reference() {
                Reference::Root(id) => Some(self.roots.describe_root(*id)),
                _ => None,
            });

        emitter.emit_sample(&SampleRecord {
            object,
            description: self.graph.describe_object(object),
            span: sample.span(),
            allocated: sample.allocated(),
            allocation_time: sample.allocation_time(),
            age: self.now.saturating_duration_since(sample.allocation_time()),
            thread: sample.thread(),
            stack_trace: sample.stack_trace(),
            edge,
            root,
        });
    }

    /// Writes every stored edge in id order. Returns how many were written.
    pub fn write_references(&self, emitter: &mut dyn Emitter) -> usize {
        for stored in self.store.iter() {
            emitter.emit_reference(&self.reference_record(stored));
        }
        self.store.len()
    }

    fn reference_record(&self, stored: &StoredEdge) -> ReferenceRecord {
        let context = match *stored.reference() {
            Reference::Root(id) => ReferenceContext::Root(self.roots.describe_root(id)),
            Reference::Field { holder, index } => ReferenceContext::Field {
                holder,
                index,
                name: self.graph.field_name(holder, index),
            },
            Reference::Element { holder, index } => ReferenceContext::Element {
                holder,
                index,
                length: match self.graph.shape(holder) {
                    ObjectShape::ObjectArray { length } => Some(length),
                    _ => None,
                },
            },
            Reference::Sample(_) => ReferenceContext::Sample,
        };
        let pointee = stored.edge().pointee;
        ReferenceRecord {
            id: stored.id(),
            parent: stored.parent(),
            skip: stored.skip_length(),
            gc_root: stored.gc_root_id(),
            pointee,
            description: self.graph.describe_object(pointee),
            context,
        }
    }
}

// ── In-memory consumer ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ReportCollector {
    samples: Vec<SampleRecord>,
    references: Vec<ReferenceRecord>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_report(self) -> LeakReport {
        LeakReport {
            samples: self.samples,
            references: self.references,
        }
    }
}

impl Emitter for ReportCollector {
    fn emit_sample(&mut self, record: &SampleRecord) {
        self.samples.push(record.clone());
    }

    fn emit_reference(&mut self, record: &ReferenceRecord) {
        self.references.push(record.clone());
    }
}

#[derive(Debug, Default)]
pub struct LeakReport {
    pub samples: Vec<SampleRecord>,
    /// Sorted by id; ids are dense and start at 1.
    pub references: Vec<ReferenceRecord>,
}

impl LeakReport {
    pub fn reference(&self, id: EdgeId) -> Option<&ReferenceRecord> {
        let record = self.references.get(id.index())?;
        (record.id == id).then_some(record)
    }

    /// The stored part of `sample`'s chain, leak edge first.
    pub fn chain(&self, sample: &SampleRecord) -> Vec<&ReferenceRecord> {
        let mut chain = Vec::new();
        let mut current = Some(sample.edge);
        while let Some(id) = current {
            let Some(record) = self.reference(id) else {
                break;
            };
            chain.push(record);
            current = record.parent;
        }
        chain
    }

    /// True path length of `sample`'s chain, skipped hops included.
    pub fn distance_to_root(&self, sample: &SampleRecord) -> usize {
        let chain = self.chain(sample);
        chain
            .iter()
            .filter(|record| record.parent.is_some())
            .map(|record| 1 + record.skip)
            .sum()
    }
}
