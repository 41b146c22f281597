//! A small simulated managed heap for driving the leak profiler.
//!
//! Objects are instances with named reference fields, reference arrays,
//! byte arrays and strings. Addresses are bump allocated from a fixed range
//! and never move; the collector is a plain mark and sweep. Every
//! allocation is offered to an attached [`leakprof::ObjectSampler`], and a
//! [`Safepoint`] exposes the graph to the leak search.

mod class;
mod collector;
mod header;
mod safepoint;
mod space;
mod weak;

pub use class::{Class, ClassId};
pub use collector::CollectionStats;
pub use header::{Header, HeaderFlags, ObjectType};
pub use safepoint::Safepoint;
pub use space::{AllocSite, OBJECT_ALIGNMENT, ObjectSpace, SpaceError, SpaceSettings};
pub use weak::WeakTable;
