//! Stop-the-world mark and sweep over an [`ObjectSpace`].

use leakprof::ObjectRef;
use log::debug;

use crate::{HeaderFlags, ObjectSpace, space::SpaceInner};

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub live: usize,
    pub freed: usize,
    pub freed_bytes: usize,
    /// Weak slots cleared because their referent was freed.
    pub weak_cleared: usize,
}

impl ObjectSpace {
    /// Reclaims every object not reachable from a root or a pinned object,
    /// then tells the attached sampler about it.
    ///
    /// Survivors age by one. Weak slots are cleared while the space is still
    /// locked, the sampler is notified after the lock is released.
    pub fn collect(&self) -> CollectionStats {
        let stats = {
            let mut inner = self.inner.write();
            mark(&mut inner);
            let mut stats = sweep(&mut inner);
            stats.weak_cleared = self
                .weak
                .clear_unreachable(|object| inner.objects.contains_key(&object));
            stats
        };

        if let Some(sampler) = self.sampler.get() {
            if stats.weak_cleared > 0 {
                sampler.notify_dead_samples();
            }
            sampler.gc_completed();
        }
        debug!(
            "gc: {} live, {} freed ({} bytes), {} weak slots cleared",
            stats.live, stats.freed, stats.freed_bytes, stats.weak_cleared
        );
        stats
    }
}

fn mark(inner: &mut SpaceInner) {
    let mut worklist: Vec<ObjectRef> = inner
        .roots
        .iter()
        .flatten()
        .filter_map(|slot| slot.target)
        .collect();
    worklist.extend(
        inner
            .objects
            .iter()
            .filter(|(_, o)| o.header.has_flag(HeaderFlags::PINNED))
            .map(|(&object, _)| object),
    );

    while let Some(object) = worklist.pop() {
        let Some(found) = inner.objects.get_mut(&object) else {
            continue;
        };
        if found.header.has_flag(HeaderFlags::MARKED) {
            continue;
        }
        found.header.add_flag(HeaderFlags::MARKED);
        if found.header.object_type().has_references() {
            worklist.extend(found.references().iter().flatten().copied());
        }
    }
}

fn sweep(inner: &mut SpaceInner) -> CollectionStats {
    let mut stats = CollectionStats::default();
    inner.objects.retain(|_, object| {
        if object.header.has_flag(HeaderFlags::MARKED) {
            object.header.remove_flag(HeaderFlags::MARKED);
            object.header.increment_age();
            stats.live += 1;
            true
        } else {
            stats.freed += 1;
            stats.freed_bytes += object.header.size();
            false
        }
    });
    inner.used -= stats.freed_bytes;
    stats
}
