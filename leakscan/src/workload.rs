//! A synthetic request-handling workload that leaks a fraction of its
//! requests into a global registry.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use leakprof::{ObjectRef, RootKind, RootSystem};
use log::{debug, info};
use object::{AllocSite, Class, ClassId, ObjectSpace, SpaceError};
use parking_lot::RwLock;

// stack trace ids handed to the sampler, one per allocation site
const SITE_REQUEST: u64 = 1;
const SITE_PAYLOAD: u64 = 2;
const SITE_NODE: u64 = 3;

#[derive(Debug, Clone)]
pub struct Workload {
    /// Requests handled per thread.
    pub objects: usize,
    /// Every this many requests one is leaked. 0 leaks nothing.
    pub leak_every: usize,
    /// Holder nodes between the registry and a leaked request.
    pub chain_length: usize,
    pub threads: usize,
    /// Each thread collects after this many requests. 0 never collects.
    pub collect_every: usize,
    /// Size of each request's byte payload.
    pub payload: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadStats {
    pub requests: usize,
    pub leaked: usize,
    pub collections: usize,
}

struct Classes {
    request: ClassId,
    node: ClassId,
}

pub fn run(space: &ObjectSpace, workload: &Workload) -> Result<WorkloadStats, SpaceError> {
    let classes = Classes {
        request: space.define_class(Class::new("Request", &["payload", "session"])),
        node: space.define_class(Class::new("Holder", &["next"])),
    };
    let slots = match workload.leak_every {
        0 => 0,
        // an overflowing count is turned down by the allocator
        every => workload
            .threads
            .checked_mul(workload.objects.div_ceil(every))
            .unwrap_or(usize::MAX),
    };
    let registry = space.alloc_array(slots, AllocSite::thread(0))?;
    space.add_root(
        RootSystem::Globals,
        RootKind::GlobalHandle,
        "static Registry.LEAKED",
        Some(registry),
    );
    info!(
        "running {} threads x {} requests, leaking every {}",
        workload.threads, workload.objects, workload.leak_every
    );

    let next_slot = AtomicUsize::new(0);
    // held shared while a request is half linked, exclusively to collect
    let world = RwLock::new(());
    let results: Vec<Result<WorkloadStats, SpaceError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workload.threads)
            .map(|index| {
                let classes = &classes;
                let next_slot = &next_slot;
                let world = &world;
                scope.spawn(move || {
                    let worker = Worker {
                        space,
                        workload,
                        classes,
                        registry,
                        next_slot,
                        world,
                        site: AllocSite::thread(index as u64 + 1),
                    };
                    worker.run()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let mut total = WorkloadStats::default();
    for result in results {
        let stats = result?;
        total.requests += stats.requests;
        total.leaked += stats.leaked;
        total.collections += stats.collections;
    }
    Ok(total)
}

struct Worker<'a> {
    space: &'a ObjectSpace,
    workload: &'a Workload,
    classes: &'a Classes,
    registry: ObjectRef,
    next_slot: &'a AtomicUsize,
    world: &'a RwLock<()>,
    site: AllocSite,
}

impl Worker<'_> {
    fn run(&self) -> Result<WorkloadStats, SpaceError> {
        let space = self.space;
        let frame = space.add_root(
            RootSystem::Threads,
            RootKind::StackVariable,
            format!("worker-{} frame 0", self.site.thread.0),
            None,
        );
        let mut stats = WorkloadStats::default();

        for i in 0..self.workload.objects {
            {
                let _running = self.world.read();
                let request =
                    space.alloc_instance(self.classes.request, self.site.at(SITE_REQUEST))?;
                let payload =
                    space.alloc_bytes(self.workload.payload, self.site.at(SITE_PAYLOAD))?;
                space.set_named_field(request, "payload", Some(payload))?;
                space.set_root(frame, Some(request))?;
                stats.requests += 1;

                let every = self.workload.leak_every;
                if every > 0 && i % every == every - 1 {
                    self.leak(request)?;
                    stats.leaked += 1;
                }
            }
            let collect_every = self.workload.collect_every;
            if collect_every > 0 && (i + 1) % collect_every == 0 {
                let _stopped = self.world.write();
                space.collect();
                stats.collections += 1;
            }
        }

        space.remove_root(frame)?;
        debug!(
            "worker {} done: {} requests, {} leaked",
            self.site.thread.0, stats.requests, stats.leaked
        );
        Ok(stats)
    }

    /// Hangs `request` off the registry behind `chain_length` holders.
    fn leak(&self, request: ObjectRef) -> Result<(), SpaceError> {
        let mut target = request;
        for _ in 0..self.workload.chain_length {
            let holder = self
                .space
                .alloc_instance(self.classes.node, self.site.at(SITE_NODE))?;
            self.space.set_field(holder, 0, Some(target))?;
            target = holder;
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.space.set_element(self.registry, slot, Some(target))
    }
}
