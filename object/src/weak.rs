use leakprof::{ObjectRef, WeakHandle, WeakReferenceRegistry};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeakSlot {
    Free,
    Live(ObjectRef),
    /// The referent was reclaimed; the slot stays allocated until released.
    Cleared,
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<WeakSlot>,
    free: Vec<usize>,
}

/// Weak reference storage cleared by the space's collector.
#[derive(Debug, Default)]
pub struct WeakTable {
    slots: Mutex<Slots>,
}

impl WeakTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots that still resolve.
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .entries
            .iter()
            .filter(|slot| matches!(slot, WeakSlot::Live(_)))
            .count()
    }

    /// Clears every slot whose referent fails `is_live`. Returns how many
    /// slots were cleared.
    pub(crate) fn clear_unreachable(&self, is_live: impl Fn(ObjectRef) -> bool) -> usize {
        let mut slots = self.slots.lock();
        let mut cleared = 0;
        for slot in slots.entries.iter_mut() {
            if let WeakSlot::Live(object) = *slot
                && !is_live(object)
            {
                *slot = WeakSlot::Cleared;
                cleared += 1;
            }
        }
        cleared
    }
}

impl WeakReferenceRegistry for WeakTable {
    fn register(&self, object: ObjectRef) -> WeakHandle {
        let mut slots = self.slots.lock();
        let index = match slots.free.pop() {
            Some(index) => {
                slots.entries[index] = WeakSlot::Live(object);
                index
            }
            None => {
                slots.entries.push(WeakSlot::Live(object));
                slots.entries.len() - 1
            }
        };
        WeakHandle(index as u64)
    }

    fn resolve(&self, handle: WeakHandle) -> Option<ObjectRef> {
        match self.slots.lock().entries.get(handle.0 as usize)? {
            WeakSlot::Live(object) => Some(*object),
            WeakSlot::Free | WeakSlot::Cleared => None,
        }
    }

    fn release(&self, handle: WeakHandle) {
        let mut slots = self.slots.lock();
        let index = handle.0 as usize;
        match slots.entries.get_mut(index) {
            Some(slot) if *slot != WeakSlot::Free => {
                *slot = WeakSlot::Free;
                slots.free.push(index);
            }
            _ => debug_assert!(false, "released unknown weak handle {index}"),
        }
    }
}
