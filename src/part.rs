//! Reference-counted immutable handles to serialized row groups.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
};

use crate::codec::SerializedBuffer;

/// Hook invoked when the last reference to a part is dropped.
///
/// Shared hooks are `Arc`s so one hook value can be attached to every part
/// recovered from a level file.
pub type ReleaseFn = Arc<dyn Fn() + Send + Sync>;

/// An immutable handle to one serialized columnar row group.
///
/// A part carries the transaction stamp of the newest write it contains and
/// the opened row-group view over its bytes. Cloning a part adds a
/// reference; dropping removes one. When the last reference drops, the
/// release hooks fire in registration order, exactly once.
#[derive(Clone)]
pub struct Part {
    inner: Arc<PartInner>,
}

struct PartInner {
    tx: u64,
    buffer: SerializedBuffer,
    releases: Vec<ReleaseFn>,
}

impl Part {
    /// Construct a part over `buffer`, stamped with transaction `tx`.
    pub fn new(tx: u64, buffer: SerializedBuffer, releases: Vec<ReleaseFn>) -> Self {
        Self {
            inner: Arc::new(PartInner {
                tx,
                buffer,
                releases,
            }),
        }
    }

    /// The part contains data up through this transaction.
    pub fn tx(&self) -> u64 {
        self.inner.tx
    }

    /// The opened row-group view over the part's bytes.
    pub fn buffer(&self) -> &SerializedBuffer {
        &self.inner.buffer
    }

    /// Serialized size of the part in bytes.
    pub fn size(&self) -> u64 {
        self.inner.buffer.size()
    }
}

impl Drop for PartInner {
    fn drop(&mut self) {
        for release in self.releases.drain(..) {
            (*release)();
        }
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("tx", &self.inner.tx)
            .field("size", &self.size())
            .finish()
    }
}

/// Counter a level uses to wait for every part it produced to be released.
///
/// Clones share the same counter. `done` past zero panics: it means a
/// release hook fired for a part the level never accounted for.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupState>,
}

#[derive(Default)]
struct WaitGroupState {
    count: Mutex<u64>,
    zero: Condvar,
}

impl WaitGroup {
    /// Add `n` outstanding parts.
    pub fn add(&self, n: u64) {
        let mut count = self.inner.count.lock().unwrap();
        *count += n;
    }

    /// Mark one outstanding part as released.
    pub fn done(&self) {
        let mut count = self.inner.count.lock().unwrap();
        if *count == 0 {
            panic!("wait group released more parts than were added");
        }
        *count -= 1;
        if *count == 0 {
            self.inner.zero.notify_all();
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock().unwrap();
        while *count > 0 {
            count = self.inner.zero.wait(count).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::codec::test_util::serialized_buffer;

    #[test]
    fn release_hooks_fire_once_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let hooks: Vec<ReleaseFn> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                Arc::new(move || order.lock().unwrap().push(i)) as ReleaseFn
            })
            .collect();

        let part = Part::new(7, serialized_buffer(&[1, 2, 3]), hooks);
        let clone = part.clone();
        drop(part);
        assert!(order.lock().unwrap().is_empty());
        drop(clone);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn shared_hook_fires_per_part() {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook: ReleaseFn = {
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };

        let a = Part::new(1, serialized_buffer(&[1]), vec![hook.clone()]);
        let b = Part::new(2, serialized_buffer(&[2]), vec![hook]);
        drop(a);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_group_blocks_until_done() {
        let wg = WaitGroup::default();
        wg.add(2);
        wg.done();

        let waiter = {
            let wg = wg.clone();
            std::thread::spawn(move || wg.wait())
        };
        wg.done();
        waiter.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "more parts than were added")]
    fn wait_group_done_past_zero_panics() {
        WaitGroup::default().done();
    }
}
