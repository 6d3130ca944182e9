use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

const LIVE: u32 = 0x1f2e_3d4c;
const DEAD: u32 = 0xdead_d00d;

/// process wide lifecycle counters of every `TraceCell`.
///
/// counts are only meaningful while a [`Tracing`] session is held, since a
/// session serialises every test that traces.
pub static TRACE_STORE: TraceStore = TraceStore::new();

pub struct TraceStore {
    session: Mutex<()>,
    constructs: AtomicUsize,
    drops: AtomicUsize,
    double_drops: AtomicUsize,
}

impl TraceStore {
    const fn new() -> Self {
        Self {
            session: Mutex::new(()),
            constructs: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
            double_drops: AtomicUsize::new(0),
        }
    }

    /// waits for any other session to end, then zeroes the counters.
    pub fn start_tracing(&'static self) -> Tracing {
        let guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        for counter in [&self.constructs, &self.drops, &self.double_drops] {
            counter.store(0, Ordering::Relaxed);
        }

        Tracing {
            store: self,
            _session: guard,
        }
    }
}

/// exclusive view of [`TRACE_STORE`], released on drop.
///
/// dropping a session with a cell destroyed twice panics, so a block that runs
/// an object destructor more than once fails the test even if no count is
/// asserted.
pub struct Tracing {
    store: &'static TraceStore,
    _session: MutexGuard<'static, ()>,
}

impl Tracing {
    pub fn constructs(&self) -> usize {
        self.store.constructs.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> usize {
        self.store.drops.load(Ordering::Relaxed)
    }

    /// cells constructed but not destroyed yet.
    pub fn alive(&self) -> usize {
        self.constructs().saturating_sub(self.drops())
    }

    /// destructor calls on a cell that had already been destroyed in place.
    pub fn double_drops(&self) -> usize {
        self.store.double_drops.load(Ordering::Relaxed)
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        let twice = self.double_drops();
        if twice != 0 && !std::thread::panicking() {
            panic!("{twice} traced value(s) were destroyed more than once");
        }
    }
}

/// payload whose construction and destruction are recorded in [`TRACE_STORE`].
///
/// a canary word is overwritten on drop, so a second in-place destruction of the
/// same storage is detected instead of silently counted.
pub struct TraceCell<T> {
    value: T,
    canary: u32,
}

impl<T> TraceCell<T> {
    pub fn new(value: T) -> Self {
        TRACE_STORE.constructs.fetch_add(1, Ordering::Relaxed);
        Self {
            value,
            canary: LIVE,
        }
    }
}

impl<T> Drop for TraceCell<T> {
    fn drop(&mut self) {
        let counter = match std::mem::replace(&mut self.canary, DEAD) {
            LIVE => &TRACE_STORE.drops,
            _ => &TRACE_STORE.double_drops,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: Clone> Clone for TraceCell<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> From<T> for TraceCell<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: PartialEq> PartialEq for TraceCell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for TraceCell<T> {}

impl<T: fmt::Debug> fmt::Debug for TraceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TraceCell").field(&self.value).finish()
    }
}

impl<T> Deref for TraceCell<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for TraceCell<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mockalloc::Mockalloc;
    use std::mem::ManuallyDrop;

    #[global_allocator]
    static ALLOCATOR: Mockalloc<std::alloc::System> = Mockalloc(std::alloc::System);

    #[test]
    fn counts_constructions_and_drops() {
        let tracing = TRACE_STORE.start_tracing();

        let a = TraceCell::new(1u32);
        let b = a.clone();
        assert_eq!(tracing.constructs(), 2);
        assert_eq!(tracing.alive(), 2);
        assert_eq!(a, b);

        drop(a);
        assert_eq!(tracing.drops(), 1);

        drop(b);
        assert_eq!(tracing.alive(), 0);
        assert_eq!(tracing.double_drops(), 0);
    }

    #[test]
    fn tracing_never_allocates() {
        let tracing = TRACE_STORE.start_tracing();

        let info = mockalloc::record_allocs(|| {
            let cell = TraceCell::new([0u8; 16]);
            drop(cell);
        });

        assert_eq!(info.num_allocs(), 0);
        assert_eq!(info.num_frees(), 0);
        assert_eq!(tracing.alive(), 0);
    }

    #[test]
    fn second_destruction_in_place_is_detected() {
        let tracing = TRACE_STORE.start_tracing();

        let mut slot = ManuallyDrop::new(TraceCell::new(7u64));
        unsafe {
            ManuallyDrop::drop(&mut slot);
            ManuallyDrop::drop(&mut slot);
        }

        assert_eq!(tracing.drops(), 1);
        assert_eq!(tracing.double_drops(), 1);

        // the session would panic on release otherwise.
        TRACE_STORE.double_drops.store(0, Ordering::Relaxed);
    }
}
