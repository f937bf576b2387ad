//! The allocation front end: one lock, one backend registry, one tracking
//! table.
//!
//! Every operation takes the lock for its whole duration, makes sure the
//! default backend is installed, does its work against the tracker and the
//! active [`BackendSet`], and returns. Backend primitives run inside the
//! critical section; nothing in here calls back into the front end.
//!
//! [`MemoryFrontEnd`] is an ordinary value. Build one per allocation domain
//! and share it by reference; [`global`] holds the process-wide instance
//! used by the C ABI.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use parking_lot::lock_api::{self, RawMutex};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::backend::{Backend, BackendNames, BackendRegistry, BackendSwap, Handle};
use crate::config::{TrackerConfig, tracker_config};
use crate::error::MemError;
use crate::lock::SpinSleepLock;
use crate::tracker::{AllocationRecord, ReleaseOutcome, TrackOutcome, TrackingTable};

/// Point-in-time view of a front end, taken under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Records in the tracking window.
    pub tracked: usize,
    pub capacity: usize,
    /// Backend-side counter; exceeds `tracked` once records leave the window.
    pub backend_live_count: usize,
    pub total_bytes_allocated: u64,
    pub wraparounds: u64,
    pub untracked_releases: u64,
    pub drained_total: u64,
    pub swaps: u64,
    pub backends: BackendNames,
}

#[derive(Debug)]
struct FrontEndState {
    registry: BackendRegistry,
    table: TrackingTable,
    untracked_releases: u64,
    drained_total: u64,
    swaps: u64,
}

/// Allocation front end guarded by a single `R` lock.
pub struct MemoryFrontEnd<R: RawMutex = parking_lot::RawMutex> {
    state: lock_api::Mutex<R, FrontEndState>,
}

/// Front end using the sleep-and-retry flag lock.
pub type SpinSleepFrontEnd = MemoryFrontEnd<SpinSleepLock>;

impl MemoryFrontEnd {
    /// Default capacity and the platform backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: TrackerConfig) -> Self {
        Self::with_raw_mutex(config)
    }
}

impl Default for MemoryFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawMutex> MemoryFrontEnd<R> {
    /// Build a front end over any `lock_api` raw mutex.
    #[must_use]
    pub fn with_raw_mutex(config: TrackerConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity()).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: lock_api::Mutex::new(FrontEndState {
                registry: BackendRegistry::new(config.backend()),
                table: TrackingTable::new(capacity),
                untracked_releases: 0,
                drained_total: 0,
                swaps: 0,
            }),
        }
    }

    /// Install the configured default backend if nothing is installed yet.
    ///
    /// Every other operation does this implicitly. Returns whether this call
    /// did the installing.
    pub fn initialize_default(&self) -> bool {
        let mut state = self.state.lock();
        let installed = state.registry.initialize_default();
        if installed {
            debug!(
                backend = state.registry.active().names().allocate,
                capacity = state.table.capacity(),
                "memory front end initialized"
            );
        }
        installed
    }

    pub fn allocate(&self, bytes: usize) -> Result<Handle, MemError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let handle = state.registry.active().allocate(bytes);
        admit(&mut state.table, handle, bytes, "allocate")
    }

    /// Like [`allocate`](Self::allocate), but the block is zero-filled.
    pub fn zero_allocate(&self, bytes: usize) -> Result<Handle, MemError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let handle = state.registry.active().zero_allocate(bytes);
        admit(&mut state.table, handle, bytes, "zero_allocate")
    }

    /// Resize a block through the active reallocate primitive.
    ///
    /// `None` behaves like [`allocate`](Self::allocate). A tracked block
    /// keeps its slot, pointed at the new handle and size. An untracked block
    /// is resized but stays untracked. On failure the old block is left as
    /// it was, except for a zero-byte request where the backend released it
    /// and its record is dropped.
    ///
    /// # Safety
    ///
    /// `handle`, when present, must be a live block from the backend serving
    /// the reallocate slot, and must not be used after a successful call.
    pub unsafe fn reallocate(
        &self,
        handle: Option<Handle>,
        bytes: usize,
    ) -> Result<Handle, MemError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let backends = state.registry.active();
        // SAFETY: forwarded caller contract.
        let resized = unsafe { backends.reallocate(handle, bytes) };

        let Some(old) = handle else {
            return admit(&mut state.table, resized, bytes, "reallocate");
        };
        match resized {
            Some(new) => {
                let record = AllocationRecord {
                    handle: new,
                    size: bytes,
                };
                if state.table.rekey(old, record) {
                    trace!(old = old.addr(), new = new.addr(), bytes, "tracked block resized");
                } else {
                    debug!(old = old.addr(), bytes, "untracked block resized");
                }
                Ok(new)
            }
            None => {
                if bytes == 0 && state.table.remove(old).is_some() {
                    backends.forget_one();
                    trace!(old = old.addr(), "tracked block released by zero-byte resize");
                } else {
                    debug!(old = old.addr(), bytes, "backend could not resize block");
                }
                Err(MemError::OutOfMemory { requested: bytes })
            }
        }
    }

    /// Release a tracked block.
    ///
    /// Handles outside the tracking window are ignored and reported as
    /// [`ReleaseOutcome::Untracked`]; no backend call is made for them.
    pub fn release(&self, handle: Handle) -> ReleaseOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let outcome = state.table.untrack(handle, state.registry.active());
        if outcome == ReleaseOutcome::Untracked {
            state.untracked_releases += 1;
            debug!(addr = handle.addr(), "release of untracked handle ignored");
        }
        outcome
    }

    /// Release every block in the tracking window. Returns how many.
    pub fn collect_all(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let drained = state.table.drain_all(state.registry.active());
        state.drained_total += drained as u64;
        debug!(drained, "tracked allocations collected");
        drained
    }

    /// Drain the tracking window through the outgoing primitives, then
    /// install the slots present in `swap`. Returns the number drained.
    ///
    /// Blocks that already fell out of the window are not drained and stay
    /// with the outgoing backend.
    ///
    /// # Safety
    ///
    /// After the swap, blocks from the allocate, zero-allocate and
    /// reallocate slots are released through the release slot and resized
    /// through the reallocate slot. A partial swap must leave those slots
    /// served by backends that accept each other's blocks.
    pub unsafe fn swap_backend(&self, swap: BackendSwap) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let backends = state.registry.active();
        let outgoing = backends.names();
        let drained = state.table.drain_all(backends);
        backends.apply(swap);
        state.drained_total += drained as u64;
        state.swaps += 1;
        info!(
            drained,
            from = ?outgoing,
            to = ?backends.names(),
            "allocator backend swapped"
        );
        drained
    }

    /// Swap all four primitives to `backend`. See
    /// [`swap_backend`](Self::swap_backend).
    pub fn swap_backend_all(&self, backend: Arc<dyn Backend>) -> usize {
        // SAFETY: one backend serves every slot.
        unsafe { self.swap_backend(BackendSwap::all(backend)) }
    }

    /// Records in the tracking window.
    pub fn live_count(&self) -> usize {
        let mut state = self.state.lock();
        state.registry.active();
        state.table.len()
    }

    pub fn is_tracked(&self, handle: Handle) -> bool {
        self.state.lock().table.contains(handle)
    }

    pub fn stats(&self) -> MemoryStats {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let backends = state.registry.active();
        MemoryStats {
            tracked: state.table.len(),
            capacity: state.table.capacity(),
            backend_live_count: backends.live_count(),
            total_bytes_allocated: state.table.total_bytes_allocated(),
            wraparounds: state.table.wraparounds(),
            untracked_releases: state.untracked_releases,
            drained_total: state.drained_total,
            swaps: state.swaps,
            backends: backends.names(),
        }
    }

    /// Run `f` against the tracking table while holding the lock.
    pub fn inspect<T>(&self, f: impl FnOnce(&TrackingTable) -> T) -> T {
        f(&self.state.lock().table)
    }
}

impl<R: RawMutex> fmt::Debug for MemoryFrontEnd<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFrontEnd")
            .field("state", &self.state)
            .finish()
    }
}

fn admit(
    table: &mut TrackingTable,
    handle: Option<Handle>,
    bytes: usize,
    op: &'static str,
) -> Result<Handle, MemError> {
    let Some(handle) = handle else {
        debug!(op, bytes, "backend returned no block");
        return Err(MemError::OutOfMemory { requested: bytes });
    };
    match table.track(AllocationRecord {
        handle,
        size: bytes,
    }) {
        TrackOutcome::Appended { index } => {
            trace!(op, bytes, index, addr = handle.addr(), "block tracked");
        }
        TrackOutcome::Wrapped { evicted } => {
            warn!(
                op,
                capacity = table.capacity(),
                evicted = evicted.map(|r| r.handle.addr()),
                "tracking table wrapped; older records left the window"
            );
        }
    }
    Ok(handle)
}

static GLOBAL: OnceLock<MemoryFrontEnd> = OnceLock::new();

/// The process-wide front end, configured from the environment on first use
/// (see [`crate::config`]).
pub fn global() -> &'static MemoryFrontEnd {
    GLOBAL.get_or_init(|| MemoryFrontEnd::with_config(tracker_config()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CountingBackend, PlatformBackend, SystemBackend};

    fn small(capacity: usize) -> MemoryFrontEnd {
        MemoryFrontEnd::with_config(TrackerConfig::default().with_capacity(capacity).unwrap())
    }

    fn counted(front: &MemoryFrontEnd) -> Arc<CountingBackend> {
        let counting = Arc::new(CountingBackend::new("counted", Arc::new(PlatformBackend)));
        front.swap_backend_all(Arc::clone(&counting) as Arc<dyn Backend>);
        counting
    }

    fn window(front: &MemoryFrontEnd) -> Vec<Handle> {
        front.inspect(|table| table.window().map(|r| r.handle).collect())
    }

    /// Declines every request.
    struct Exhausted;

    impl Backend for Exhausted {
        fn name(&self) -> &'static str {
            "exhausted"
        }
        fn allocate(&self, _: usize) -> Option<Handle> {
            None
        }
        fn zero_allocate(&self, _: usize) -> Option<Handle> {
            None
        }
        unsafe fn reallocate(&self, _: Option<Handle>, _: usize) -> Option<Handle> {
            None
        }
        unsafe fn release(&self, _: Handle) {}
    }

    /// Platform blocks; a zero-byte resize frees and returns nothing.
    struct FreeOnZero;

    impl Backend for FreeOnZero {
        fn name(&self) -> &'static str {
            "free-on-zero"
        }
        fn allocate(&self, bytes: usize) -> Option<Handle> {
            PlatformBackend.allocate(bytes)
        }
        fn zero_allocate(&self, bytes: usize) -> Option<Handle> {
            PlatformBackend.zero_allocate(bytes)
        }
        unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
            match (handle, bytes) {
                (Some(handle), 0) => {
                    // SAFETY: forwarded caller contract.
                    unsafe { PlatformBackend.release(handle) };
                    None
                }
                // SAFETY: forwarded caller contract.
                _ => unsafe { PlatformBackend.reallocate(handle, bytes) },
            }
        }
        unsafe fn release(&self, handle: Handle) {
            // SAFETY: forwarded caller contract.
            unsafe { PlatformBackend.release(handle) }
        }
    }

    #[test]
    fn initialize_default_installs_once() {
        let front = MemoryFrontEnd::new();
        assert!(front.initialize_default());
        assert!(!front.initialize_default());
        assert_eq!(front.stats().backends.allocate, "platform");
    }

    #[test]
    fn operations_initialize_lazily() {
        let front = MemoryFrontEnd::with_config(
            TrackerConfig::default().with_backend(crate::backend::BackendKind::System),
        );
        let h = front.allocate(24).unwrap();
        assert!(!front.initialize_default());
        assert_eq!(front.stats().backends.release, "system");
        assert!(front.release(h).is_released());
    }

    #[test]
    fn allocate_then_release_round_trip() {
        let front = small(8);
        let counting = counted(&front);
        let handles: Vec<_> = (1..=5).map(|n| front.allocate(n * 8).unwrap()).collect();
        assert_eq!(front.live_count(), 5);

        assert!(front.release(handles[2]).is_released());
        assert_eq!(front.live_count(), 4);
        assert!(!front.is_tracked(handles[2]));
        assert_eq!(front.release(handles[2]), ReleaseOutcome::Untracked);
        assert_eq!(front.live_count(), 4);
        assert_eq!(counting.calls().release, 1);

        assert_eq!(front.collect_all(), 4);
        assert_eq!(front.live_count(), 0);
    }

    #[test]
    fn zero_allocate_returns_zeroed_block() {
        let front = MemoryFrontEnd::new();
        let h = front.zero_allocate(128).unwrap();
        // SAFETY: `h` is a live 128-byte block.
        let zeroed = (0..128).all(|i| unsafe { h.as_ptr().add(i).read() } == 0);
        assert!(zeroed);
        assert!(front.release(h).is_released());
    }

    #[test]
    fn untracked_release_makes_no_backend_call() {
        let front = small(4);
        let counting = counted(&front);
        let foreign = PlatformBackend.allocate(16).unwrap();

        assert_eq!(front.release(foreign), ReleaseOutcome::Untracked);
        assert_eq!(counting.calls().release, 0);
        assert_eq!(front.stats().untracked_releases, 1);

        // SAFETY: `foreign` never entered the front end.
        unsafe { PlatformBackend.release(foreign) };
    }

    #[test]
    fn allocation_failure_is_not_tracked() {
        let front = small(4);
        front.swap_backend_all(Arc::new(Exhausted));
        assert_eq!(
            front.allocate(64),
            Err(MemError::OutOfMemory { requested: 64 })
        );
        assert!(front.zero_allocate(0).unwrap_err().is_out_of_memory());
        // SAFETY: `None` carries no block.
        assert!(unsafe { front.reallocate(None, 8) }.is_err());
        let stats = front.stats();
        assert_eq!(stats.tracked, 0);
        assert_eq!(stats.backend_live_count, 0);
        assert_eq!(stats.total_bytes_allocated, 0);
    }

    #[test]
    fn reallocate_rekeys_tracked_record_deviation() {
        let front = small(4);
        let counting = counted(&front);
        let a = front.allocate(8).unwrap();
        let b = front.allocate(8).unwrap();

        // SAFETY: `a` is a live block from the active backend.
        let grown = unsafe { front.reallocate(Some(a), 1 << 20) }.unwrap();
        assert_eq!(counting.calls().reallocate, 1);
        assert_eq!(front.live_count(), 2);
        assert!(front.is_tracked(grown));
        assert!(front.is_tracked(b));
        let size = front.inspect(|table| {
            table
                .window()
                .find(|r| r.handle == grown)
                .map(|r| r.size)
        });
        assert_eq!(size, Some(1 << 20), "resized record carries the new size");

        assert!(front.release(grown).is_released());
        assert!(front.release(b).is_released());
        assert_eq!(front.stats().backend_live_count, 0);
    }

    #[test]
    fn reallocate_none_allocates_and_tracks() {
        let front = small(4);
        // SAFETY: `None` carries no block.
        let h = unsafe { front.reallocate(None, 40) }.unwrap();
        assert!(front.is_tracked(h));
        assert_eq!(front.stats().backend_live_count, 1);
        assert!(front.release(h).is_released());
    }

    #[test]
    fn reallocate_untracked_stays_untracked() {
        let front = small(4);
        let foreign = PlatformBackend.allocate(8).unwrap();
        // SAFETY: `foreign` is a live platform block and the active backend is
        // the platform backend.
        let grown = unsafe { front.reallocate(Some(foreign), 256) }.unwrap();
        assert!(!front.is_tracked(grown));
        assert_eq!(front.live_count(), 0);
        // SAFETY: `grown` replaced `foreign` and was never tracked.
        unsafe { PlatformBackend.release(grown) };
    }

    #[test]
    fn zero_byte_reallocate_that_frees_drops_record() {
        let front = small(4);
        front.swap_backend_all(Arc::new(FreeOnZero));
        let h = front.allocate(32).unwrap();
        assert_eq!(front.stats().backend_live_count, 1);

        // SAFETY: `h` is a live block from the active backend.
        let result = unsafe { front.reallocate(Some(h), 0) };
        assert_eq!(result, Err(MemError::OutOfMemory { requested: 0 }));
        assert!(!front.is_tracked(h));
        let stats = front.stats();
        assert_eq!(stats.tracked, 0);
        assert_eq!(stats.backend_live_count, 0);
    }

    #[test]
    fn capacity_four_scenario_through_front_end() {
        let front = small(4);
        let h1 = front.allocate(1).unwrap();
        let h2 = front.allocate(2).unwrap();
        let h3 = front.allocate(3).unwrap();
        let h4 = front.allocate(4).unwrap();
        assert_eq!(window(&front), vec![h1, h2, h3, h4]);

        assert!(front.release(h2).is_released());
        assert_eq!(window(&front), vec![h1, h4, h3]);

        let h5 = front.allocate(5).unwrap();
        assert_eq!(window(&front), vec![h1, h4, h3, h5]);

        let h6 = front.allocate(6).unwrap();
        assert_eq!(front.live_count(), 1);
        assert_eq!(window(&front), vec![h6]);

        let stats = front.stats();
        assert_eq!(stats.wraparounds, 1);
        assert_eq!(stats.backend_live_count, 5, "h1 h3 h4 h5 h6 still allocated");
        assert_eq!(stats.total_bytes_allocated, 21);

        assert_eq!(front.collect_all(), 1);
        for leaked in [h1, h3, h4, h5] {
            assert_eq!(front.release(leaked), ReleaseOutcome::Untracked);
            // SAFETY: blocks that fell out of the window are still live
            // platform blocks owned by this test.
            unsafe { PlatformBackend.release(leaked) };
        }
    }

    #[test]
    fn swap_drains_through_outgoing_backend() {
        let front = small(16);
        let old = counted(&front);
        for _ in 0..6 {
            front.allocate(32).unwrap();
        }
        let new = Arc::new(CountingBackend::new("next", Arc::new(SystemBackend)));
        assert_eq!(front.swap_backend_all(Arc::clone(&new) as Arc<dyn Backend>), 6);
        assert_eq!(old.calls().release, 6);
        assert_eq!(new.calls().release, 0);
        assert_eq!(front.live_count(), 0);

        let h = front.allocate(8).unwrap();
        assert_eq!(new.calls().allocate, 1);
        assert_eq!(old.calls().allocate, 6);
        assert!(front.release(h).is_released());
        assert_eq!(new.calls().release, 1);

        let stats = front.stats();
        assert_eq!(stats.swaps, 2);
        assert_eq!(stats.drained_total, 6);
        assert_eq!(stats.backends.allocate, "next");
    }

    #[test]
    fn stats_serialize_to_json() {
        let front = small(2);
        let h = front.allocate(10).unwrap();
        let json = serde_json::to_value(front.stats()).unwrap();
        assert_eq!(json["tracked"], 1);
        assert_eq!(json["capacity"], 2);
        assert_eq!(json["total_bytes_allocated"], 10);
        assert_eq!(json["backends"]["release"], "platform");
        assert!(front.release(h).is_released());
    }

    #[test]
    fn spin_sleep_front_end_behaves_the_same() {
        let front = SpinSleepFrontEnd::with_raw_mutex(TrackerConfig::default());
        let a = front.allocate(16).unwrap();
        let b = front.zero_allocate(16).unwrap();
        assert_eq!(front.live_count(), 2);
        assert!(front.release(a).is_released());
        assert_eq!(front.collect_all(), 1);
        assert!(!front.is_tracked(b));
    }
}
