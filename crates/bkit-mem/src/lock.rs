//! Exclusion primitives for the front end's single lock domain.
//!
//! The front end is generic over a [`RawMutex`]. The default is
//! `parking_lot::RawMutex`; [`SpinSleepLock`] is the flag-and-sleep
//! discipline: test-and-set on a flag, and while the flag is held, sleep a
//! fixed interval and retry. It is unfair (no queue, no priority
//! inheritance) and a waiter can starve under sustained contention, but it
//! never lets two holders in at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::lock_api::{self, GuardSend, RawMutex};

/// Back-off between acquisition attempts while the flag is held.
pub const SPIN_SLEEP: Duration = Duration::from_micros(50);

/// Flag lock with sleep back-off.
pub struct SpinSleepLock {
    held: AtomicBool,
}

// SAFETY: `held` is only set by a successful false->true exchange, so at most
// one caller observes `lock`/`try_lock` succeed until `unlock` clears it.
unsafe impl RawMutex for SpinSleepLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        held: AtomicBool::new(false),
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while !self.try_lock() {
            thread::sleep(SPIN_SLEEP);
        }
    }

    fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

/// Mutex over [`SpinSleepLock`].
pub type SpinSleepMutex<T> = lock_api::Mutex<SpinSleepLock, T>;
