//! Instrumented allocation front end.
//!
//! Every allocation made through a [`MemoryFrontEnd`] is forwarded to the
//! active allocator backend and recorded in a bounded tracking table, so
//! that live blocks can be counted, released in bulk, and drained before
//! the backend is swapped for another one.
//!
//! # Architecture
//!
//! - **Lock** (`lock`): one exclusion domain per front end; `parking_lot` by
//!   default, or the sleep-and-retry [`SpinSleepLock`]
//! - **Backends** (`backend`): the four primitives, the platform and system
//!   allocators, partial swaps, and the backend-side live counter
//! - **Tracker** (`tracker`): fixed-capacity table with swap-to-end removal
//!   and wraparound on overflow
//! - **Front end** (`front`): the public operations and the process-wide
//!   instance
//! - **Copy** (`copy`): word-then-byte copy helper
//! - **Configuration** (`config`): capacity and default backend from the
//!   environment

pub mod backend;
pub mod config;
pub mod copy;
pub mod error;
pub mod front;
pub mod lock;
pub mod tracker;

pub use backend::{
    Backend, BackendKind, BackendNames, BackendSwap, CountingBackend, Handle, PlatformBackend,
    PrimitiveCalls, SystemBackend,
};
pub use config::TrackerConfig;
pub use copy::{copy_bytes, copy_bytes_raw};
pub use error::MemError;
pub use front::{MemoryFrontEnd, MemoryStats, SpinSleepFrontEnd, global};
pub use lock::SpinSleepLock;
pub use tracker::{AllocationRecord, DEFAULT_CAPACITY, ReleaseOutcome, TrackingTable};
