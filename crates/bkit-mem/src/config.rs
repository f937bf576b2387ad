//! Front-end configuration.
//!
//! The process-wide front end (see [`crate::global`]) reads two environment
//! variables once:
//! - `BKIT_MEM_CAPACITY`: tracking table slots (decimal, `_` separators
//!   allowed). Zero or garbage falls back to [`DEFAULT_CAPACITY`].
//! - `BKIT_MEM_BACKEND`: default backend name (`platform`/`libc`/`default`
//!   or `system`/`rust`/`alt`). Unknown names fall back to `platform`.
//!
//! Explicitly constructed front ends take a [`TrackerConfig`] directly and
//! never look at the environment.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

use crate::backend::BackendKind;
use crate::error::MemError;
pub use crate::tracker::DEFAULT_CAPACITY;

pub const CAPACITY_ENV: &str = "BKIT_MEM_CAPACITY";
pub const BACKEND_ENV: &str = "BKIT_MEM_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerConfig {
    capacity: usize,
    backend: BackendKind,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backend: BackendKind::Platform,
        }
    }
}

impl TrackerConfig {
    /// Set the tracking table size. Must be at least 1.
    pub fn with_capacity(mut self, capacity: usize) -> Result<Self, MemError> {
        if capacity == 0 {
            return Err(MemError::InvalidCapacity(capacity));
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Backend installed on first use.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Read the environment now, bypassing the process cache.
    #[must_use]
    pub fn from_env() -> Self {
        let capacity = std::env::var(CAPACITY_ENV)
            .ok()
            .and_then(|raw| parse_capacity(&raw))
            .unwrap_or(DEFAULT_CAPACITY);
        let backend = std::env::var(BACKEND_ENV)
            .ok()
            .and_then(|raw| BackendKind::parse(&raw).ok())
            .unwrap_or_default();
        Self { capacity, backend }
    }
}

fn parse_capacity(raw: &str) -> Option<usize> {
    let digits: String = raw.trim().chars().filter(|c| *c != '_').collect();
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

// Cache state: 0=unresolved, 1=resolved, 255=resolving. A caller that arrives
// while another is reading the environment gets the defaults instead of
// blocking.
static CACHE_STATE: AtomicU8 = AtomicU8::new(0);
static CACHED_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CAPACITY);
static CACHED_BACKEND: AtomicU8 = AtomicU8::new(BACKEND_PLATFORM);

const STATE_UNRESOLVED: u8 = 0;
const STATE_RESOLVED: u8 = 1;
const STATE_RESOLVING: u8 = 255;

const BACKEND_PLATFORM: u8 = 0;
const BACKEND_SYSTEM: u8 = 1;

fn kind_to_u8(kind: BackendKind) -> u8 {
    match kind {
        BackendKind::Platform => BACKEND_PLATFORM,
        BackendKind::System => BACKEND_SYSTEM,
    }
}

fn u8_to_kind(v: u8) -> BackendKind {
    match v {
        BACKEND_SYSTEM => BackendKind::System,
        _ => BackendKind::Platform,
    }
}

fn cached() -> TrackerConfig {
    TrackerConfig {
        capacity: CACHED_CAPACITY.load(Ordering::Acquire),
        backend: u8_to_kind(CACHED_BACKEND.load(Ordering::Acquire)),
    }
}

/// Process configuration: read from the environment on first call, cached
/// after that.
#[must_use]
pub fn tracker_config() -> TrackerConfig {
    match CACHE_STATE.load(Ordering::Acquire) {
        STATE_RESOLVED => return cached(),
        STATE_RESOLVING => return TrackerConfig::default(),
        _ => {}
    }

    if CACHE_STATE
        .compare_exchange(
            STATE_UNRESOLVED,
            STATE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return if CACHE_STATE.load(Ordering::Acquire) == STATE_RESOLVED {
            cached()
        } else {
            TrackerConfig::default()
        };
    }

    let config = TrackerConfig::from_env();
    CACHED_CAPACITY.store(config.capacity, Ordering::Release);
    CACHED_BACKEND.store(kind_to_u8(config.backend), Ordering::Release);
    CACHE_STATE.store(STATE_RESOLVED, Ordering::Release);
    config
}
