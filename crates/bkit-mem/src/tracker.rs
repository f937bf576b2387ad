//! Fixed-capacity allocation tracking table.
//!
//! Slots `[0, count)` form the live window; everything from `count` up is
//! free for reuse even if it still physically holds an old record.
//!
//! Removal is unordered: the victim trades places with the last live record
//! and the window shrinks by one, so it is O(1) once the victim is found.
//!
//! ```text
//!   release h2, count = 4            after
//!   [ h1 | h2 | h3 | h4 ]            [ h1 | h4 | h3 | -- ]   count = 3
//!          ^---------^ swap
//! ```
//!
//! When the table is full, the next record overwrites the last slot, moves to
//! slot 0, and the window restarts with just that record:
//!
//! ```text
//!   full, count = 4                  track h6
//!   [ h1 | h4 | h3 | h5 ]            [ h6 | h4 | h3 | h1 ]   count = 1
//! ```
//!
//! h5 is overwritten; h1, h3 and h4 stay allocated but are no longer
//! reachable by lookup or drain. The table trades completeness for O(1)
//! bookkeeping here; it does not try to recover those blocks.

use std::num::NonZeroUsize;

use serde::Serialize;

use crate::backend::{BackendSet, Handle};
use crate::error::MemError;

/// Default number of tracking slots.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One live allocation known to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    #[serde(serialize_with = "serialize_handle")]
    pub handle: Handle,
    pub size: usize,
}

fn serialize_handle<S: serde::Serializer>(handle: &Handle, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:#x}", handle.addr()))
}

/// Where [`TrackingTable::track`] put a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Appended at `index` inside the window.
    Appended { index: usize },
    /// Table was full; the window restarted at the new record. `evicted` is
    /// the record that physically occupied the last slot.
    Wrapped { evicted: Option<AllocationRecord> },
}

/// Result of releasing a handle through the tracker.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReleaseOutcome {
    /// Found in the window, removed, and released through the backend.
    Released,
    /// Not in the window. Nothing was released.
    Untracked,
}

impl ReleaseOutcome {
    #[must_use]
    pub const fn is_released(self) -> bool {
        matches!(self, Self::Released)
    }
}

#[derive(Debug)]
pub struct TrackingTable {
    slots: Box<[Option<AllocationRecord>]>,
    count: usize,
    total_bytes_allocated: u64,
    wraparounds: u64,
}

impl TrackingTable {
    pub fn with_capacity(capacity: usize) -> Result<Self, MemError> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or(MemError::InvalidCapacity(capacity))
    }

    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            slots: vec![None; capacity.get()].into_boxed_slice(),
            count: 0,
            total_bytes_allocated: 0,
            wraparounds: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Records in the live window.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes ever tracked. Keeps growing across wraparounds and releases, so it
    /// says nothing about what is live now.
    #[must_use]
    pub const fn total_bytes_allocated(&self) -> u64 {
        self.total_bytes_allocated
    }

    #[must_use]
    pub const fn wraparounds(&self) -> u64 {
        self.wraparounds
    }

    /// Physical slot contents, including stale records outside the window.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&AllocationRecord> {
        self.slots.get(index)?.as_ref()
    }

    /// Records in the live window, in slot order.
    pub fn window(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.slots[..self.count].iter().flatten()
    }

    /// Window index of `handle`, scanning `[0, count)`.
    #[must_use]
    pub fn position(&self, handle: Handle) -> Option<usize> {
        self.slots[..self.count]
            .iter()
            .position(|slot| slot.is_some_and(|record| record.handle == handle))
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.position(handle).is_some()
    }

    pub fn track(&mut self, record: AllocationRecord) -> TrackOutcome {
        self.total_bytes_allocated = self
            .total_bytes_allocated
            .saturating_add(record.size as u64);

        let capacity = self.slots.len();
        if self.count < capacity {
            let index = self.count;
            self.slots[index] = Some(record);
            self.count += 1;
            return TrackOutcome::Appended { index };
        }

        let last = capacity - 1;
        let evicted = self.slots[last].replace(record);
        self.slots.swap(0, last);
        self.count = 1;
        self.wraparounds += 1;
        TrackOutcome::Wrapped { evicted }
    }

    /// Swap-remove `handle` from the window without releasing it.
    pub fn remove(&mut self, handle: Handle) -> Option<AllocationRecord> {
        let index = self.position(handle)?;
        let last = self.count - 1;
        self.slots.swap(index, last);
        self.count = last;
        self.slots[last].take()
    }

    /// Remove `handle` and release it through the active release primitive.
    pub fn untrack(&mut self, handle: Handle, backends: &mut BackendSet) -> ReleaseOutcome {
        let Some(record) = self.remove(handle) else {
            return ReleaseOutcome::Untracked;
        };
        // SAFETY: every record in the window was allocated by the active set
        // (swaps drain the window first), and removal means no record refers
        // to it any more.
        unsafe { backends.release(record.handle) };
        ReleaseOutcome::Released
    }

    /// Point the record for `old` at `record` in place. Returns false if `old`
    /// is not in the window.
    pub fn rekey(&mut self, old: Handle, record: AllocationRecord) -> bool {
        match self.position(old) {
            Some(index) => {
                self.slots[index] = Some(record);
                true
            }
            None => false,
        }
    }

    /// Release every record in the window and empty it. Returns how many
    /// records were released.
    pub fn drain_all(&mut self, backends: &mut BackendSet) -> usize {
        let mut drained = 0;
        for slot in &mut self.slots[..self.count] {
            if let Some(record) = slot.take() {
                // SAFETY: as in `untrack`; the slot is cleared before the
                // next iteration so no record is released twice.
                unsafe { backends.release(record.handle) };
                drained += 1;
            }
        }
        self.count = 0;
        drained
    }
}
