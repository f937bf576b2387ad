//! Allocator backends and the registry of active primitives.
//!
//! A [`Backend`] supplies the four primitives the front end forwards to:
//! allocate, zero-allocate, reallocate and release. The registry keeps one
//! [`BackendSet`] active per front end; each of its four slots may come from
//! a different backend, because a [`BackendSwap`] replaces only the slots it
//! carries.
//!
//! ```text
//!   BackendSwap { allocate: Some(B), release: Some(B), .. None }
//!
//!   active before        active after
//!   allocate      A  ->  B
//!   zero_allocate A  ->  A   (absent in swap, kept)
//!   reallocate    A  ->  A
//!   release       A  ->  B
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::MemError;

/// Opaque reference to a block handed out by a backend.
///
/// Identity is the block address. A handle never owns the memory it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonNull<u8>);

// SAFETY: a Handle is an address token; reading or writing through it
// requires `unsafe` at the use site, so moving it across threads is sound.
unsafe impl Send for Handle {}
// SAFETY: see `Send`; `&Handle` exposes nothing beyond the address.
unsafe impl Sync for Handle {}

impl Handle {
    /// Wrap a raw block pointer; `None` for null.
    #[must_use]
    pub fn from_ptr(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

/// Four allocation primitives.
///
/// Zero-byte requests are passed through unmodified; what comes back is
/// backend-defined.
pub trait Backend: Send + Sync {
    /// Short name used in stats and log events.
    fn name(&self) -> &'static str;

    fn allocate(&self, bytes: usize) -> Option<Handle>;

    fn zero_allocate(&self, bytes: usize) -> Option<Handle>;

    /// Resize a block. `None` as input behaves like [`Backend::allocate`].
    ///
    /// # Safety
    ///
    /// `handle`, when present, must be a live block returned by this backend.
    unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle>;

    /// # Safety
    ///
    /// `handle` must be a live block returned by this backend and must not be
    /// used afterwards.
    unsafe fn release(&self, handle: Handle);
}

// ---------------------------------------------------------------------------
// Platform backend (libc)
// ---------------------------------------------------------------------------

/// The platform C allocator: `malloc`, `calloc`, `realloc`, `free`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBackend;

impl Backend for PlatformBackend {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn allocate(&self, bytes: usize) -> Option<Handle> {
        // SAFETY: malloc accepts any size and reports failure with null.
        Handle::from_ptr(unsafe { libc::malloc(bytes) }.cast())
    }

    fn zero_allocate(&self, bytes: usize) -> Option<Handle> {
        // SAFETY: calloc(1, n) never overflows and reports failure with null.
        Handle::from_ptr(unsafe { libc::calloc(1, bytes) }.cast())
    }

    unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
        let ptr = handle.map_or(std::ptr::null_mut(), Handle::as_ptr);
        // SAFETY: caller guarantees `ptr` is null or a live malloc-family block.
        Handle::from_ptr(unsafe { libc::realloc(ptr.cast(), bytes) }.cast())
    }

    unsafe fn release(&self, handle: Handle) {
        // SAFETY: caller guarantees `handle` is a live malloc-family block.
        unsafe { libc::free(handle.as_ptr().cast()) };
    }
}

// ---------------------------------------------------------------------------
// System backend (Rust global allocator interface)
// ---------------------------------------------------------------------------

/// Bytes reserved in front of every [`SystemBackend`] block for its size.
pub const SYSTEM_HEADER: usize = 16;

/// Alternative backend over `std::alloc::System`.
///
/// `dealloc`/`realloc` need the original layout, so every block carries a
/// [`SYSTEM_HEADER`]-byte prefix holding its total size. Handles from this
/// backend are therefore not valid `free` arguments and vice versa.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    fn layout_for(bytes: usize) -> Option<Layout> {
        let total = bytes.checked_add(SYSTEM_HEADER)?;
        Layout::from_size_align(total, SYSTEM_HEADER).ok()
    }

    /// # Safety
    ///
    /// `raw` must be the start of a fresh block of at least `layout.size()` bytes.
    unsafe fn finish(raw: *mut u8, layout: Layout) -> Option<Handle> {
        if raw.is_null() {
            return None;
        }
        // SAFETY: the block is SYSTEM_HEADER-aligned and at least that large.
        unsafe {
            raw.cast::<usize>().write(layout.size());
            Handle::from_ptr(raw.add(SYSTEM_HEADER))
        }
    }

    /// # Safety
    ///
    /// `handle` must be a live block from this backend.
    unsafe fn header(handle: Handle) -> (*mut u8, Layout) {
        // SAFETY: every handle sits SYSTEM_HEADER bytes past its block start,
        // where `finish` stored the total size.
        unsafe {
            let raw = handle.as_ptr().sub(SYSTEM_HEADER);
            let total = raw.cast::<usize>().read();
            (raw, Layout::from_size_align_unchecked(total, SYSTEM_HEADER))
        }
    }
}

impl Backend for SystemBackend {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate(&self, bytes: usize) -> Option<Handle> {
        let layout = Self::layout_for(bytes)?;
        // SAFETY: layout has non-zero size (header included).
        unsafe { Self::finish(System.alloc(layout), layout) }
    }

    fn zero_allocate(&self, bytes: usize) -> Option<Handle> {
        let layout = Self::layout_for(bytes)?;
        // SAFETY: layout has non-zero size (header included).
        unsafe { Self::finish(System.alloc_zeroed(layout), layout) }
    }

    unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
        let Some(handle) = handle else {
            return self.allocate(bytes);
        };
        let new_layout = Self::layout_for(bytes)?;
        // SAFETY: caller guarantees `handle` came from this backend; the block
        // was allocated with `old_layout` and `new_layout` keeps its alignment.
        unsafe {
            let (raw, old_layout) = Self::header(handle);
            Self::finish(System.realloc(raw, old_layout, new_layout.size()), new_layout)
        }
    }

    unsafe fn release(&self, handle: Handle) {
        // SAFETY: caller guarantees `handle` came from this backend.
        unsafe {
            let (raw, layout) = Self::header(handle);
            System.dealloc(raw, layout);
        }
    }
}

// ---------------------------------------------------------------------------
// Counting wrapper
// ---------------------------------------------------------------------------

/// Snapshot of [`CountingBackend`] call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrimitiveCalls {
    pub allocate: u64,
    pub zero_allocate: u64,
    pub reallocate: u64,
    pub release: u64,
}

/// Wraps another backend and counts every primitive call routed to it.
pub struct CountingBackend {
    name: &'static str,
    inner: Arc<dyn Backend>,
    allocate: AtomicU64,
    zero_allocate: AtomicU64,
    reallocate: AtomicU64,
    release: AtomicU64,
}

impl CountingBackend {
    #[must_use]
    pub fn new(name: &'static str, inner: Arc<dyn Backend>) -> Self {
        Self {
            name,
            inner,
            allocate: AtomicU64::new(0),
            zero_allocate: AtomicU64::new(0),
            reallocate: AtomicU64::new(0),
            release: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> PrimitiveCalls {
        PrimitiveCalls {
            allocate: self.allocate.load(Ordering::Relaxed),
            zero_allocate: self.zero_allocate.load(Ordering::Relaxed),
            reallocate: self.reallocate.load(Ordering::Relaxed),
            release: self.release.load(Ordering::Relaxed),
        }
    }
}

impl Backend for CountingBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn allocate(&self, bytes: usize) -> Option<Handle> {
        self.allocate.fetch_add(1, Ordering::Relaxed);
        self.inner.allocate(bytes)
    }

    fn zero_allocate(&self, bytes: usize) -> Option<Handle> {
        self.zero_allocate.fetch_add(1, Ordering::Relaxed);
        self.inner.zero_allocate(bytes)
    }

    unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
        self.reallocate.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.reallocate(handle, bytes) }
    }

    unsafe fn release(&self, handle: Handle) {
        self.release.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.release(handle) }
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Built-in backends selectable by name.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Platform,
    System,
}

impl BackendKind {
    /// Parse a backend name (case-insensitive, with aliases).
    pub fn parse(s: &str) -> Result<Self, MemError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" | "libc" | "default" | "malloc" => Ok(Self::Platform),
            "system" | "rust" | "alt" | "alternate" => Ok(Self::System),
            _ => Err(MemError::UnknownBackend(s.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn backend(self) -> Arc<dyn Backend> {
        match self {
            Self::Platform => Arc::new(PlatformBackend),
            Self::System => Arc::new(SystemBackend),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Active set, swaps, registry
// ---------------------------------------------------------------------------

/// Replacement request for the active primitives. Absent slots are kept.
#[derive(Clone, Default)]
pub struct BackendSwap {
    pub allocate: Option<Arc<dyn Backend>>,
    pub zero_allocate: Option<Arc<dyn Backend>>,
    pub reallocate: Option<Arc<dyn Backend>>,
    pub release: Option<Arc<dyn Backend>>,
}

impl BackendSwap {
    /// Replace all four primitives with `backend`.
    #[must_use]
    pub fn all(backend: Arc<dyn Backend>) -> Self {
        Self {
            allocate: Some(Arc::clone(&backend)),
            zero_allocate: Some(Arc::clone(&backend)),
            reallocate: Some(Arc::clone(&backend)),
            release: Some(backend),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allocate.is_none()
            && self.zero_allocate.is_none()
            && self.reallocate.is_none()
            && self.release.is_none()
    }
}

impl fmt::Debug for BackendSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |slot: &Option<Arc<dyn Backend>>| slot.as_ref().map(|b| b.name());
        f.debug_struct("BackendSwap")
            .field("allocate", &name(&self.allocate))
            .field("zero_allocate", &name(&self.zero_allocate))
            .field("reallocate", &name(&self.reallocate))
            .field("release", &name(&self.release))
            .finish()
    }
}

/// Names of the backends currently serving each primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendNames {
    pub allocate: &'static str,
    pub zero_allocate: &'static str,
    pub reallocate: &'static str,
    pub release: &'static str,
}

/// The four active primitives plus the backend-side live counter.
///
/// `live_count` rises on every successful allocation and falls on every
/// release routed through the set. It is not touched by tracker evictions,
/// so it drifts above the tracker's count once records leave the window.
pub struct BackendSet {
    allocate: Arc<dyn Backend>,
    zero_allocate: Arc<dyn Backend>,
    reallocate: Arc<dyn Backend>,
    release: Arc<dyn Backend>,
    live_count: usize,
}

impl BackendSet {
    /// All four primitives from one backend.
    #[must_use]
    pub fn uniform(backend: Arc<dyn Backend>) -> Self {
        Self {
            allocate: Arc::clone(&backend),
            zero_allocate: Arc::clone(&backend),
            reallocate: Arc::clone(&backend),
            release: backend,
            live_count: 0,
        }
    }

    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live_count
    }

    #[must_use]
    pub fn names(&self) -> BackendNames {
        BackendNames {
            allocate: self.allocate.name(),
            zero_allocate: self.zero_allocate.name(),
            reallocate: self.reallocate.name(),
            release: self.release.name(),
        }
    }

    pub fn allocate(&mut self, bytes: usize) -> Option<Handle> {
        let handle = self.allocate.allocate(bytes)?;
        self.live_count += 1;
        Some(handle)
    }

    pub fn zero_allocate(&mut self, bytes: usize) -> Option<Handle> {
        let handle = self.zero_allocate.zero_allocate(bytes)?;
        self.live_count += 1;
        Some(handle)
    }

    /// # Safety
    ///
    /// Same contract as [`Backend::reallocate`] for the active reallocate slot.
    pub unsafe fn reallocate(&mut self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
        // SAFETY: forwarded caller contract.
        let resized = unsafe { self.reallocate.reallocate(handle, bytes) };
        if handle.is_none() && resized.is_some() {
            self.live_count += 1;
        }
        resized
    }

    /// Release through the active release slot.
    ///
    /// # Safety
    ///
    /// Same contract as [`Backend::release`] for the active release slot.
    pub unsafe fn release(&mut self, handle: Handle) {
        // SAFETY: forwarded caller contract.
        unsafe { self.release.release(handle) };
        self.live_count = self.live_count.saturating_sub(1);
    }

    /// Count a block the backend already gave back (e.g. `realloc(p, 0)`).
    pub fn forget_one(&mut self) {
        self.live_count = self.live_count.saturating_sub(1);
    }

    /// Replace the slots present in `swap`; keep the rest.
    pub fn apply(&mut self, swap: BackendSwap) {
        if let Some(backend) = swap.allocate {
            self.allocate = backend;
        }
        if let Some(backend) = swap.zero_allocate {
            self.zero_allocate = backend;
        }
        if let Some(backend) = swap.reallocate {
            self.reallocate = backend;
        }
        if let Some(backend) = swap.release {
            self.release = backend;
        }
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSet")
            .field("names", &self.names())
            .field("live_count", &self.live_count)
            .finish()
    }
}

/// Lazily-initialized holder of the active [`BackendSet`].
#[derive(Debug)]
pub struct BackendRegistry {
    active: Option<BackendSet>,
    default_kind: BackendKind,
}

impl BackendRegistry {
    #[must_use]
    pub const fn new(default_kind: BackendKind) -> Self {
        Self {
            active: None,
            default_kind,
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Install the default backend with a zeroed live counter.
    ///
    /// Only the first call has an effect; returns whether this call did it.
    pub fn initialize_default(&mut self) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(BackendSet::uniform(self.default_kind.backend()));
        true
    }

    /// The active set, installing the default first if needed.
    pub fn active(&mut self) -> &mut BackendSet {
        let kind = self.default_kind;
        self.active
            .get_or_insert_with(|| BackendSet::uniform(kind.backend()))
    }
}
