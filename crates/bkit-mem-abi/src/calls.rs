//! C function tables as allocator backends.
//!
//! A caller hands `bk_mem_changecalls` a table of up to four
//! nullable function pointers. Each present pointer replaces the matching
//! primitive of the active backend; null pointers keep what is there.

use std::ffi::c_void;
use std::sync::Arc;

use bkit_mem::{Backend, BackendSwap, Handle};

pub type MallocFn = unsafe extern "C" fn(size: u32) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void);
pub type ReallocFn = unsafe extern "C" fn(ptr: *mut c_void, size: u32) -> *mut c_void;
pub type CallocFn = unsafe extern "C" fn(nmemb: u32, size: u32) -> *mut c_void;

/// `bk_memory_calls`: four nullable allocator entry points, in C field order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCalls {
    pub malloc: Option<MallocFn>,
    pub free: Option<FreeFn>,
    pub realloc: Option<ReallocFn>,
    pub calloc: Option<CallocFn>,
}

impl MemoryCalls {
    /// A swap carrying one slot per non-null pointer.
    ///
    /// # Safety
    ///
    /// Every present pointer must behave like its C namesake: `malloc` and
    /// `calloc` return null or a fresh block of at least the requested size
    /// (`calloc` zero-filled), `realloc` accepts null or a live block, and
    /// `free` accepts any block the other three returned.
    #[must_use]
    pub unsafe fn into_swap(self) -> BackendSwap {
        let backend: Arc<dyn Backend> = Arc::new(ForeignBackend { calls: self });
        let slot = |present: bool| present.then(|| Arc::clone(&backend));
        BackendSwap {
            allocate: slot(self.malloc.is_some()),
            zero_allocate: slot(self.calloc.is_some()),
            reallocate: slot(self.realloc.is_some()),
            release: slot(self.free.is_some()),
        }
    }
}

/// Backend over a [`MemoryCalls`] table. Missing entries fail their
/// requests; they are never installed by [`MemoryCalls::into_swap`].
#[derive(Debug)]
struct ForeignBackend {
    calls: MemoryCalls,
}

impl Backend for ForeignBackend {
    fn name(&self) -> &'static str {
        "foreign"
    }

    fn allocate(&self, bytes: usize) -> Option<Handle> {
        let size = u32::try_from(bytes).ok()?;
        let malloc = self.calls.malloc?;
        // SAFETY: `into_swap` caller vouched for the table.
        Handle::from_ptr(unsafe { malloc(size) }.cast())
    }

    fn zero_allocate(&self, bytes: usize) -> Option<Handle> {
        let size = u32::try_from(bytes).ok()?;
        let calloc = self.calls.calloc?;
        // SAFETY: as above.
        Handle::from_ptr(unsafe { calloc(1, size) }.cast())
    }

    unsafe fn reallocate(&self, handle: Option<Handle>, bytes: usize) -> Option<Handle> {
        let size = u32::try_from(bytes).ok()?;
        let realloc = self.calls.realloc?;
        let ptr = handle.map_or(std::ptr::null_mut(), Handle::as_ptr);
        // SAFETY: caller guarantees `ptr` is null or a live block this table
        // accepts.
        Handle::from_ptr(unsafe { realloc(ptr.cast(), size) }.cast())
    }

    unsafe fn release(&self, handle: Handle) {
        if let Some(free) = self.calls.free {
            // SAFETY: caller guarantees `handle` is a live block.
            unsafe { free(handle.as_ptr().cast()) };
        }
    }
}
