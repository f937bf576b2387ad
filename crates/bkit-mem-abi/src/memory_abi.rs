//! Exported allocation entry points over the process-wide front end.
//!
//! Sizes and counts cross the boundary as 32-bit values, as in the C
//! header. Failures, panics included, come back as null pointers or zero.

use std::ffi::{c_int, c_void};

use bkit_mem::{BackendKind, Handle, copy_bytes_raw, global};

use crate::calls::MemoryCalls;

fn to_ptr(handle: Option<Handle>) -> *mut c_void {
    handle.map_or(std::ptr::null_mut(), |h| h.as_ptr().cast())
}

fn saturate_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

abi_fn! {
    /// Install the default backend. Returns 1 if this call installed it.
    fn bk_mem_init() -> c_int = 0; {
        c_int::from(global().initialize_default())
    }
}

abi_fn! {
    fn bk_mem_alloc(bytes: u32) -> *mut c_void = std::ptr::null_mut(); {
        to_ptr(global().allocate(bytes as usize).ok())
    }
}

abi_fn! {
    fn bk_mem_clearalloc(bytes: u32) -> *mut c_void = std::ptr::null_mut(); {
        to_ptr(global().zero_allocate(bytes as usize).ok())
    }
}

abi_fn! {
    /// `ptr` may be null, in which case this allocates.
    fn bk_mem_realloc(ptr: *mut c_void, bytes: u32) -> *mut c_void = std::ptr::null_mut(); {
        to_ptr(global().reallocate(Handle::from_ptr(ptr.cast()), bytes as usize).ok())
    }
}

abi_fn! {
    /// Returns 1 if `ptr` was tracked and released, 0 otherwise.
    fn bk_mem_free(ptr: *mut c_void) -> c_int = 0; {
        match Handle::from_ptr(ptr.cast()) {
            Some(handle) => c_int::from(global().release(handle).is_released()),
            None => 0,
        }
    }
}

abi_fn! {
    /// Release every tracked block. Returns how many were released.
    fn bk_mem_gc() -> u32 = 0; {
        saturate_u32(global().collect_all())
    }
}

abi_fn! {
    fn bk_mem_alloc_count() -> i32 = 0; {
        i32::try_from(global().live_count()).unwrap_or(i32::MAX)
    }
}

abi_fn! {
    /// Copy `count` bytes forward. Returns 0 if either pointer is null.
    fn bk_mem_copy(dst: *mut c_void, src: *const c_void, count: u32) -> u32 = 0; {
        saturate_u32(copy_bytes_raw(dst.cast(), src.cast(), count as usize))
    }
}

abi_fn! {
    /// Drain every tracked block, then replace the primitives whose table
    /// entries are non-null. A null table only drains.
    fn bk_mem_changecalls(calls: *const MemoryCalls) {
        let swap = match calls.as_ref() {
            Some(calls) => calls.into_swap(),
            None => Default::default(),
        };
        global().swap_backend(swap);
    }
}

abi_fn! {
    /// Drain every tracked block, then route all four primitives to the
    /// Rust system allocator.
    fn bk_mem_use_system_allocator() {
        global().swap_backend_all(BackendKind::System.backend());
    }
}
