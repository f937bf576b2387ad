// Every export takes raw pointers from C callers with the C allocator's
// contract, so per-function safety docs would repeat it.
#![allow(clippy::missing_safety_doc)]
//! # bkit-mem-abi
//!
//! `extern "C"` boundary for the bkit-mem allocation front end.
//!
//! This crate produces a `cdylib` exposing the toolkit's `bk_mem_*` entry
//! points. Each one forwards to the process-wide front end
//! ([`bkit_mem::global`]), which is configured from the environment on
//! first use.
//!
//! ```text
//! C caller -> bk_mem_* (this crate) -> MemoryFrontEnd -> active backend
//! ```

#[macro_use]
mod macros;

pub mod calls;

// Gated behind cfg(not(test)) so the unit-test binary never exports the
// bk_mem_* symbols or touches the process-wide front end.
#[cfg(not(test))]
pub mod memory_abi;

pub use calls::MemoryCalls;
