//! Workload harness for bkit-mem.
//!
//! Drives a private [`bkit_mem::MemoryFrontEnd`] through a deterministic
//! allocate/release/swap workload and reports what the front end saw, as
//! JSON. It is a diagnostic, not a benchmark; the criterion benches live in
//! the core crate.

#![forbid(unsafe_code)]

pub mod workload;

pub use workload::{HarnessError, WorkloadReport, WorkloadSpec, run_workload, write_report};
