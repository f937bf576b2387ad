//! Deterministic allocate/release/swap workloads.

use std::path::Path;
use std::thread;

use bkit_mem::{
    BackendKind, DEFAULT_CAPACITY, Handle, MemError, MemoryFrontEnd, MemoryStats, ReleaseOutcome,
    TrackerConfig,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Largest block a worker asks for.
const MAX_BLOCK: usize = 1024;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("config: {0}")]
    Config(#[from] MemError),
    #[error("thread count must be at least 1")]
    NoThreads,
    #[error("workload thread panicked")]
    WorkerPanicked,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    pub capacity: usize,
    pub backend: BackendKind,
    /// Total allocations, split across threads.
    pub allocs: usize,
    /// Each thread releases one of its own blocks after every n-th
    /// allocation. 0 never releases.
    pub release_every: usize,
    /// Swap every primitive to this backend once the workers finish.
    pub swap_to: Option<BackendKind>,
    pub threads: usize,
    pub seed: u64,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            backend: BackendKind::Platform,
            allocs: 4096,
            release_every: 2,
            swap_to: None,
            threads: 1,
            seed: 0xDEAD_BEEF,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub spec: WorkloadSpec,
    pub before: MemoryStats,
    pub after: MemoryStats,
    pub allocations: u64,
    pub failed_allocations: u64,
    pub releases: u64,
    pub untracked_releases: u64,
    /// Blocks still held by workers that the tracker could no longer see
    /// when the workers finished. These are never released.
    pub out_of_window: usize,
    pub drained_by_swap: usize,
    pub drained_by_collect: usize,
    pub wrapped: bool,
}

#[derive(Debug, Clone, Copy)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = (high_inclusive - low) as u64 + 1;
        low + (self.next_u64() % span) as usize
    }
}

fn worker_seed(seed: u64, worker: usize) -> u64 {
    seed ^ (worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Allocations for `worker` when `total` is split over `threads`.
fn share(total: usize, threads: usize, worker: usize) -> usize {
    total / threads + usize::from(worker < total % threads)
}

#[derive(Debug, Default)]
struct WorkerTally {
    allocations: u64,
    failed_allocations: u64,
    releases: u64,
    untracked_releases: u64,
    held: Vec<Handle>,
}

fn run_worker(
    front: &MemoryFrontEnd,
    seed: u64,
    allocs: usize,
    release_every: usize,
) -> WorkerTally {
    let mut rng = XorShift64::new(seed);
    let mut tally = WorkerTally::default();

    for i in 0..allocs {
        let bytes = rng.gen_range_usize(1, MAX_BLOCK);
        let result = if rng.next_u64() % 4 == 0 {
            front.zero_allocate(bytes)
        } else {
            front.allocate(bytes)
        };
        match result {
            Ok(handle) => {
                tally.allocations += 1;
                tally.held.push(handle);
            }
            Err(err) => {
                tally.failed_allocations += 1;
                debug!(%err, "workload allocation failed");
            }
        }

        if release_every > 0 && (i + 1) % release_every == 0 && !tally.held.is_empty() {
            let index = rng.gen_range_usize(0, tally.held.len() - 1);
            match front.release(tally.held.swap_remove(index)) {
                ReleaseOutcome::Released => tally.releases += 1,
                ReleaseOutcome::Untracked => tally.untracked_releases += 1,
            }
        }
    }
    tally
}

/// Run `spec` against a fresh front end.
pub fn run_workload(spec: &WorkloadSpec) -> Result<WorkloadReport, HarnessError> {
    if spec.threads == 0 {
        return Err(HarnessError::NoThreads);
    }
    let config = TrackerConfig::default()
        .with_capacity(spec.capacity)?
        .with_backend(spec.backend);
    let front = MemoryFrontEnd::with_config(config);
    front.initialize_default();
    let before = front.stats();
    info!(?spec, "workload started");

    let release_every = spec.release_every;
    let tallies = thread::scope(|scope| {
        let workers: Vec<_> = (0..spec.threads)
            .map(|worker| {
                let front = &front;
                let seed = worker_seed(spec.seed, worker);
                let allocs = share(spec.allocs, spec.threads, worker);
                scope.spawn(move || run_worker(front, seed, allocs, release_every))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().map_err(|_| HarnessError::WorkerPanicked))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut report = WorkloadReport {
        spec: *spec,
        before,
        after: before,
        allocations: 0,
        failed_allocations: 0,
        releases: 0,
        untracked_releases: 0,
        out_of_window: 0,
        drained_by_swap: 0,
        drained_by_collect: 0,
        wrapped: false,
    };
    for tally in &tallies {
        report.allocations += tally.allocations;
        report.failed_allocations += tally.failed_allocations;
        report.releases += tally.releases;
        report.untracked_releases += tally.untracked_releases;
        report.out_of_window += tally
            .held
            .iter()
            .filter(|&&handle| !front.is_tracked(handle))
            .count();
    }

    if let Some(kind) = spec.swap_to {
        report.drained_by_swap = front.swap_backend_all(kind.backend());
    }
    report.drained_by_collect = front.collect_all();
    report.after = front.stats();
    report.wrapped = report.after.wraparounds > 0;

    info!(
        allocations = report.allocations,
        releases = report.releases,
        out_of_window = report.out_of_window,
        wrapped = report.wrapped,
        "workload finished"
    );
    Ok(report)
}

/// Pretty JSON to `output`, or stdout when `None`.
pub fn write_report(report: &WorkloadReport, output: Option<&Path>) -> Result<(), HarnessError> {
    let body = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, body)?;
        }
        None => println!("{body}"),
    }
    Ok(())
}
