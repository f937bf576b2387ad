use bkit_mem::{Backend, Handle, MemoryFrontEnd, PlatformBackend, ReleaseOutcome, TrackerConfig};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
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
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

/// Mirror of the tracking window in slot order, plus blocks that fell out.
#[derive(Default)]
struct Model {
    window: Vec<(Handle, usize)>,
    leaked: Vec<Handle>,
    backend_live: usize,
    total_bytes: u64,
    wraps: u64,
}

impl Model {
    fn track(&mut self, capacity: usize, handle: Handle, size: usize) {
        self.backend_live += 1;
        self.total_bytes += size as u64;
        if self.window.len() < capacity {
            self.window.push((handle, size));
            return;
        }
        // Last slot is overwritten; the rest of the window becomes unreachable.
        let old = std::mem::take(&mut self.window);
        self.leaked.extend(old.iter().map(|(h, _)| *h));
        self.window.push((handle, size));
        self.wraps += 1;
    }

    fn release_at(&mut self, index: usize) -> Handle {
        let handle = self.window.swap_remove(index).0;
        self.backend_live -= 1;
        handle
    }
}

fn window_of(front: &MemoryFrontEnd) -> Vec<(Handle, usize)> {
    front.inspect(|table| table.window().map(|r| (r.handle, r.size)).collect())
}

#[test]
fn deterministic_front_end_sequences_hold_tracker_invariants() {
    // Bounded invariant pressure against a mirror model, small capacity so
    // wraparound happens often.
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const CAPACITY: usize = 8;

    for seed in SEEDS {
        let front =
            MemoryFrontEnd::with_config(TrackerConfig::default().with_capacity(CAPACITY).unwrap());
        let mut rng = XorShift64::new(seed);
        let mut model = Model::default();

        for step in 0..STEPS {
            let op = rng.gen_range_usize(0, 99);
            match op {
                // allocate (biased)
                0..=49 => {
                    let size = rng.gen_range_usize(0, 512);
                    let handle = if op % 2 == 0 {
                        front.allocate(size)
                    } else {
                        front.zero_allocate(size)
                    };
                    let handle = handle.unwrap_or_else(|e| panic!("seed={seed} step={step}: {e}"));
                    model.track(CAPACITY, handle, size);
                }
                // release a tracked handle
                50..=74 => {
                    if model.window.is_empty() {
                        continue;
                    }
                    let index = rng.gen_range_usize(0, model.window.len() - 1);
                    let handle = model.release_at(index);
                    assert_eq!(
                        front.release(handle),
                        ReleaseOutcome::Released,
                        "seed={seed} step={step}: tracked release"
                    );
                    assert_eq!(
                        front.release(handle),
                        ReleaseOutcome::Untracked,
                        "seed={seed} step={step}: second release is a no-op"
                    );
                }
                // release a handle that fell out of the window
                75..=84 => {
                    let Some(handle) = model.leaked.pop() else {
                        continue;
                    };
                    assert_eq!(
                        front.release(handle),
                        ReleaseOutcome::Untracked,
                        "seed={seed} step={step}: evicted handle is untracked"
                    );
                    // SAFETY: untracked platform block owned by the test.
                    unsafe { PlatformBackend.release(handle) };
                }
                // resize a tracked handle in place
                85..=94 => {
                    if model.window.is_empty() {
                        continue;
                    }
                    let index = rng.gen_range_usize(0, model.window.len() - 1);
                    let size = rng.gen_range_usize(1, 4096);
                    let old = model.window[index].0;
                    // SAFETY: `old` is a live tracked platform block.
                    let new = unsafe { front.reallocate(Some(old), size) }
                        .unwrap_or_else(|e| panic!("seed={seed} step={step}: {e}"));
                    model.window[index] = (new, size);
                }
                // collect
                _ => {
                    let expected = model.window.len();
                    assert_eq!(
                        front.collect_all(),
                        expected,
                        "seed={seed} step={step}: drain covers exactly the window"
                    );
                    model.backend_live -= expected;
                    model.window.clear();
                    assert_eq!(front.collect_all(), 0, "seed={seed} step={step}: idempotent");
                }
            }

            assert_eq!(
                window_of(&front),
                model.window,
                "seed={seed} step={step}: window matches model"
            );
            let stats = front.stats();
            assert!(stats.tracked <= CAPACITY, "seed={seed} step={step}");
            assert_eq!(stats.tracked, model.window.len(), "seed={seed} step={step}");
            assert_eq!(
                stats.backend_live_count, model.backend_live,
                "seed={seed} step={step}: backend counter"
            );
            assert_eq!(stats.total_bytes_allocated, model.total_bytes, "seed={seed}");
            assert_eq!(stats.wraparounds, model.wraps, "seed={seed}");
        }

        front.collect_all();
        for handle in model.leaked {
            // SAFETY: untracked platform blocks owned by the test.
            unsafe { PlatformBackend.release(handle) };
        }
    }
}

#[test]
fn wraparound_keeps_only_most_recent_handle() {
    const CAPACITY: usize = 16;
    let front =
        MemoryFrontEnd::with_config(TrackerConfig::default().with_capacity(CAPACITY).unwrap());
    let handles: Vec<_> = (0..=CAPACITY).map(|_| front.allocate(8).unwrap()).collect();

    assert_eq!(front.live_count(), 1);
    assert!(front.is_tracked(handles[CAPACITY]));
    assert!(!front.is_tracked(handles[0]));
    assert_eq!(front.stats().wraparounds, 1);
    assert_eq!(front.stats().backend_live_count, CAPACITY + 1);

    assert_eq!(front.collect_all(), 1);
    // The block in the last slot was overwritten by the wrap; every other
    // earlier block is still allocated but untracked.
    for &handle in &handles[..CAPACITY] {
        assert_eq!(front.release(handle), ReleaseOutcome::Untracked);
        // SAFETY: untracked platform blocks owned by the test.
        unsafe { PlatformBackend.release(handle) };
    }
}
