use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// High-resolution monotonic time source.
pub trait HostClock: Send + Sync {
    fn now_ns(&self) -> u64;

    /// Coarse sleep used between ticks. Implementations need not be exact;
    /// the pulse loop computes deadlines against absolute timestamps.
    fn sleep(&self, duration: Duration);
}

/// The real clock: monotonic instants since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests: time moves only when told to.
#[derive(Default)]
pub struct FakeHostClock {
    ns: AtomicU64,
}

impl FakeHostClock {
    pub fn new(start_ns: u64) -> FakeHostClock {
        FakeHostClock {
            ns: AtomicU64::new(start_ns),
        }
    }

    pub fn set_ns(&self, ns: u64) {
        self.ns.store(ns, Ordering::SeqCst);
    }

    pub fn advance_ns(&self, delta: u64) {
        self.ns.fetch_add(delta, Ordering::SeqCst);
    }
}

impl HostClock for FakeHostClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        // Sleeping advances fake time so loops driven by this clock make
        // progress instead of spinning.
        self.advance_ns(duration.as_nanos() as u64);
    }
}
