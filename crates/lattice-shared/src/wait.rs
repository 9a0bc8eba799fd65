use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use lattice_layout::FLAG_COUNT;

/// Result of parking on a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The flag no longer holds the expected value.
    Changed(i32),
    /// The timeout elapsed; the flag still held the expected value at the
    /// last check.
    TimedOut(i32),
}

impl WaitOutcome {
    pub fn value(self) -> i32 {
        match self {
            WaitOutcome::Changed(v) | WaitOutcome::TimedOut(v) => v,
        }
    }
}

#[derive(Default)]
struct WaitSlot {
    lock: Mutex<()>,
    cv: Condvar,
}

/// One condvar per flag index. Writers bump the flag atomically and then
/// call `notify`; taking the slot lock inside `notify` closes the window
/// between a waiter's value check and its park, so no wakeup is lost.
pub(crate) struct WaitTable {
    slots: [WaitSlot; FLAG_COUNT],
}

impl WaitTable {
    pub fn new() -> WaitTable {
        WaitTable {
            slots: std::array::from_fn(|_| WaitSlot::default()),
        }
    }

    pub fn wait(
        &self,
        index: usize,
        timeout: Option<Duration>,
        load: impl Fn() -> i32,
        expected: i32,
    ) -> WaitOutcome {
        let slot = &self.slots[index];
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let current = load();
            if current != expected {
                return WaitOutcome::Changed(current);
            }
            match deadline {
                None => {
                    guard = slot.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut(current);
                    }
                    let (g, _) = slot
                        .cv
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = g;
                }
            }
        }
    }

    pub fn notify(&self, index: usize) {
        let slot = &self.slots[index];
        drop(slot.lock.lock().unwrap_or_else(PoisonError::into_inner));
        slot.cv.notify_all();
    }
}
