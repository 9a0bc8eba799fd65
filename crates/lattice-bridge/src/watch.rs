use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use lattice_layout::flags;
use lattice_shared::{SharedBuffer, WaitOutcome};

/// How a context parks on a flag. Dedicated workers block on the wait
/// table; main-thread-like contexts that must not block poll at roughly one
/// frame interval instead. Picked once at init from a capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Blocking,
    Polling { interval: Duration },
}

impl WaitMode {
    /// Polling at the conventional frame cadence.
    pub fn frame_polling() -> WaitMode {
        WaitMode::Polling {
            interval: Duration::from_millis(16),
        }
    }
}

/// Outcome of one park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Park {
    /// Flag changed; carries the newly observed value.
    Changed(i32),
    /// Timeout elapsed; carries the last observed value.
    TimedOut(i32),
    /// The shutdown flag is set; the caller should unwind.
    Shutdown,
}

/// Notification posted by a watcher thread to its owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochChange {
    pub flag: usize,
    pub value: i32,
}

/// Cooperative wait on epoch flags. Shutdown is observed at every park
/// boundary: waits are sliced so a parked consumer wakes within about one
/// pulse interval of the shutdown flag being raised even if nobody notifies
/// its own flag.
#[derive(Clone)]
pub struct EpochWatcher {
    buffer: Arc<SharedBuffer>,
    mode: WaitMode,
    shutdown_slice: Duration,
}

impl EpochWatcher {
    pub fn new(buffer: Arc<SharedBuffer>, mode: WaitMode) -> EpochWatcher {
        EpochWatcher {
            buffer,
            mode,
            shutdown_slice: Duration::from_millis(16),
        }
    }

    pub fn with_shutdown_slice(mut self, slice: Duration) -> EpochWatcher {
        self.shutdown_slice = slice;
        self
    }

    pub fn mode(&self) -> WaitMode {
        self.mode
    }

    /// Wait until the flag differs from `expected` or the timeout elapses;
    /// returns the current value either way. Callers that need to tell
    /// shutdown apart from a value change use `park`.
    pub fn wait_for_change(&self, flag: usize, expected: i32, timeout: Option<Duration>) -> i32 {
        match self.park(flag, expected, timeout) {
            Park::Changed(v) | Park::TimedOut(v) => v,
            Park::Shutdown => self.buffer.flag_load(flag),
        }
    }

    /// Park on a flag, observing the shutdown flag at every slice boundary.
    pub fn park(&self, flag: usize, expected: i32, timeout: Option<Duration>) -> Park {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.buffer.flag_load(flags::SHUTDOWN) != 0 {
                return Park::Shutdown;
            }
            let current = self.buffer.flag_load(flag);
            if current != expected {
                return Park::Changed(current);
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Park::TimedOut(current);
                    }
                    Some(deadline - now)
                }
            };
            let slice = remaining.map_or(self.shutdown_slice, |r| r.min(self.shutdown_slice));
            match self.mode {
                WaitMode::Blocking => {
                    // Outcome is irrelevant; the loop re-checks everything.
                    let _: WaitOutcome = self.buffer.wait(flag, expected, Some(slice));
                }
                WaitMode::Polling { interval } => {
                    thread::sleep(slice.min(interval));
                }
            }
        }
    }

    /// Host the watcher in a dedicated thread that posts an `EpochChange`
    /// whenever the flag moves, letting the owning context run its drain
    /// logic on its own schedule. The thread exits on shutdown, on a
    /// context-id change, or once the receiver is dropped.
    pub fn spawn_thread(&self, flag: usize) -> (thread::JoinHandle<()>, mpsc::Receiver<EpochChange>) {
        let (tx, rx) = mpsc::channel();
        let watcher = self.clone();
        let context_hash = watcher.buffer.flag_load(flags::CONTEXT_ID_HASH);
        let handle = thread::spawn(move || {
            let mut last = watcher.buffer.flag_load(flag);
            loop {
                if watcher.buffer.flag_load(flags::CONTEXT_ID_HASH) != context_hash {
                    debug!(flag, "watcher thread exiting: stale context");
                    return;
                }
                match watcher.park(flag, last, Some(watcher.shutdown_slice)) {
                    Park::Changed(value) => {
                        last = value;
                        if tx.send(EpochChange { flag, value }).is_err() {
                            return;
                        }
                    }
                    Park::TimedOut(_) => {}
                    Park::Shutdown => {
                        debug!(flag, "watcher thread exiting: shutdown");
                        return;
                    }
                }
            }
        });
        (handle, rx)
    }
}
