use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lattice_layout::flags;
use lattice_shared::{SharedBuffer, WaitOutcome};

use crate::clock::HostClock;

const SECOND_NS: u64 = 1_000_000_000;

/// Pulse rates. The foreground rate applies while the host surface is
/// visible; the background rate keeps hidden surfaces responsive without
/// burning cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub target_fps: u32,
    pub background_fps: u32,
}

impl Default for PulseConfig {
    fn default() -> Self {
        PulseConfig {
            target_fps: 60,
            background_fps: 4,
        }
    }
}

impl PulseConfig {
    fn interval_ns(fps: u32) -> u64 {
        SECOND_NS / u64::from(fps.max(1))
    }
}

/// Advances `SYSTEM_PULSE` on a jitter-compensated schedule and
/// `SYSTEM_EPOCH` once per second. Deadlines are absolute: the next tick is
/// `last + interval` against the clock, so a late wakeup does not shift the
/// cadence.
pub struct PulseClock {
    buffer: Arc<SharedBuffer>,
    config: PulseConfig,
    deadline_ns: u64,
    next_epoch_ns: u64,
}

impl PulseClock {
    pub fn new(buffer: Arc<SharedBuffer>, config: PulseConfig, now_ns: u64) -> PulseClock {
        PulseClock {
            buffer,
            config,
            deadline_ns: now_ns,
            next_epoch_ns: now_ns + SECOND_NS,
        }
    }

    /// Current tick interval, by visibility.
    pub fn interval_ns(&self) -> u64 {
        let visible = self.buffer.flag_load(flags::SYSTEM_VISIBILITY) != 0;
        PulseConfig::interval_ns(if visible {
            self.config.target_fps
        } else {
            self.config.background_fps
        })
    }

    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    /// Fire the tick if its deadline has passed. Returns true if a pulse
    /// was published. Test harnesses drive this directly with a fake clock.
    pub fn tick_due(&mut self, now_ns: u64) -> bool {
        if now_ns < self.deadline_ns {
            return false;
        }
        self.buffer.flag_add(flags::SYSTEM_PULSE, 1);
        self.buffer.notify(flags::SYSTEM_PULSE);

        if now_ns >= self.next_epoch_ns {
            self.buffer.flag_add(flags::SYSTEM_EPOCH, 1);
            self.buffer.notify(flags::SYSTEM_EPOCH);
            let next = self.next_epoch_ns + SECOND_NS;
            self.next_epoch_ns = if next > now_ns { next } else { now_ns + SECOND_NS };
        }

        let interval = self.interval_ns();
        let next = self.deadline_ns + interval;
        self.deadline_ns = if next > now_ns {
            next
        } else {
            // Hopelessly behind; re-anchor instead of bursting catch-up
            // ticks.
            now_ns + interval
        };
        true
    }

    /// Run until shutdown. Naps park on the shutdown flag so a raised flag
    /// ends the sleep immediately instead of after the current interval.
    pub fn run(mut self, clock: &dyn HostClock) {
        debug!(
            target_fps = self.config.target_fps,
            background_fps = self.config.background_fps,
            "pulse clock running"
        );
        loop {
            if self.buffer.flag_load(flags::SHUTDOWN) != 0 {
                debug!("pulse clock exiting on shutdown");
                return;
            }
            let now = clock.now_ns();
            if !self.tick_due(now) {
                let nap = Duration::from_nanos(self.deadline_ns - now);
                if let WaitOutcome::Changed(_) = self.buffer.wait(flags::SHUTDOWN, 0, Some(nap)) {
                    debug!("pulse clock exiting on shutdown");
                    return;
                }
            }
        }
    }

    /// Host the clock on its own thread.
    pub fn spawn(
        buffer: Arc<SharedBuffer>,
        clock: Arc<dyn HostClock>,
        config: PulseConfig,
    ) -> thread::JoinHandle<()> {
        let state = PulseClock::new(buffer, config, clock.now_ns());
        thread::Builder::new()
            .name("pulse-clock".to_string())
            .spawn(move || state.run(clock.as_ref()))
            .expect("spawn pulse clock thread")
    }
}
