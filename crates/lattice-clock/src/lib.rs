//! The heartbeat of the bridge.
//!
//! A dedicated thread advances the pulse flag at a visibility-dependent
//! rate; every worker loop parks on that flag instead of busy-waiting. The
//! host clock is a trait so tests drive the tick logic with a fake.

mod clock;
mod pulse;

pub use clock::{FakeHostClock, HostClock, MonotonicClock};
pub use pulse::{PulseClock, PulseConfig};
