//! Per-context handle over the shared buffer.
//!
//! A `Bridge` caches typed region views, carries the context-id hash, and
//! exposes the flag protocol used to publish and observe region mutations.
//! The `guard` module enforces writer discipline; the `watch` module parks
//! consumers on epoch flags in both blocking and polling environments.

pub mod ambient;
mod bridge;
mod error;
mod guard;
mod watch;

pub use bridge::{Bridge, RegionView};
pub use error::BridgeError;
pub use guard::{owner_name, GuardTable, ViolationReport, WriteLease};
pub use watch::{EpochChange, EpochWatcher, Park, WaitMode};
