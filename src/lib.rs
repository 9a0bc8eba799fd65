//! Shared-memory bridge for a polyglot in-browser runtime.
//!
//! One linear buffer shared by every execution context; a fixed layout of
//! typed regions inside it; an atomic flag table as the sole signaling
//! substrate; and lock-free queues carrying all cross-context work. The
//! member crates split the concerns:
//!
//! - [`layout`]: the schema of regions, flags, tiers, and owner masks.
//! - [`shared`]: the buffer itself and the wait/notify substrate.
//! - [`bridge`]: per-context handles, region guards, epoch watchers.
//! - [`ipc`]: the outbox rings, the mesh-event queue, the arena queues.
//! - [`clock`]: the pulse heartbeat.
//! - [`dispatch`]: the worker pool and call routing.

pub use lattice_bridge as bridge;
pub use lattice_clock as clock;
pub use lattice_dispatch as dispatch;
pub use lattice_ipc as ipc;
pub use lattice_layout as layout;
pub use lattice_shared as shared;

pub use lattice_bridge::{Bridge, BridgeError, EpochWatcher, Park, WaitMode};
pub use lattice_clock::{FakeHostClock, HostClock, MonotonicClock, PulseClock, PulseConfig};
pub use lattice_dispatch::{DispatchError, Dispatcher, ModuleRuntime};
pub use lattice_ipc::{
    ArenaClient, ArenaGrant, ArenaServer, IpcError, MeshConsumer, MeshProducer, OutboxConsumer,
    OutboxProducer,
};
pub use lattice_layout::{flags, Layout, Owner, RegionId, Tier};
pub use lattice_shared::SharedBuffer;
