//! Atomic flag table indices.
//!
//! The first 128 bytes of the shared buffer are a table of 32-bit signed
//! atomic integers. Indices listed here are the assigned ones; the rest are
//! reserved. Flag values are opaque; only a change in value is meaningful
//! to waiters.

/// Non-zero requests an orderly halt of every worker loop.
pub const SHUTDOWN: usize = 0;

/// Layout magic stamp, written once by the first initializer.
pub const LAYOUT_MAGIC: usize = 1;

/// Layout version stamp, validated by late attachers.
pub const LAYOUT_VERSION: usize = 2;

/// Coarse monotonic tick, advanced about once per second by the pulse clock.
pub const SYSTEM_EPOCH: usize = 7;

/// Heartbeat counter; consumers park on this to throttle their loops.
pub const SYSTEM_PULSE: usize = 10;

/// 1 while the host surface is visible, 0 otherwise. Advisory.
pub const SYSTEM_VISIBILITY: usize = 11;

/// 1 high-performance, 0 throttled. Advisory.
pub const SYSTEM_POWER_STATE: usize = 12;

/// Epoch for the inbox region.
pub const INBOX_DIRTY: usize = 13;

/// Epoch for the host-bound outbox ring.
pub const OUTBOX_HOST_DIRTY: usize = 14;

/// Epoch for the kernel-bound outbox ring.
pub const OUTBOX_KERNEL_DIRTY: usize = 15;

/// Epoch for the mesh-event queue.
pub const MESH_EVENT_EPOCH: usize = 16;

/// Epoch for the module-registry region.
pub const REGISTRY_EPOCH: usize = 17;

/// Consumer cursor of the mesh-event queue (monotonic slot index).
pub const MESH_HEAD: usize = 18;

/// Producer cursor of the mesh-event queue (monotonic slot index).
pub const MESH_TAIL: usize = 19;

/// Arena allocator generation; also signals arena queue activity.
pub const ARENA_ALLOCATOR: usize = 20;

/// Hash identifying the current init context; loops from a previous
/// initialization observe a different value here and exit.
pub const CONTEXT_ID_HASH: usize = 31;

/// Human-readable name of an assigned flag index, for diagnostics and the
/// exported schema.
pub fn name(index: usize) -> Option<&'static str> {
    Some(match index {
        SHUTDOWN => "shutdown",
        LAYOUT_MAGIC => "layout_magic",
        LAYOUT_VERSION => "layout_version",
        SYSTEM_EPOCH => "system_epoch",
        SYSTEM_PULSE => "system_pulse",
        SYSTEM_VISIBILITY => "system_visibility",
        SYSTEM_POWER_STATE => "system_power_state",
        INBOX_DIRTY => "inbox_dirty",
        OUTBOX_HOST_DIRTY => "outbox_host_dirty",
        OUTBOX_KERNEL_DIRTY => "outbox_kernel_dirty",
        MESH_EVENT_EPOCH => "mesh_event_epoch",
        REGISTRY_EPOCH => "registry_epoch",
        MESH_HEAD => "mesh_head",
        MESH_TAIL => "mesh_tail",
        ARENA_ALLOCATOR => "arena_allocator",
        CONTEXT_ID_HASH => "context_id_hash",
        _ => return None,
    })
}
