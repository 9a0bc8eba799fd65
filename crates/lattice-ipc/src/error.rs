use thiserror::Error;

use lattice_bridge::BridgeError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcError {
    /// The ring has no room for this message; retry on the next pulse.
    #[error("back-pressure: {needed} bytes needed, {free} free")]
    BackPressure { needed: usize, free: usize },

    /// The message can never fit, regardless of how much is drained.
    #[error("message of {len} bytes cannot fit ring capacity {capacity}")]
    TooLarge { len: usize, capacity: usize },

    /// A zero-length message is indistinguishable from an uncommitted one.
    #[error("zero-length messages are not representable on the ring")]
    ZeroLength,

    /// A header field failed its sanity check.
    #[error("corrupt ring header: length {len} exceeds capacity {capacity}")]
    Corrupt { len: usize, capacity: usize },

    /// Mesh payload exceeds the fixed slot budget.
    #[error("mesh payload of {len} bytes exceeds slot budget {max}")]
    SlotOverflow { len: usize, max: usize },

    /// Every mesh slot is occupied.
    #[error("mesh queue full: {pending} events pending")]
    QueueFull { pending: u32 },

    /// The region is too small to carry a ring at all.
    #[error("region of {size} bytes cannot host a ring")]
    RegionTooSmall { size: usize },

    /// Timed wait elapsed without the awaited value arriving.
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// The arena has no room left for this allocation.
    #[error("arena exhausted: {requested} bytes requested")]
    ArenaExhausted { requested: usize },

    /// Shutdown observed mid-operation; the caller should unwind.
    #[error("shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
