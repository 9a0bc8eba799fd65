use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bit set of the participants that may touch a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Owner: u32 {
        const KERNEL = 1 << 0;
        const MODULE = 1 << 1;
        const HOST   = 1 << 2;
        const SYSTEM = 1 << 3;
    }
}

impl Owner {
    /// The owner bit as stored in a guard lock word. Exactly one bit must be
    /// set for a lock holder.
    pub fn lock_word(self) -> i32 {
        self.bits() as i32
    }
}

/// Static write discipline of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    /// One writer at a time, enforced by a CAS on the guard lock word.
    SingleWriter,
    /// Any owner in the writer mask may write concurrently; the region's
    /// internal layout is responsible for synchronization.
    MultiWriter,
}

/// Identity of a guarded region. The discriminant doubles as the index into
/// the guard table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionId {
    Registry = 0,
    Inbox = 1,
    OutboxHost = 2,
    OutboxKernel = 3,
    MeshEvents = 4,
    ArenaRequest = 5,
    ArenaResponse = 6,
    Arena = 7,
}

impl RegionId {
    pub const ALL: [RegionId; 8] = [
        RegionId::Registry,
        RegionId::Inbox,
        RegionId::OutboxHost,
        RegionId::OutboxKernel,
        RegionId::MeshEvents,
        RegionId::ArenaRequest,
        RegionId::ArenaResponse,
        RegionId::Arena,
    ];

    /// Guard-table slot of this region.
    pub fn guard_index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            RegionId::Registry => "registry",
            RegionId::Inbox => "inbox",
            RegionId::OutboxHost => "outbox_host",
            RegionId::OutboxKernel => "outbox_kernel",
            RegionId::MeshEvents => "mesh_events",
            RegionId::ArenaRequest => "arena_request",
            RegionId::ArenaResponse => "arena_response",
            RegionId::Arena => "arena",
        }
    }
}

/// One row of the layout schema.
#[derive(Debug, Clone, Copy)]
pub struct RegionSpec {
    pub id: RegionId,
    /// Byte offset in the shared buffer. Fixed across tiers.
    pub offset: usize,
    /// Byte size. Zero means "to the end of the tier" (arena only).
    pub size: usize,
    /// Element stride for array-like regions, 1 for byte regions.
    pub stride: usize,
    pub access: AccessMode,
    pub writers: Owner,
    pub readers: Owner,
    /// Flag table index whose change publishes a mutation of this region.
    pub epoch_flag: Option<usize>,
}

/// A resolved `[offset, offset + size)` interval for one region in a
/// concrete tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionExtent {
    pub id: RegionId,
    pub offset: usize,
    pub size: usize,
}

impl RegionExtent {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset >= self.offset && offset + len <= self.end()
    }
}
