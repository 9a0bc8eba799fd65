use serde::Serialize;
use thiserror::Error;

use crate::flags;
use crate::region::{AccessMode, Owner, RegionExtent, RegionId, RegionSpec};
use crate::tier::Tier;
use crate::{FLAG_COUNT, FLAG_TABLE_BYTES, GUARD_ENTRY_BYTES, GUARD_TABLE_OFFSET};
use crate::{MESH_SLOT_BYTES, MESH_SLOT_COUNT, REGISTRY_ENTRY_BYTES, RING_HEADER_BYTES};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

const REGISTRY_OFFSET: usize = 4 * KIB;
const INBOX_OFFSET: usize = 8 * KIB;
const OUTBOX_HOST_OFFSET: usize = INBOX_OFFSET + MIB;
const OUTBOX_KERNEL_OFFSET: usize = OUTBOX_HOST_OFFSET + MIB;
const MESH_OFFSET: usize = OUTBOX_KERNEL_OFFSET + MIB;
const MESH_BYTES: usize = MESH_SLOT_COUNT * MESH_SLOT_BYTES;
const ARENA_REQUEST_OFFSET: usize = MESH_OFFSET + MESH_BYTES;
const ARENA_QUEUE_BYTES: usize = 64 * KIB;
const ARENA_RESPONSE_OFFSET: usize = ARENA_REQUEST_OFFSET + ARENA_QUEUE_BYTES;
const ARENA_OFFSET: usize = 4 * MIB;

/// The region table. This is the schema everything else derives from; the
/// arena's zero size is resolved per tier.
///
/// The kernel-bound outbox is writable by any module worker over its
/// lifetime, but producer entry is serialized through the guard lock, so its
/// policy is `SingleWriter` with a multi-owner writer mask.
pub const SCHEMA: [RegionSpec; 8] = [
    RegionSpec {
        id: RegionId::Registry,
        offset: REGISTRY_OFFSET,
        size: 4 * KIB,
        stride: REGISTRY_ENTRY_BYTES,
        access: AccessMode::SingleWriter,
        writers: Owner::KERNEL,
        readers: Owner::KERNEL.union(Owner::MODULE).union(Owner::HOST),
        epoch_flag: Some(flags::REGISTRY_EPOCH),
    },
    RegionSpec {
        id: RegionId::Inbox,
        offset: INBOX_OFFSET,
        size: MIB,
        stride: 1,
        access: AccessMode::SingleWriter,
        writers: Owner::KERNEL,
        readers: Owner::MODULE.union(Owner::HOST),
        epoch_flag: Some(flags::INBOX_DIRTY),
    },
    RegionSpec {
        id: RegionId::OutboxHost,
        offset: OUTBOX_HOST_OFFSET,
        size: MIB,
        stride: 1,
        access: AccessMode::SingleWriter,
        writers: Owner::KERNEL,
        readers: Owner::HOST,
        epoch_flag: Some(flags::OUTBOX_HOST_DIRTY),
    },
    RegionSpec {
        id: RegionId::OutboxKernel,
        offset: OUTBOX_KERNEL_OFFSET,
        size: MIB,
        stride: 1,
        access: AccessMode::SingleWriter,
        writers: Owner::MODULE,
        readers: Owner::KERNEL,
        epoch_flag: Some(flags::OUTBOX_KERNEL_DIRTY),
    },
    RegionSpec {
        id: RegionId::MeshEvents,
        offset: MESH_OFFSET,
        size: MESH_BYTES,
        stride: MESH_SLOT_BYTES,
        access: AccessMode::SingleWriter,
        writers: Owner::KERNEL,
        readers: Owner::HOST,
        epoch_flag: Some(flags::MESH_EVENT_EPOCH),
    },
    RegionSpec {
        id: RegionId::ArenaRequest,
        offset: ARENA_REQUEST_OFFSET,
        size: ARENA_QUEUE_BYTES,
        stride: 1,
        access: AccessMode::SingleWriter,
        writers: Owner::MODULE,
        readers: Owner::KERNEL,
        epoch_flag: Some(flags::ARENA_ALLOCATOR),
    },
    RegionSpec {
        id: RegionId::ArenaResponse,
        offset: ARENA_RESPONSE_OFFSET,
        size: ARENA_QUEUE_BYTES,
        stride: 1,
        access: AccessMode::SingleWriter,
        writers: Owner::KERNEL,
        readers: Owner::MODULE,
        epoch_flag: None,
    },
    RegionSpec {
        id: RegionId::Arena,
        offset: ARENA_OFFSET,
        size: 0,
        stride: 1,
        access: AccessMode::MultiWriter,
        writers: Owner::KERNEL.union(Owner::MODULE),
        readers: Owner::KERNEL
            .union(Owner::MODULE)
            .union(Owner::HOST)
            .union(Owner::SYSTEM),
        epoch_flag: None,
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("tier {tier:?} is too small for the fixed regions")]
    ArenaUnderflow { tier: Tier },
    #[error("region {region} offset {offset} is not {align}-byte aligned")]
    Misaligned {
        region: &'static str,
        offset: usize,
        align: usize,
    },
    #[error("regions {a} and {b} overlap")]
    Overlap { a: &'static str, b: &'static str },
    #[error("region {region} extends past the end of the buffer")]
    OutOfBuffer { region: &'static str },
}

/// Resolved layout for one tier: the schema with the arena's size filled in
/// and every constraint checked.
#[derive(Debug, Clone, Serialize)]
pub struct Layout {
    pub tier: Tier,
    extents: [RegionExtent; 8],
}

impl Layout {
    /// Every typed region starts on an 8-byte boundary so i64/u64 views stay
    /// aligned.
    pub const REGION_ALIGN: usize = 8;

    pub fn for_tier(tier: Tier) -> Result<Layout, LayoutError> {
        let total = tier.total_bytes();
        let mut extents = [RegionExtent {
            id: RegionId::Arena,
            offset: 0,
            size: 0,
        }; 8];

        for (i, spec) in SCHEMA.iter().enumerate() {
            let size = if spec.size == 0 {
                total
                    .checked_sub(spec.offset)
                    .ok_or(LayoutError::ArenaUnderflow { tier })?
            } else {
                spec.size
            };
            if spec.offset % Self::REGION_ALIGN != 0 {
                return Err(LayoutError::Misaligned {
                    region: spec.id.name(),
                    offset: spec.offset,
                    align: Self::REGION_ALIGN,
                });
            }
            let end = spec
                .offset
                .checked_add(size)
                .filter(|end| *end <= total)
                .ok_or(LayoutError::OutOfBuffer {
                    region: spec.id.name(),
                })?;
            extents[i] = RegionExtent {
                id: spec.id,
                offset: spec.offset,
                size: end - spec.offset,
            };
        }

        let layout = Layout { tier, extents };
        layout.check_disjoint()?;
        Ok(layout)
    }

    fn check_disjoint(&self) -> Result<(), LayoutError> {
        // The flag and guard tables occupy [0, 256); regions must start past
        // them.
        debug_assert_eq!(GUARD_TABLE_OFFSET, FLAG_TABLE_BYTES);
        let tables_end = GUARD_TABLE_OFFSET + RegionId::ALL.len() * GUARD_ENTRY_BYTES;
        let mut sorted: Vec<&RegionExtent> = self.extents.iter().collect();
        sorted.sort_by_key(|e| e.offset);
        if let Some(first) = sorted.first() {
            if first.offset < tables_end {
                return Err(LayoutError::Overlap {
                    a: "flag_table",
                    b: first.id.name(),
                });
            }
        }
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].offset {
                return Err(LayoutError::Overlap {
                    a: pair[0].id.name(),
                    b: pair[1].id.name(),
                });
            }
        }
        Ok(())
    }

    pub fn region(&self, id: RegionId) -> RegionExtent {
        self.extents[SCHEMA
            .iter()
            .position(|s| s.id == id)
            .expect("schema covers every region id")]
    }

    pub fn spec(&self, id: RegionId) -> &'static RegionSpec {
        SCHEMA
            .iter()
            .find(|s| s.id == id)
            .expect("schema covers every region id")
    }

    pub fn regions(&self) -> &[RegionExtent; 8] {
        &self.extents
    }

    /// Usable data bytes of a ring-bearing region (size minus the head/tail
    /// header).
    pub fn ring_capacity(&self, id: RegionId) -> usize {
        self.region(id).size - RING_HEADER_BYTES
    }

    /// Serialize the resolved layout plus flag assignments so non-Rust
    /// contexts can generate their constants from the same schema.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct FlagExport {
            index: usize,
            name: &'static str,
        }
        #[derive(Serialize)]
        struct RegionExport {
            name: &'static str,
            offset: usize,
            size: usize,
            stride: usize,
            access: AccessMode,
            writer_mask: u32,
            reader_mask: u32,
            epoch_flag: Option<usize>,
        }
        #[derive(Serialize)]
        struct Export {
            tier: Tier,
            total_bytes: usize,
            flag_table_bytes: usize,
            flags: Vec<FlagExport>,
            regions: Vec<RegionExport>,
        }

        let export = Export {
            tier: self.tier,
            total_bytes: self.tier.total_bytes(),
            flag_table_bytes: FLAG_TABLE_BYTES,
            flags: (0..FLAG_COUNT)
                .filter_map(|i| crate::flags::name(i).map(|name| FlagExport { index: i, name }))
                .collect(),
            regions: SCHEMA
                .iter()
                .map(|spec| RegionExport {
                    name: spec.id.name(),
                    offset: spec.offset,
                    size: self.region(spec.id).size,
                    stride: spec.stride,
                    access: spec.access,
                    writer_mask: spec.writers.bits(),
                    reader_mask: spec.readers.bits(),
                    epoch_flag: spec.epoch_flag,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&export)
    }
}
