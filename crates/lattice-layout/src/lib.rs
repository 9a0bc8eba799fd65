//! Byte-exact layout of the shared bridge buffer.
//!
//! Every region offset, size and stride, every atomic flag index, and every
//! access policy is declared here and only here. All other crates derive
//! their views from this schema; none of them carries a literal offset.
//!
//! The layout is identical across memory tiers except for the dynamic arena
//! at the tail, which absorbs whatever the tier leaves after the fixed
//! regions.

pub mod flags;
mod region;
mod schema;
mod tier;

pub use region::{AccessMode, Owner, RegionExtent, RegionId, RegionSpec};
pub use schema::{Layout, LayoutError, SCHEMA};
pub use tier::Tier;

/// Bytes occupied by the atomic flag table at offset 0.
pub const FLAG_TABLE_BYTES: usize = 128;

/// Number of 32-bit flags in the flag table.
pub const FLAG_COUNT: usize = FLAG_TABLE_BYTES / 4;

/// Byte offset of the region guard table.
pub const GUARD_TABLE_OFFSET: usize = 128;

/// Bytes per guard entry: `{lock, last_epoch, violations, last_owner}`.
pub const GUARD_ENTRY_BYTES: usize = 16;

/// Ring header bytes: `head: u32, tail: u32`.
pub const RING_HEADER_BYTES: usize = 8;

/// Fixed size of one mesh-event slot, header included.
pub const MESH_SLOT_BYTES: usize = 1024;

/// Per-slot header bytes: `{size, reserved, crc32, reserved}`.
pub const MESH_SLOT_HEADER_BYTES: usize = 16;

/// Number of slots in the mesh-event queue.
pub const MESH_SLOT_COUNT: usize = 64;

/// Largest mesh-event payload a slot can carry.
pub const MESH_MAX_PAYLOAD: usize = MESH_SLOT_BYTES - MESH_SLOT_HEADER_BYTES;

/// Fixed size of one module-registry entry.
pub const REGISTRY_ENTRY_BYTES: usize = 96;

/// Capacity of the inline module registry.
pub const MAX_MODULES_INLINE: usize = 32;

/// Stamp stored in `flags::LAYOUT_MAGIC` by the first initializer ("LTBC").
pub const LAYOUT_MAGIC: i32 = 0x4C54_4243;

/// Bumped whenever the region table changes incompatibly.
pub const LAYOUT_VERSION: i32 = 1;
