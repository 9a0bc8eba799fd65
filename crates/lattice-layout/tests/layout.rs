use lattice_layout::{flags, AccessMode, Layout, Owner, RegionId, Tier, SCHEMA};
use lattice_layout::{
    FLAG_COUNT, FLAG_TABLE_BYTES, GUARD_ENTRY_BYTES, GUARD_TABLE_OFFSET, MAX_MODULES_INLINE,
    MESH_MAX_PAYLOAD, MESH_SLOT_BYTES, MESH_SLOT_COUNT, REGISTRY_ENTRY_BYTES, RING_HEADER_BYTES,
};

const MIB: usize = 1024 * 1024;

#[test]
fn flag_indices_are_stable() {
    assert_eq!(flags::SHUTDOWN, 0);
    assert_eq!(flags::SYSTEM_EPOCH, 7);
    assert_eq!(flags::SYSTEM_PULSE, 10);
    assert_eq!(flags::SYSTEM_VISIBILITY, 11);
    assert_eq!(flags::SYSTEM_POWER_STATE, 12);
    assert_eq!(flags::INBOX_DIRTY, 13);
    assert_eq!(flags::OUTBOX_HOST_DIRTY, 14);
    assert_eq!(flags::OUTBOX_KERNEL_DIRTY, 15);
    assert_eq!(flags::MESH_EVENT_EPOCH, 16);
    assert_eq!(flags::REGISTRY_EPOCH, 17);
    assert_eq!(flags::ARENA_ALLOCATOR, 20);
    assert_eq!(flags::CONTEXT_ID_HASH, 31);
    assert!(flags::CONTEXT_ID_HASH < FLAG_COUNT);
}

#[test]
fn flag_table_covers_mandatory_indices() {
    assert_eq!(FLAG_TABLE_BYTES, 128);
    assert_eq!(FLAG_COUNT, 32);
    for index in [
        flags::SHUTDOWN,
        flags::SYSTEM_PULSE,
        flags::INBOX_DIRTY,
        flags::OUTBOX_HOST_DIRTY,
        flags::OUTBOX_KERNEL_DIRTY,
        flags::MESH_EVENT_EPOCH,
        flags::REGISTRY_EPOCH,
        flags::ARENA_ALLOCATOR,
        flags::CONTEXT_ID_HASH,
    ] {
        assert!(flags::name(index).is_some(), "flag {index} unnamed");
    }
}

#[test]
fn region_offsets_are_deterministic() {
    let layout = Layout::for_tier(Tier::Mib64).expect("layout");

    assert_eq!(layout.region(RegionId::Registry).offset, 4096);
    assert_eq!(layout.region(RegionId::Registry).size, 4096);
    assert_eq!(layout.region(RegionId::Inbox).offset, 8192);
    assert_eq!(layout.region(RegionId::Inbox).size, MIB);
    assert_eq!(layout.region(RegionId::OutboxHost).offset, 8192 + MIB);
    assert_eq!(layout.region(RegionId::OutboxKernel).offset, 8192 + 2 * MIB);
    assert_eq!(layout.region(RegionId::MeshEvents).offset, 8192 + 3 * MIB);
    assert_eq!(
        layout.region(RegionId::MeshEvents).size,
        MESH_SLOT_COUNT * MESH_SLOT_BYTES
    );
    assert_eq!(
        layout.region(RegionId::ArenaRequest).offset,
        layout.region(RegionId::MeshEvents).end()
    );
    assert_eq!(
        layout.region(RegionId::ArenaResponse).offset,
        layout.region(RegionId::ArenaRequest).end()
    );
    assert_eq!(layout.region(RegionId::Arena).offset, 4 * MIB);
}

#[test]
fn fixed_regions_share_offsets_across_tiers() {
    let reference = Layout::for_tier(Tier::Mib32).expect("layout");
    for tier in Tier::ALL {
        let layout = Layout::for_tier(tier).expect("layout");
        for id in RegionId::ALL {
            assert_eq!(
                layout.region(id).offset,
                reference.region(id).offset,
                "offset of {} drifted in {:?}",
                id.name(),
                tier
            );
        }
        // Only the arena's size depends on the tier.
        assert_eq!(
            layout.region(RegionId::Arena).size,
            tier.total_bytes() - 4 * MIB
        );
        assert_eq!(layout.region(RegionId::Arena).end(), tier.total_bytes());
    }
}

#[test]
fn regions_are_disjoint_and_aligned() {
    for tier in Tier::ALL {
        let layout = Layout::for_tier(tier).expect("layout");
        let mut extents: Vec<_> = layout.regions().to_vec();
        extents.sort_by_key(|e| e.offset);

        let tables_end = GUARD_TABLE_OFFSET + RegionId::ALL.len() * GUARD_ENTRY_BYTES;
        assert!(extents[0].offset >= tables_end);
        for pair in extents.windows(2) {
            assert!(
                pair[0].end() <= pair[1].offset,
                "{} overlaps {}",
                pair[0].id.name(),
                pair[1].id.name()
            );
        }
        for extent in &extents {
            assert_eq!(extent.offset % Layout::REGION_ALIGN, 0);
        }
    }
}

#[test]
fn ring_capacity_excludes_header() {
    let layout = Layout::for_tier(Tier::Mib64).expect("layout");
    assert_eq!(RING_HEADER_BYTES, 8);
    assert_eq!(layout.ring_capacity(RegionId::OutboxHost), MIB - 8);
    assert_eq!(layout.ring_capacity(RegionId::OutboxKernel), MIB - 8);
    assert_eq!(layout.ring_capacity(RegionId::Inbox), MIB - 8);
}

#[test]
fn registry_region_fits_inline_modules() {
    let layout = Layout::for_tier(Tier::Mib32).expect("layout");
    assert!(MAX_MODULES_INLINE * REGISTRY_ENTRY_BYTES <= layout.region(RegionId::Registry).size);
}

#[test]
fn mesh_slot_budget() {
    assert_eq!(MESH_SLOT_BYTES, 1024);
    assert!(MESH_SLOT_BYTES >= 512);
    assert!(MESH_SLOT_COUNT >= 16);
    assert_eq!(MESH_MAX_PAYLOAD, MESH_SLOT_BYTES - 16);
}

#[test]
fn schema_masks_match_access_modes() {
    for spec in SCHEMA.iter() {
        assert!(!spec.writers.is_empty(), "{} has no writers", spec.id.name());
        assert!(!spec.readers.is_empty(), "{} has no readers", spec.id.name());
    }
    // The arena is the only concurrently-writable region; synchronization is
    // delegated to its internal layout, so it carries no epoch flag.
    let arena = SCHEMA.iter().find(|s| s.id == RegionId::Arena).unwrap();
    assert_eq!(arena.access, AccessMode::MultiWriter);
    assert!(arena.epoch_flag.is_none());
    let inbox = SCHEMA.iter().find(|s| s.id == RegionId::Inbox).unwrap();
    assert_eq!(inbox.writers, Owner::KERNEL);
    assert!(inbox.readers.contains(Owner::MODULE));
    let outbox_kernel = SCHEMA
        .iter()
        .find(|s| s.id == RegionId::OutboxKernel)
        .unwrap();
    assert_eq!(outbox_kernel.writers, Owner::MODULE);
    assert_eq!(outbox_kernel.readers, Owner::KERNEL);
}

#[test]
fn json_export_carries_flags_and_regions() {
    let layout = Layout::for_tier(Tier::Mib128).expect("layout");
    let json = layout.to_json().expect("serialize");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");

    assert_eq!(value["total_bytes"], 128 * MIB as u64);
    assert_eq!(value["flag_table_bytes"], 128);
    let regions = value["regions"].as_array().expect("regions array");
    assert_eq!(regions.len(), 8);
    let inbox = regions
        .iter()
        .find(|r| r["name"] == "inbox")
        .expect("inbox exported");
    assert_eq!(inbox["offset"], 8192);
    assert_eq!(inbox["epoch_flag"], flags::INBOX_DIRTY as u64);
    assert!(value["flags"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["name"] == "shutdown" && f["index"] == 0));
}
