use std::sync::Arc;

use tracing::warn;

use lattice_layout::{AccessMode, Owner, RegionId, RegionSpec, SCHEMA};
use lattice_layout::{GUARD_ENTRY_BYTES, GUARD_TABLE_OFFSET};
use lattice_shared::SharedBuffer;

use crate::error::BridgeError;

const LOCK: usize = 0;
const LAST_EPOCH: usize = 4;
const VIOLATIONS: usize = 8;
const LAST_OWNER: usize = 12;

fn spec_of(id: RegionId) -> &'static RegionSpec {
    SCHEMA
        .iter()
        .find(|s| s.id == id)
        .expect("schema covers every region id")
}

/// Diagnostic label for an owner bit.
pub fn owner_name(owner: Owner) -> &'static str {
    if owner == Owner::KERNEL {
        "kernel"
    } else if owner == Owner::MODULE {
        "module"
    } else if owner == Owner::HOST {
        "host"
    } else if owner == Owner::SYSTEM {
        "system"
    } else {
        "mixed"
    }
}

/// The guard table in shared memory: one `{lock, last_epoch, violations,
/// last_owner}` entry per region. Rejection is authoritative (a denied
/// writer must not touch the region) while the counters are diagnostic.
pub struct GuardTable {
    buffer: Arc<SharedBuffer>,
}

impl GuardTable {
    pub(crate) fn new(buffer: Arc<SharedBuffer>) -> GuardTable {
        GuardTable { buffer }
    }

    fn word(&self, id: RegionId, field: usize) -> usize {
        GUARD_TABLE_OFFSET + id.guard_index() * GUARD_ENTRY_BYTES + field
    }

    fn load(&self, id: RegionId, field: usize) -> u32 {
        // The guard table sits inside the buffer's fixed prefix; the offset
        // cannot be out of range.
        self.buffer.u32_load(self.word(id, field)).unwrap_or(0)
    }

    fn bump_violation(&self, id: RegionId, what: &'static str) {
        let _ = self.buffer.u32_fetch_add(self.word(id, VIOLATIONS), 1);
        warn!(region = id.name(), what, "region guard violation");
    }

    pub fn violations(&self, id: RegionId) -> u32 {
        self.load(id, VIOLATIONS)
    }

    pub fn lock_holder(&self, id: RegionId) -> Option<Owner> {
        Owner::from_bits(self.load(id, LOCK)).filter(|o| !o.is_empty())
    }

    pub fn last_epoch(&self, id: RegionId) -> i32 {
        self.load(id, LAST_EPOCH) as i32
    }

    pub fn last_owner(&self, id: RegionId) -> Option<Owner> {
        Owner::from_bits(self.load(id, LAST_OWNER)).filter(|o| !o.is_empty())
    }

    /// Per-region violation counters, for diagnostics surfaces.
    pub fn report(&self) -> ViolationReport {
        let mut counts = [0u32; 8];
        for id in RegionId::ALL {
            counts[id.guard_index()] = self.violations(id);
        }
        ViolationReport { counts }
    }

    /// True if `owner` may read the region; a refusal is counted.
    pub fn validate_region_read(&self, id: RegionId, owner: Owner) -> bool {
        if spec_of(id).readers.intersects(owner) {
            true
        } else {
            self.bump_violation(id, "read outside reader mask");
            false
        }
    }

    /// Obtain a scoped write lease, per the region's access policy.
    pub fn acquire_region_write(
        &self,
        id: RegionId,
        owner: Owner,
    ) -> Result<WriteLease<'_>, BridgeError> {
        let spec = spec_of(id);
        let denied = |action| BridgeError::RegionDenied {
            region: id.name(),
            owner: owner_name(owner),
            action,
        };

        if !spec.writers.intersects(owner) || spec.access == AccessMode::ReadOnly {
            self.bump_violation(id, "write outside writer mask");
            return Err(denied("write"));
        }

        let locked = match spec.access {
            AccessMode::SingleWriter => {
                let lock = self.word(id, LOCK);
                match self.buffer.u32_compare_exchange(lock, 0, owner.bits()) {
                    Ok(Ok(_)) => true,
                    Ok(Err(_held)) => {
                        self.bump_violation(id, "write-lock contention");
                        return Err(denied("write-lock"));
                    }
                    Err(err) => {
                        warn!(%err, region = id.name(), "guard word inaccessible");
                        return Err(err.into());
                    }
                }
            }
            AccessMode::MultiWriter => {
                let _ = self.buffer.u32_store(self.word(id, LAST_OWNER), owner.bits());
                false
            }
            AccessMode::ReadOnly => unreachable!("rejected above"),
        };

        let epoch_flag = spec.epoch_flag;
        Ok(WriteLease {
            table: self,
            id,
            owner,
            locked,
            epoch_flag,
            epoch_at_acquire: epoch_flag.map(|f| self.buffer.flag_load(f)),
            released: false,
        })
    }
}

/// Violation counters snapshot, indexed by `RegionId::guard_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationReport {
    counts: [u32; 8],
}

impl ViolationReport {
    pub fn get(&self, id: RegionId) -> u32 {
        self.counts[id.guard_index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

/// Scoped permit to write one region. Dropping the lease releases the lock
/// on every exit path; publishing an epoch remains the caller's job and is
/// checked by `ensure_epoch_advanced`.
pub struct WriteLease<'a> {
    table: &'a GuardTable,
    id: RegionId,
    owner: Owner,
    locked: bool,
    epoch_flag: Option<usize>,
    epoch_at_acquire: Option<i32>,
    released: bool,
}

impl WriteLease<'_> {
    pub fn region(&self) -> RegionId {
        self.id
    }

    /// Call after publishing the region's epoch. Counts a violation (and
    /// returns false) if the epoch flag still holds its acquisition value.
    pub fn ensure_epoch_advanced(&mut self) -> bool {
        let (Some(flag), Some(at_acquire)) = (self.epoch_flag, self.epoch_at_acquire) else {
            return true;
        };
        let current = self.table.buffer.flag_load(flag);
        if current == at_acquire {
            self.table.bump_violation(self.id, "epoch not advanced after write");
            false
        } else {
            let _ = self
                .table
                .buffer
                .u32_store(self.table.word(self.id, LAST_EPOCH), current as u32);
            true
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.locked {
            let lock = self.table.word(self.id, LOCK);
            match self.table.buffer.u32_compare_exchange(lock, self.owner.bits(), 0) {
                Ok(Ok(_)) => {}
                Ok(Err(found)) => {
                    // Someone clobbered the lock word while we held it.
                    self.table.bump_violation(self.id, "lock word changed under lease");
                    warn!(
                        region = self.id.name(),
                        expected = self.owner.bits(),
                        found,
                        "write lease released a lock it no longer held"
                    );
                }
                Err(err) => warn!(%err, region = self.id.name(), "guard word inaccessible"),
            }
        }
    }
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
