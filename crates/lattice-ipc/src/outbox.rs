use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use lattice_bridge::{Bridge, BridgeError};
use lattice_layout::{Owner, RegionId};

use crate::error::IpcError;
use crate::ring::{ByteRing, RingStatus};

/// Producer half of a guarded byte ring.
///
/// Every push runs the full publish protocol: acquire the region's write
/// lease, append the record, bump the region epoch, verify the bump through
/// the lease, release. The same type serves the inbox, both outboxes, and
/// the arena queues; the schema decides masks and epoch flag.
pub struct OutboxProducer {
    bridge: Arc<Bridge>,
    ring: ByteRing,
    region: RegionId,
    owner: Owner,
    epoch_flag: Option<usize>,
}

impl OutboxProducer {
    pub fn new(bridge: Arc<Bridge>, region: RegionId, owner: Owner) -> Result<OutboxProducer, IpcError> {
        let view = bridge.region_view(region)?;
        let ring = ByteRing::new(view)?;
        let epoch_flag = bridge.layout().spec(region).epoch_flag;
        Ok(OutboxProducer {
            bridge,
            ring,
            region,
            owner,
            epoch_flag,
        })
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn max_payload(&self) -> usize {
        self.ring.max_payload()
    }

    pub fn status(&self) -> Result<RingStatus, IpcError> {
        self.ring.status()
    }

    /// Append one message and publish it. Back-pressure leaves the ring and
    /// its epoch untouched; the caller retries on a later pulse.
    pub fn push(&self, payload: &[u8]) -> Result<(), IpcError> {
        let mut lease = self
            .bridge
            .guards()
            .acquire_region_write(self.region, self.owner)?;
        // A failed push drops the lease, which releases the lock without an
        // epoch check: nothing was written, so nothing is published.
        self.ring.try_push(payload)?;
        if let Some(flag) = self.epoch_flag {
            self.bridge.publish_epoch(flag);
            lease.ensure_epoch_advanced();
        }
        lease.release();
        Ok(())
    }
}

/// Consumer half of a guarded byte ring. Single consumer per region by
/// protocol; reader eligibility is validated against the schema mask when
/// the consumer is built.
pub struct OutboxConsumer {
    bridge: Arc<Bridge>,
    ring: ByteRing,
    region: RegionId,
    epoch_flag: Option<usize>,
    corrupt: AtomicU64,
}

impl OutboxConsumer {
    pub fn new(bridge: Arc<Bridge>, region: RegionId, owner: Owner) -> Result<OutboxConsumer, IpcError> {
        if !bridge.guards().validate_region_read(region, owner) {
            return Err(IpcError::Bridge(BridgeError::RegionDenied {
                region: region.name(),
                owner: lattice_bridge::owner_name(owner),
                action: "read",
            }));
        }
        let view = bridge.region_view(region)?;
        let ring = ByteRing::new(view)?;
        let epoch_flag = bridge.layout().spec(region).epoch_flag;
        Ok(OutboxConsumer {
            bridge,
            ring,
            region,
            epoch_flag,
            corrupt: AtomicU64::new(0),
        })
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Messages skipped because their header failed sanity checks.
    pub fn corrupt_count(&self) -> u64 {
        self.corrupt.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> Result<RingStatus, IpcError> {
        self.ring.status()
    }

    /// Pop the next message, if any. Corrupt headers are counted and logged
    /// and the cursor stays put, preserving liveness for diagnostics.
    pub fn pop(&self) -> Option<Vec<u8>> {
        match self.ring.try_pop() {
            Ok(Some(payload)) => {
                if let Some(flag) = self.epoch_flag {
                    // A quiescent bus reads as epoch zero so idle observers
                    // don't chase stale dirt.
                    if self.ring.is_empty().unwrap_or(false) {
                        self.bridge.buffer().flag_store(flag, 0);
                    }
                }
                Some(payload)
            }
            Ok(None) => None,
            Err(err) => {
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                warn!(region = self.region.name(), %err, "skipping corrupt outbox read");
                None
            }
        }
    }

    /// Drain every currently visible message. Epoch stores may coalesce
    /// under bursts, so consumers always drain to empty on wake.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(payload) = self.pop() {
            out.push(payload);
        }
        out
    }

    /// Copy up to `len` bytes of the front message without consuming it.
    pub fn peek(&self, len: usize) -> Option<Vec<u8>> {
        match self.ring.peek(len) {
            Ok(found) => found,
            Err(err) => {
                warn!(region = self.region.name(), %err, "corrupt header under peek");
                None
            }
        }
    }
}
