use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use lattice_bridge::{Bridge, BridgeError, RegionView};
use lattice_layout::{flags, Owner, RegionId};
use lattice_layout::{MESH_MAX_PAYLOAD, MESH_SLOT_BYTES, MESH_SLOT_COUNT, MESH_SLOT_HEADER_BYTES};

use crate::error::IpcError;

const SIZE: usize = 0;
const CRC: usize = 8;

/// Kernel-side producer for the mesh-event queue.
///
/// Slots are fixed-size, so producers and the consumer only share the
/// monotonic head/tail cursors in the flag table. A slot is published by
/// writing payload, then header, then incrementing the tail flag; the
/// consumer fully drains a slot before advancing head, which makes reuse
/// after wrap safe.
pub struct MeshProducer {
    bridge: Arc<Bridge>,
    view: Arc<RegionView>,
}

impl MeshProducer {
    pub fn new(bridge: Arc<Bridge>) -> Result<MeshProducer, IpcError> {
        let view = bridge.region_view(RegionId::MeshEvents)?;
        Ok(MeshProducer { bridge, view })
    }

    /// Number of events the consumer has not yet drained.
    pub fn pending(&self) -> u32 {
        let head = self.bridge.buffer().flag_load(flags::MESH_HEAD) as u32;
        let tail = self.bridge.buffer().flag_load(flags::MESH_TAIL) as u32;
        tail.wrapping_sub(head)
    }

    pub fn push_event(&self, payload: &[u8]) -> Result<(), IpcError> {
        if payload.is_empty() || payload.len() > MESH_MAX_PAYLOAD {
            return Err(IpcError::SlotOverflow {
                len: payload.len(),
                max: MESH_MAX_PAYLOAD,
            });
        }

        let mut lease = self
            .bridge
            .guards()
            .acquire_region_write(RegionId::MeshEvents, Owner::KERNEL)?;

        // Capacity is judged under the lease; checked earlier, two
        // serialized producers could both admit the last free slot and the
        // second would overwrite an undrained one. An early return drops
        // the lease, which releases the lock.
        let pending = self.pending();
        if pending as usize >= MESH_SLOT_COUNT {
            return Err(IpcError::QueueFull { pending });
        }

        let tail = self.bridge.buffer().flag_load(flags::MESH_TAIL) as u32;
        let slot = (tail as usize % MESH_SLOT_COUNT) * MESH_SLOT_BYTES;
        self.view
            .write_bytes(slot + MESH_SLOT_HEADER_BYTES, payload)?;
        self.view.write_u32(slot + SIZE, payload.len() as u32)?;
        self.view.write_u32(slot + 4, 0)?;
        self.view.write_u32(slot + CRC, crc32fast::hash(payload))?;
        self.view.write_u32(slot + 12, 0)?;

        self.bridge.buffer().flag_add(flags::MESH_TAIL, 1);
        self.bridge.publish_epoch(flags::MESH_EVENT_EPOCH);
        lease.ensure_epoch_advanced();
        lease.release();
        Ok(())
    }
}

/// Host-side consumer. Slots failing the size or CRC sanity checks are
/// skipped and counted; the queue keeps moving.
pub struct MeshConsumer {
    bridge: Arc<Bridge>,
    view: Arc<RegionView>,
    corrupt: AtomicU64,
}

impl MeshConsumer {
    pub fn new(bridge: Arc<Bridge>) -> Result<MeshConsumer, IpcError> {
        if !bridge
            .guards()
            .validate_region_read(RegionId::MeshEvents, Owner::HOST)
        {
            return Err(IpcError::Bridge(BridgeError::RegionDenied {
                region: RegionId::MeshEvents.name(),
                owner: "host",
                action: "read",
            }));
        }
        let view = bridge.region_view(RegionId::MeshEvents)?;
        Ok(MeshConsumer {
            bridge,
            view,
            corrupt: AtomicU64::new(0),
        })
    }

    pub fn corrupt_count(&self) -> u64 {
        self.corrupt.load(Ordering::Relaxed)
    }

    /// Drain every published slot, dispatching intact payloads to the
    /// handler. Returns the number of events delivered.
    pub fn drain(&self, mut handler: impl FnMut(&[u8])) -> Result<usize, IpcError> {
        let buffer = self.bridge.buffer();
        let mut head = buffer.flag_load(flags::MESH_HEAD) as u32;
        let tail = buffer.flag_load(flags::MESH_TAIL) as u32;
        let mut delivered = 0usize;

        while head != tail {
            let slot = (head as usize % MESH_SLOT_COUNT) * MESH_SLOT_BYTES;
            let size = self.view.read_u32(slot + SIZE)? as usize;
            if size == 0 || size > MESH_MAX_PAYLOAD {
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                warn!(slot = head % MESH_SLOT_COUNT as u32, size, "mesh slot size out of range");
            } else {
                let mut payload = vec![0u8; size];
                self.view
                    .read_bytes(slot + MESH_SLOT_HEADER_BYTES, &mut payload)?;
                let expected = self.view.read_u32(slot + CRC)?;
                if crc32fast::hash(&payload) != expected {
                    self.corrupt.fetch_add(1, Ordering::Relaxed);
                    warn!(slot = head % MESH_SLOT_COUNT as u32, "mesh slot crc mismatch");
                } else {
                    handler(&payload);
                    delivered += 1;
                }
            }
            head = head.wrapping_add(1);
        }

        buffer.flag_store(flags::MESH_HEAD, head as i32);
        Ok(delivered)
    }

    /// Drain into owned buffers.
    pub fn drain_events(&self) -> Result<Vec<Vec<u8>>, IpcError> {
        let mut events = Vec::new();
        self.drain(|payload| events.push(payload.to_vec()))?;
        Ok(events)
    }
}
