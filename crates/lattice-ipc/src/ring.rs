use std::sync::Arc;

use lattice_bridge::RegionView;
use lattice_layout::RING_HEADER_BYTES;

use crate::error::IpcError;

const HEAD: usize = 0;
const TAIL: usize = 4;
const DATA: usize = RING_HEADER_BYTES;

/// Wrap-around byte ring with length-prefixed records.
///
/// The two-word header holds `head` (consumer cursor) and `tail` (producer
/// cursor), both logical positions in `[0, capacity)`. One byte stays
/// unused so a full ring is distinguishable from an empty one. A record is
/// a 4-byte little-endian length followed by that many payload bytes; both
/// may wrap the data area.
///
/// `head` is only moved by the single consumer; `tail` only by producers,
/// which serialize entry through the region's write guard. The consumer
/// zero-fills each consumed length prefix so a stale non-zero length can
/// never surface ahead of a producer's commit after a wrap.
pub struct ByteRing {
    view: Arc<RegionView>,
    capacity: usize,
}

/// Cursor snapshot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub head: u32,
    pub tail: u32,
    pub capacity: usize,
    pub used: usize,
}

impl std::fmt::Display for RingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "head={} tail={} used={}/{}",
            self.head, self.tail, self.used, self.capacity
        )
    }
}

impl ByteRing {
    pub fn new(view: Arc<RegionView>) -> Result<ByteRing, IpcError> {
        let capacity = view
            .len()
            .checked_sub(RING_HEADER_BYTES)
            .filter(|c| *c >= 8)
            .ok_or(IpcError::RegionTooSmall { size: view.len() })?;
        Ok(ByteRing { view, capacity })
    }

    /// Data-area bytes (the region size minus the header).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload `try_push` can ever accept.
    pub fn max_payload(&self) -> usize {
        // Record bytes plus the reserved byte must fit the data area.
        self.capacity - 4 - 1
    }

    fn head(&self) -> Result<u32, IpcError> {
        Ok(self.view.atomic_u32_load(HEAD)?)
    }

    fn tail(&self) -> Result<u32, IpcError> {
        Ok(self.view.atomic_u32_load(TAIL)?)
    }

    fn free_space(head: u32, tail: u32, capacity: usize) -> usize {
        (capacity + head as usize - tail as usize - 1) % capacity
    }

    pub fn is_empty(&self) -> Result<bool, IpcError> {
        Ok(self.head()? == self.tail()?)
    }

    pub fn status(&self) -> Result<RingStatus, IpcError> {
        let head = self.head()?;
        let tail = self.tail()?;
        Ok(RingStatus {
            head,
            tail,
            capacity: self.capacity,
            used: self.capacity - 1 - Self::free_space(head, tail, self.capacity),
        })
    }

    /// Append one record. Callers hold the region's write guard; this method
    /// itself does not serialize producers.
    pub fn try_push(&self, payload: &[u8]) -> Result<(), IpcError> {
        if payload.is_empty() {
            return Err(IpcError::ZeroLength);
        }
        let record = 4 + payload.len();
        if record > self.capacity {
            // Hopeless regardless of draining; anything smaller is reported
            // as back-pressure by the free-space check below.
            return Err(IpcError::TooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        let head = self.head()?;
        let tail = self.tail()?;
        let free = Self::free_space(head, tail, self.capacity);
        if free < record {
            return Err(IpcError::BackPressure {
                needed: record,
                free,
            });
        }

        let len_le = (payload.len() as u32).to_le_bytes();
        self.write_wrapped(tail as usize, &len_le)?;
        self.write_wrapped((tail as usize + 4) % self.capacity, payload)?;
        // The tail store publishes the record: a consumer that sees the new
        // tail also sees the length and payload bytes written above.
        self.view
            .atomic_u32_store(TAIL, ((tail as usize + record) % self.capacity) as u32)?;
        Ok(())
    }

    /// Consume one record. `Ok(None)` covers both an empty ring and a
    /// record whose length prefix is still zero (producer mid-commit).
    /// A length beyond the capacity leaves `head` untouched and surfaces as
    /// `Corrupt` for the caller to count.
    pub fn try_pop(&self) -> Result<Option<Vec<u8>>, IpcError> {
        let head = self.head()?;
        let tail = self.tail()?;
        if head == tail {
            return Ok(None);
        }

        let mut len_le = [0u8; 4];
        self.read_wrapped(head as usize, &mut len_le)?;
        let len = u32::from_le_bytes(len_le) as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > self.capacity {
            return Err(IpcError::Corrupt {
                len,
                capacity: self.capacity,
            });
        }

        let mut payload = vec![0u8; len];
        self.read_wrapped((head as usize + 4) % self.capacity, &mut payload)?;
        // Erase the consumed length prefix before advancing, so a later
        // reader can never see this stale length after the ring wraps.
        self.zero_wrapped(head as usize, 4)?;
        self.view
            .atomic_u32_store(HEAD, ((head as usize + 4 + len) % self.capacity) as u32)?;
        Ok(Some(payload))
    }

    /// Copy up to `len` payload bytes of the front record without consuming
    /// it.
    pub fn peek(&self, len: usize) -> Result<Option<Vec<u8>>, IpcError> {
        let head = self.head()?;
        let tail = self.tail()?;
        if head == tail {
            return Ok(None);
        }
        let mut len_le = [0u8; 4];
        self.read_wrapped(head as usize, &mut len_le)?;
        let msg_len = u32::from_le_bytes(len_le) as usize;
        if msg_len == 0 {
            return Ok(None);
        }
        if msg_len > self.capacity {
            return Err(IpcError::Corrupt {
                len: msg_len,
                capacity: self.capacity,
            });
        }
        let mut payload = vec![0u8; msg_len.min(len)];
        self.read_wrapped((head as usize + 4) % self.capacity, &mut payload)?;
        Ok(Some(payload))
    }

    fn write_wrapped(&self, pos: usize, bytes: &[u8]) -> Result<(), IpcError> {
        let first = bytes.len().min(self.capacity - pos);
        self.view.write_bytes(DATA + pos, &bytes[..first])?;
        if first < bytes.len() {
            self.view.write_bytes(DATA, &bytes[first..])?;
        }
        Ok(())
    }

    fn read_wrapped(&self, pos: usize, out: &mut [u8]) -> Result<(), IpcError> {
        let first = out.len().min(self.capacity - pos);
        self.view.read_bytes(DATA + pos, &mut out[..first])?;
        if first < out.len() {
            let rest = out.len() - first;
            self.view.read_bytes(DATA, &mut out[first..first + rest])?;
        }
        Ok(())
    }

    fn zero_wrapped(&self, pos: usize, len: usize) -> Result<(), IpcError> {
        let first = len.min(self.capacity - pos);
        self.view.zero_bytes(DATA + pos, first)?;
        if first < len {
            self.view.zero_bytes(DATA, len - first)?;
        }
        Ok(())
    }
}
