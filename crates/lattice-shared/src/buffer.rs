use std::alloc::{alloc_zeroed, dealloc, Layout as AllocLayout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;

use lattice_layout::{Tier, FLAG_COUNT};

use crate::wait::{WaitOutcome, WaitTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("access of {len} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("offset {offset} is not {align}-byte aligned")]
    Misaligned { offset: usize, align: usize },
    #[error("buffer length {len} is not a valid size (need >= {min}, multiple of 8)")]
    BadLength { len: usize, min: usize },
}

/// The shared byte buffer. Allocated zeroed and 8-aligned; shared between
/// contexts behind an `Arc`.
///
/// Scalar and byte-range accessors are non-atomic: the epoch protocol makes
/// writes visible by publishing a sequentially consistent flag store after
/// the region body is written, and readers load the flag before draining.
pub struct SharedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    waiters: WaitTable,
}

// SAFETY: the buffer is shared across worker threads by design. The flag
// table is only touched through atomic references; payload ranges are plain
// bytes whose cross-thread visibility is ordered by SeqCst flag operations
// (writers store an epoch flag after writing, readers load it before
// reading). Races outside that protocol are protocol bugs, not memory
// unsafety at the container level: all accesses stay in bounds.
unsafe impl Send for SharedBuffer {}
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Smallest buffer that still holds the flag and guard tables.
    pub const MIN_LEN: usize = 256;

    pub fn for_tier(tier: Tier) -> SharedBuffer {
        Self::with_len(tier.total_bytes()).expect("tier sizes are valid buffer lengths")
    }

    pub fn with_len(len: usize) -> Result<SharedBuffer, AccessError> {
        if len < Self::MIN_LEN || len % 8 != 0 {
            return Err(AccessError::BadLength {
                len,
                min: Self::MIN_LEN,
            });
        }
        let layout = AllocLayout::from_size_align(len, 8).map_err(|_| AccessError::BadLength {
            len,
            min: Self::MIN_LEN,
        })?;
        // SAFETY: layout has non-zero size (len >= MIN_LEN).
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        Ok(SharedBuffer {
            ptr,
            len,
            waiters: WaitTable::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), AccessError> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(AccessError::OutOfBounds {
                offset,
                len,
                capacity: self.len,
            });
        }
        Ok(())
    }

    /// Atomic view of flag table entry `index`.
    ///
    /// Flag indices come from `lattice_layout::flags`; an out-of-table index
    /// is a programming error.
    fn flag(&self, index: usize) -> &AtomicI32 {
        assert!(index < FLAG_COUNT, "flag index {index} out of table");
        // SAFETY: index * 4 + 4 <= 128 <= len, and the allocation is
        // 8-aligned, so the word is in bounds and 4-aligned.
        unsafe { &*(self.ptr.as_ptr().add(index * 4) as *const AtomicI32) }
    }

    pub fn flag_load(&self, index: usize) -> i32 {
        self.flag(index).load(Ordering::SeqCst)
    }

    pub fn flag_store(&self, index: usize, value: i32) {
        self.flag(index).store(value, Ordering::SeqCst);
    }

    /// Atomic increment; returns the new value. Wrapping, as epoch equality
    /// is never required, only inequality.
    pub fn flag_add(&self, index: usize, delta: i32) -> i32 {
        self.flag(index).fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }

    pub fn flag_compare_exchange(&self, index: usize, current: i32, new: i32) -> Result<i32, i32> {
        self.flag(index)
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// Atomic u32 at an arbitrary 4-aligned byte offset (ring heads/tails,
    /// slot commit words).
    fn word(&self, offset: usize) -> Result<&AtomicU32, AccessError> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(AccessError::Misaligned { offset, align: 4 });
        }
        // SAFETY: bounds and alignment checked above.
        Ok(unsafe { &*(self.ptr.as_ptr().add(offset) as *const AtomicU32) })
    }

    pub fn u32_load(&self, offset: usize) -> Result<u32, AccessError> {
        Ok(self.word(offset)?.load(Ordering::SeqCst))
    }

    pub fn u32_store(&self, offset: usize, value: u32) -> Result<(), AccessError> {
        self.word(offset)?.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Atomic increment on a word; returns the previous value.
    pub fn u32_fetch_add(&self, offset: usize, delta: u32) -> Result<u32, AccessError> {
        Ok(self.word(offset)?.fetch_add(delta, Ordering::SeqCst))
    }

    pub fn u32_compare_exchange(
        &self,
        offset: usize,
        current: u32,
        new: u32,
    ) -> Result<Result<u32, u32>, AccessError> {
        Ok(self
            .word(offset)?
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst))
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), AccessError> {
        self.check(offset, dst.len())?;
        // SAFETY: in bounds; see the type-level visibility contract.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), AccessError> {
        self.check(offset, src.len())?;
        // SAFETY: in bounds; see the type-level visibility contract.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
        }
        Ok(())
    }

    pub fn zero_bytes(&self, offset: usize, len: usize) -> Result<(), AccessError> {
        self.check(offset, len)?;
        // SAFETY: in bounds.
        unsafe {
            std::ptr::write_bytes(self.ptr.as_ptr().add(offset), 0, len);
        }
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, AccessError> {
        let mut raw = [0u8; 4];
        self.read_bytes(offset, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32, AccessError> {
        Ok(self.read_u32(offset)? as i32)
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32, AccessError> {
        Ok(f32::from_bits(self.read_u32(offset)?))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64, AccessError> {
        let mut raw = [0u8; 8];
        self.read_bytes(offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64, AccessError> {
        Ok(self.read_u64(offset)? as i64)
    }

    pub fn read_f64(&self, offset: usize) -> Result<f64, AccessError> {
        Ok(f64::from_bits(self.read_u64(offset)?))
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> Result<(), AccessError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn write_i32(&self, offset: usize, value: i32) -> Result<(), AccessError> {
        self.write_u32(offset, value as u32)
    }

    pub fn write_u64(&self, offset: usize, value: u64) -> Result<(), AccessError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Park until the flag differs from `expected`, a notify arrives and the
    /// value differs, or the timeout elapses. Returns the last observed
    /// value either way.
    pub fn wait(&self, index: usize, expected: i32, timeout: Option<Duration>) -> WaitOutcome {
        self.waiters.wait(index, timeout, || self.flag_load(index), expected)
    }

    /// Wake every waiter parked on `index`. Callers store/bump the flag
    /// first; the wait table re-checks the value under its lock so no wakeup
    /// is lost.
    pub fn notify(&self, index: usize) {
        self.waiters.notify(index);
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        let layout = AllocLayout::from_size_align(self.len, 8).expect("validated at construction");
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len).finish()
    }
}
