use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use lattice_layout::{flags, Layout, RegionExtent, RegionId, Tier};
use lattice_layout::{FLAG_COUNT, GUARD_ENTRY_BYTES, GUARD_TABLE_OFFSET, LAYOUT_MAGIC, LAYOUT_VERSION};
use lattice_shared::SharedBuffer;

use crate::error::BridgeError;
use crate::guard::GuardTable;
use crate::watch::{EpochWatcher, WaitMode};

/// Distinguishes successive initializations within one process so a
/// context-id hash is never reused across re-inits of the same label.
static INIT_COUNTER: AtomicU32 = AtomicU32::new(0);

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn fresh_context_hash(label: &str) -> i32 {
    let count = INIT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hash = fnv1a(label.as_bytes()) ^ count.rotate_left(16);
    if hash == 0 {
        // Zero means "never initialized" to observers of flag 31.
        hash = 0x9E37_79B9;
    }
    hash as i32
}

/// Per-context handle over the shared buffer: cached typed views, the flag
/// protocol, and the guard table. Thread-safe within its own context; the
/// flag table does cross-context coordination.
pub struct Bridge {
    buffer: Arc<SharedBuffer>,
    layout: Layout,
    size: usize,
    generation: Arc<AtomicU64>,
    views: Mutex<HashMap<(usize, usize), Arc<RegionView>>>,
    ready: AtomicBool,
    context_hash: i32,
    guards: GuardTable,
}

impl Bridge {
    /// Attach to (or create on first touch) an initialized buffer.
    ///
    /// The first initializer stamps the layout magic and version, seeds the
    /// context-id hash, and leaves the guard table zeroed. Later callers
    /// validate the stamp and adopt the current context hash. `base` is the
    /// system base inside the buffer; a dedicated buffer always starts at
    /// zero.
    pub fn initialize(
        buffer: Arc<SharedBuffer>,
        base: usize,
        size: usize,
        label: &str,
    ) -> Result<Bridge, BridgeError> {
        Self::init_inner(buffer, base, size, label, false)
    }

    /// Initialize a new context tree over a buffer that may already carry
    /// state: rewrites the context-id hash and zero-fills the guard table.
    /// The flag table is left alone; other contexts may still be reading it.
    pub fn reinitialize(
        buffer: Arc<SharedBuffer>,
        base: usize,
        size: usize,
        label: &str,
    ) -> Result<Bridge, BridgeError> {
        Self::init_inner(buffer, base, size, label, true)
    }

    fn init_inner(
        buffer: Arc<SharedBuffer>,
        base: usize,
        size: usize,
        label: &str,
        force_new_context: bool,
    ) -> Result<Bridge, BridgeError> {
        if base != 0 {
            return Err(BridgeError::UnsupportedBase { base });
        }
        if size != buffer.len() {
            return Err(BridgeError::UnknownTier { len: size });
        }
        let tier = Tier::from_exact(size).ok_or(BridgeError::UnknownTier { len: size })?;
        let layout = Layout::for_tier(tier)?;

        let magic = buffer.flag_load(flags::LAYOUT_MAGIC);
        let first = magic == 0
            && buffer
                .flag_compare_exchange(flags::LAYOUT_MAGIC, 0, LAYOUT_MAGIC)
                .is_ok();
        if first {
            buffer.flag_store(flags::LAYOUT_VERSION, LAYOUT_VERSION);
        } else {
            let magic = buffer.flag_load(flags::LAYOUT_MAGIC);
            let version = buffer.flag_load(flags::LAYOUT_VERSION);
            if magic != LAYOUT_MAGIC || version != LAYOUT_VERSION {
                return Err(BridgeError::LayoutMismatch { magic, version });
            }
        }

        let context_hash = if first || force_new_context || buffer.flag_load(flags::CONTEXT_ID_HASH) == 0 {
            if force_new_context {
                // Stale loops from the previous context tree must not trip
                // over leftover locks or violation counts.
                for index in 0..RegionId::ALL.len() {
                    let entry = GUARD_TABLE_OFFSET + index * GUARD_ENTRY_BYTES;
                    buffer.zero_bytes(entry, GUARD_ENTRY_BYTES)?;
                }
            }
            let hash = fresh_context_hash(label);
            buffer.flag_store(flags::CONTEXT_ID_HASH, hash);
            buffer.notify(flags::CONTEXT_ID_HASH);
            hash
        } else {
            buffer.flag_load(flags::CONTEXT_ID_HASH)
        };

        Ok(Bridge {
            guards: GuardTable::new(buffer.clone()),
            buffer,
            layout,
            size,
            generation: Arc::new(AtomicU64::new(0)),
            views: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(true),
            context_hash,
        })
    }

    pub fn buffer(&self) -> &Arc<SharedBuffer> {
        &self.buffer
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn guards(&self) -> &GuardTable {
        &self.guards
    }

    pub fn context_hash(&self) -> i32 {
        self.context_hash
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Drop every cached view. Views handed out before the call report
    /// `NotReady` from then on; readers on the bridge itself fall back to
    /// zero defaults.
    pub fn clear(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read_or_default<T: Default>(&self, what: Result<T, lattice_shared::AccessError>) -> T {
        match what {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "out-of-range bridge read");
                T::default()
            }
        }
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        if !self.is_ready() {
            return 0;
        }
        self.read_or_default(self.buffer.read_i32(offset))
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        if !self.is_ready() {
            return 0;
        }
        self.read_or_default(self.buffer.read_u32(offset))
    }

    pub fn read_f32(&self, offset: usize) -> f32 {
        if !self.is_ready() {
            return 0.0;
        }
        self.read_or_default(self.buffer.read_f32(offset))
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        if !self.is_ready() {
            return 0;
        }
        self.read_or_default(self.buffer.read_u64(offset))
    }

    pub fn read_i64(&self, offset: usize) -> i64 {
        if !self.is_ready() {
            return 0;
        }
        self.read_or_default(self.buffer.read_i64(offset))
    }

    /// Sequentially consistent load of a flag table entry.
    pub fn atomic_load(&self, index: usize) -> i32 {
        if !self.is_ready() {
            return 0;
        }
        self.buffer.flag_load(index)
    }

    /// Bump an epoch flag and wake its waiters. Returns the published value.
    pub fn publish_epoch(&self, index: usize) -> i32 {
        let value = self.buffer.flag_add(index, 1);
        self.buffer.notify(index);
        value
    }

    /// Request an orderly halt: set the shutdown flag and wake every waiter
    /// so no loop sleeps through it.
    pub fn request_shutdown(&self) {
        self.buffer.flag_store(flags::SHUTDOWN, 1);
        for index in 0..FLAG_COUNT {
            self.buffer.notify(index);
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.buffer.flag_load(flags::SHUTDOWN) != 0
    }

    /// True while the context-id hash still matches this bridge's context.
    /// Loops spawned before a re-initialization observe a mismatch and exit.
    pub fn context_current(&self) -> bool {
        self.buffer.flag_load(flags::CONTEXT_ID_HASH) == self.context_hash
    }

    pub fn watcher(&self, mode: WaitMode) -> EpochWatcher {
        EpochWatcher::new(self.buffer.clone(), mode)
    }

    /// Cached view over `[offset, offset + size)`. The same key returns the
    /// same handle until `clear`.
    pub fn get_region_view(&self, offset: usize, size: usize) -> Result<Arc<RegionView>, BridgeError> {
        if !self.is_ready() {
            return Err(BridgeError::NotReady);
        }
        if offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(BridgeError::Access(lattice_shared::AccessError::OutOfBounds {
                offset,
                len: size,
                capacity: self.size,
            }));
        }
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let view = views.entry((offset, size)).or_insert_with(|| {
            Arc::new(RegionView {
                buffer: self.buffer.clone(),
                generation: self.generation.clone(),
                born: self.generation.load(Ordering::SeqCst),
                offset,
                size,
            })
        });
        Ok(view.clone())
    }

    /// View over a schema region.
    pub fn region_view(&self, id: RegionId) -> Result<Arc<RegionView>, BridgeError> {
        let RegionExtent { offset, size, .. } = self.layout.region(id);
        self.get_region_view(offset, size)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("size", &self.size)
            .field("tier", &self.layout.tier)
            .field("ready", &self.is_ready())
            .field("context_hash", &self.context_hash)
            .finish()
    }
}

/// A typed window over one region. Offsets are view-relative; every access
/// is bounds-checked against the region and fails with `NotReady` once the
/// owning bridge has been cleared.
pub struct RegionView {
    buffer: Arc<SharedBuffer>,
    generation: Arc<AtomicU64>,
    born: u64,
    offset: usize,
    size: usize,
}

impl RegionView {
    fn live(&self) -> Result<(), BridgeError> {
        if self.generation.load(Ordering::SeqCst) != self.born {
            return Err(BridgeError::NotReady);
        }
        Ok(())
    }

    fn abs(&self, offset: usize, len: usize) -> Result<usize, BridgeError> {
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(BridgeError::Access(lattice_shared::AccessError::OutOfBounds {
                offset,
                len,
                capacity: self.size,
            }));
        }
        Ok(self.offset + offset)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), BridgeError> {
        self.live()?;
        let abs = self.abs(offset, dst.len())?;
        Ok(self.buffer.read_bytes(abs, dst)?)
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), BridgeError> {
        self.live()?;
        let abs = self.abs(offset, src.len())?;
        Ok(self.buffer.write_bytes(abs, src)?)
    }

    pub fn zero_bytes(&self, offset: usize, len: usize) -> Result<(), BridgeError> {
        self.live()?;
        let abs = self.abs(offset, len)?;
        Ok(self.buffer.zero_bytes(abs, len)?)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, BridgeError> {
        self.live()?;
        let abs = self.abs(offset, 4)?;
        Ok(self.buffer.read_u32(abs)?)
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> Result<(), BridgeError> {
        self.live()?;
        let abs = self.abs(offset, 4)?;
        Ok(self.buffer.write_u32(abs, value)?)
    }

    /// Sequentially consistent load of a 4-aligned word in the region.
    pub fn atomic_u32_load(&self, offset: usize) -> Result<u32, BridgeError> {
        self.live()?;
        let abs = self.abs(offset, 4)?;
        Ok(self.buffer.u32_load(abs)?)
    }

    pub fn atomic_u32_store(&self, offset: usize, value: u32) -> Result<(), BridgeError> {
        self.live()?;
        let abs = self.abs(offset, 4)?;
        Ok(self.buffer.u32_store(abs, value)?)
    }
}

impl std::fmt::Debug for RegionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionView")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}
