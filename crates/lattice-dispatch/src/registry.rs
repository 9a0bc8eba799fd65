use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use lattice_bridge::{Bridge, Park, RegionView, WaitMode};
use lattice_layout::{flags, Owner, RegionId, MAX_MODULES_INLINE, REGISTRY_ENTRY_BYTES};

use crate::error::DispatchError;

const NAME_HASH: usize = 0;
const METHOD_COUNT: usize = 4;
const NAME: usize = 8;
const NAME_BYTES: usize = 24;
const METHODS: usize = 32;
const METHOD_BYTES: usize = 16;
const METHOD_SLOTS: usize = 4;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn padded<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let take = bytes.len().min(N);
    out[..take].copy_from_slice(&bytes[..take]);
    out
}

/// The module registry region: fixed 96-byte entries listing each loaded
/// module and up to four of its method strings. The kernel writes entries
/// on module load; every context scans them; waiters park on the registry
/// epoch until a capability appears.
pub struct CapabilityRegistry {
    bridge: Arc<Bridge>,
    view: Arc<RegionView>,
}

impl CapabilityRegistry {
    pub fn new(bridge: Arc<Bridge>) -> Result<CapabilityRegistry, DispatchError> {
        let view = bridge.region_view(RegionId::Registry)?;
        Ok(CapabilityRegistry { bridge, view })
    }

    fn entry(&self, index: usize) -> usize {
        index * REGISTRY_ENTRY_BYTES
    }

    /// Record a module and its announced methods, then publish the registry
    /// epoch. Re-announcing a library overwrites its entry.
    pub fn announce(&self, library: &str, methods: &[&str]) -> Result<(), DispatchError> {
        let hash = fnv1a(library.as_bytes()).max(1);
        let name = padded::<NAME_BYTES>(library);

        if methods.len() > METHOD_SLOTS {
            debug!(
                library,
                announced = methods.len(),
                kept = METHOD_SLOTS,
                "announcing only the first method slots"
            );
        }

        // Slot choice happens under the lease: a scan taken before it could
        // race another announcer onto the same free entry, and the second
        // writer would clobber the first.
        let mut lease = self
            .bridge
            .guards()
            .acquire_region_write(RegionId::Registry, Owner::KERNEL)?;
        let mut slot = None;
        for index in 0..MAX_MODULES_INLINE {
            let base = self.entry(index);
            let existing = self.view.read_u32(base + NAME_HASH)?;
            if existing == hash {
                let mut stored = [0u8; NAME_BYTES];
                self.view.read_bytes(base + NAME, &mut stored)?;
                if stored == name {
                    slot = Some(index);
                    break;
                }
            }
            if existing == 0 && slot.is_none() {
                slot = Some(index);
            }
        }
        // An early return drops the lease, which releases the lock.
        let index = slot.ok_or(DispatchError::RegistryFull {
            capacity: MAX_MODULES_INLINE,
        })?;
        let base = self.entry(index);
        self.view.write_bytes(base + NAME, &name)?;
        for (i, method) in methods.iter().take(METHOD_SLOTS).enumerate() {
            self.view
                .write_bytes(base + METHODS + i * METHOD_BYTES, &padded::<METHOD_BYTES>(method))?;
        }
        for i in methods.len().min(METHOD_SLOTS)..METHOD_SLOTS {
            self.view
                .write_bytes(base + METHODS + i * METHOD_BYTES, &[0u8; METHOD_BYTES])?;
        }
        self.view
            .write_u32(base + METHOD_COUNT, methods.len().min(METHOD_SLOTS) as u32)?;
        // Hash last: scanners treat a non-zero hash as a complete entry.
        self.view.write_u32(base + NAME_HASH, hash)?;

        self.bridge.publish_epoch(flags::REGISTRY_EPOCH);
        lease.ensure_epoch_advanced();
        lease.release();
        Ok(())
    }

    /// True if the library (and method, when given) is registered.
    pub fn has_capability(&self, library: &str, method: Option<&str>) -> bool {
        let hash = fnv1a(library.as_bytes()).max(1);
        let name = padded::<NAME_BYTES>(library);
        for index in 0..MAX_MODULES_INLINE {
            let base = self.entry(index);
            if self.view.read_u32(base + NAME_HASH).unwrap_or(0) != hash {
                continue;
            }
            let mut stored = [0u8; NAME_BYTES];
            if self.view.read_bytes(base + NAME, &mut stored).is_err() || stored != name {
                continue;
            }
            let Some(method) = method else {
                return true;
            };
            let want = padded::<METHOD_BYTES>(method);
            let count = self.view.read_u32(base + METHOD_COUNT).unwrap_or(0) as usize;
            for i in 0..count.min(METHOD_SLOTS) {
                let mut slot = [0u8; METHOD_BYTES];
                if self
                    .view
                    .read_bytes(base + METHODS + i * METHOD_BYTES, &mut slot)
                    .is_ok()
                    && slot == want
                {
                    return true;
                }
            }
            return false;
        }
        false
    }

    /// Registered libraries, for diagnostics.
    pub fn libraries(&self) -> Vec<String> {
        let mut out = Vec::new();
        for index in 0..MAX_MODULES_INLINE {
            let base = self.entry(index);
            if self.view.read_u32(base + NAME_HASH).unwrap_or(0) == 0 {
                continue;
            }
            let mut name = [0u8; NAME_BYTES];
            if self.view.read_bytes(base + NAME, &mut name).is_err() {
                continue;
            }
            let end = name.iter().position(|b| *b == 0).unwrap_or(NAME_BYTES);
            if let Ok(s) = std::str::from_utf8(&name[..end]) {
                out.push(s.to_string());
            }
        }
        out
    }

    /// Park on the registry epoch until the capability appears. Returns
    /// false (not an error) when the timeout elapses or shutdown interrupts.
    pub fn wait_for_capability(
        &self,
        library: &str,
        method: Option<&str>,
        timeout: Duration,
        mode: WaitMode,
    ) -> bool {
        let watcher = self.bridge.watcher(mode);
        let deadline = Instant::now() + timeout;
        loop {
            let epoch = self.bridge.atomic_load(flags::REGISTRY_EPOCH);
            if self.has_capability(library, method) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match watcher.park(flags::REGISTRY_EPOCH, epoch, Some(deadline - now)) {
                Park::Shutdown => return false,
                Park::Changed(_) | Park::TimedOut(_) => {}
            }
        }
    }
}
