use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use lattice_bridge::{Bridge, EpochWatcher, Park, WaitMode};
use lattice_layout::{flags, Owner, RegionId};

use crate::error::IpcError;
use crate::outbox::{OutboxConsumer, OutboxProducer};

const TRIPLE_BYTES: usize = 12;

/// Offset sentinel answering a request the arena cannot satisfy.
const EXHAUSTED: u32 = u32::MAX;

fn encode_triple(a: u32, b: u32, c: u32) -> [u8; TRIPLE_BYTES] {
    let mut out = [0u8; TRIPLE_BYTES];
    out[0..4].copy_from_slice(&a.to_le_bytes());
    out[4..8].copy_from_slice(&b.to_le_bytes());
    out[8..12].copy_from_slice(&c.to_le_bytes());
    out
}

fn decode_triple(bytes: &[u8]) -> Option<(u32, u32, u32)> {
    if bytes.len() != TRIPLE_BYTES {
        return None;
    }
    Some((
        u32::from_le_bytes(bytes[0..4].try_into().ok()?),
        u32::from_le_bytes(bytes[4..8].try_into().ok()?),
        u32::from_le_bytes(bytes[8..12].try_into().ok()?),
    ))
}

/// A satisfied allocation: an arena-relative byte range the requester may
/// use until the next re-initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaGrant {
    pub offset: u32,
    pub size: u32,
}

/// Module-side allocator client. Requests travel the arena request ring;
/// grants come back on the response ring, correlated by id. The allocator
/// generation flag doubles as the wakeup signal in both directions.
///
/// One client is shared by all module workers of a context; responses for
/// other requesters are parked in a stash rather than dropped.
pub struct ArenaClient {
    bridge: Arc<Bridge>,
    producer: OutboxProducer,
    inbox: Mutex<ClientInbox>,
    watcher: EpochWatcher,
    next_id: AtomicU32,
}

struct ClientInbox {
    consumer: OutboxConsumer,
    stash: HashMap<u32, (u32, u32)>,
}

impl ArenaClient {
    pub fn new(bridge: Arc<Bridge>, mode: WaitMode) -> Result<ArenaClient, IpcError> {
        Ok(ArenaClient {
            producer: OutboxProducer::new(bridge.clone(), RegionId::ArenaRequest, Owner::MODULE)?,
            inbox: Mutex::new(ClientInbox {
                consumer: OutboxConsumer::new(bridge.clone(), RegionId::ArenaResponse, Owner::MODULE)?,
                stash: HashMap::new(),
            }),
            watcher: bridge.watcher(mode),
            next_id: AtomicU32::new(1),
            bridge,
        })
    }

    /// Allocate `size` bytes at `align` alignment, waiting up to `timeout`
    /// for the kernel to answer.
    pub fn request(&self, size: u32, align: u32, timeout: Duration) -> Result<ArenaGrant, IpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        // Requesters across module workers contend on the request ring's
        // write guard; keep trying until the deadline.
        let encoded = encode_triple(id, size, align);
        loop {
            match self.producer.push(&encoded) {
                Ok(()) => break,
                Err(IpcError::BackPressure { .. })
                | Err(IpcError::Bridge(lattice_bridge::BridgeError::RegionDenied { .. })) => {
                    if self.bridge.shutdown_requested() {
                        return Err(IpcError::Shutdown);
                    }
                    if Instant::now() >= deadline {
                        return Err(IpcError::Timeout {
                            what: "arena request slot",
                        });
                    }
                    std::thread::yield_now();
                }
                Err(err) => return Err(err),
            }
        }
        loop {
            // Snapshot the generation before draining: a response landing
            // after the snapshot bumps the flag and ends the park at once.
            let generation = self.bridge.atomic_load(flags::ARENA_ALLOCATOR);
            if let Some((offset, granted)) = self.take_response(id) {
                if offset == EXHAUSTED {
                    return Err(IpcError::ArenaExhausted {
                        requested: size as usize,
                    });
                }
                return Ok(ArenaGrant {
                    offset,
                    size: granted,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(IpcError::Timeout {
                    what: "arena response",
                });
            }
            match self
                .watcher
                .park(flags::ARENA_ALLOCATOR, generation, Some(deadline - now))
            {
                Park::Shutdown => return Err(IpcError::Shutdown),
                Park::Changed(_) | Park::TimedOut(_) => {}
            }
        }
    }

    fn take_response(&self, id: u32) -> Option<(u32, u32)> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stashed_for_others = false;
        while let Some(raw) = inbox.consumer.pop() {
            if let Some((rid, offset, size)) = decode_triple(&raw) {
                stashed_for_others |= rid != id;
                inbox.stash.insert(rid, (offset, size));
            }
        }
        let mine = inbox.stash.remove(&id);
        drop(inbox);
        if stashed_for_others {
            // Other requesters park on the generation flag; our drain ate
            // their wakeup, so publish a fresh one.
            self.bridge.publish_epoch(flags::ARENA_ALLOCATOR);
        }
        mine
    }
}

/// Kernel-side allocator: drains requests, bump-allocates from the arena
/// region, and answers on the response ring. The cursor lives with the
/// serving context; the shared generation flag only signals activity.
pub struct ArenaServer {
    bridge: Arc<Bridge>,
    requests: OutboxConsumer,
    responses: OutboxProducer,
    cursor: AtomicU32,
    arena_len: u32,
}

impl ArenaServer {
    pub fn new(bridge: Arc<Bridge>) -> Result<ArenaServer, IpcError> {
        let arena_len = bridge.layout().region(RegionId::Arena).size;
        Ok(ArenaServer {
            requests: OutboxConsumer::new(bridge.clone(), RegionId::ArenaRequest, Owner::KERNEL)?,
            responses: OutboxProducer::new(bridge.clone(), RegionId::ArenaResponse, Owner::KERNEL)?,
            bridge,
            cursor: AtomicU32::new(0),
            arena_len: arena_len.min(u32::MAX as usize) as u32,
        })
    }

    pub fn bytes_used(&self) -> u32 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Serve every pending request. Returns the number answered.
    pub fn service(&self) -> Result<usize, IpcError> {
        let mut served = 0usize;
        while let Some(raw) = self.requests.pop() {
            let Some((id, size, align)) = decode_triple(&raw) else {
                debug!(len = raw.len(), "dropping malformed arena request");
                continue;
            };
            let response = self
                .allocate(size, align)
                .map_or(encode_triple(id, EXHAUSTED, 0), |offset| {
                    encode_triple(id, offset, size)
                });
            self.responses.push(&response)?;
            served += 1;
        }
        if served > 0 {
            // The response ring has no epoch of its own; the allocator
            // generation flag wakes requesters.
            self.bridge.publish_epoch(flags::ARENA_ALLOCATOR);
        }
        Ok(served)
    }

    fn allocate(&self, size: u32, align: u32) -> Option<u32> {
        let align = align.max(1);
        if !align.is_power_of_two() || size == 0 {
            return None;
        }
        loop {
            let cursor = self.cursor.load(Ordering::Relaxed);
            let aligned = cursor.checked_add(align - 1)? & !(align - 1);
            let end = aligned.checked_add(size)?;
            if end > self.arena_len {
                return None;
            }
            if self
                .cursor
                .compare_exchange(cursor, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }
}
