use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use lattice_bridge::{Bridge, BridgeError, Park, WaitMode};
use lattice_ipc::protocol::{decode_job_reply, encode_job, Job, JobReply};
use lattice_ipc::{IpcError, OutboxConsumer, OutboxProducer};
use lattice_layout::{flags, Owner, RegionId};

use crate::error::DispatchError;
use crate::registry::CapabilityRegistry;
use crate::worker::{ModuleRuntime, WorkerPool};

/// How long `call` waits for a capability to appear before giving up on
/// finding an executor.
const CAPABILITY_GRACE: Duration = Duration::from_millis(500);

struct ReplyInbox {
    consumer: OutboxConsumer,
    stash: HashMap<u64, JobReply>,
}

/// Kernel-side router: writes jobs to the inbox ring, correlates replies
/// off the kernel-bound outbox by id, and falls back to a local
/// synchronous module when no worker is eligible.
pub struct Dispatcher {
    bridge: Arc<Bridge>,
    mode: WaitMode,
    registry: CapabilityRegistry,
    pool: WorkerPool,
    inbox: OutboxProducer,
    replies: Mutex<ReplyInbox>,
    local: Mutex<HashMap<String, Box<dyn ModuleRuntime>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(bridge: Arc<Bridge>, mode: WaitMode) -> Result<Dispatcher, DispatchError> {
        Ok(Dispatcher {
            registry: CapabilityRegistry::new(bridge.clone())?,
            pool: WorkerPool::new(bridge.clone(), mode)?,
            inbox: OutboxProducer::new(bridge.clone(), RegionId::Inbox, Owner::KERNEL)?,
            replies: Mutex::new(ReplyInbox {
                consumer: OutboxConsumer::new(bridge.clone(), RegionId::OutboxKernel, Owner::KERNEL)?,
                stash: HashMap::new(),
            }),
            local: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            mode,
            bridge,
        })
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Spin up `parallel` workers for `(library, role)`, reusing matching
    /// ones. Each worker gets its partition index and its own module.
    pub fn plug(
        &self,
        library: &str,
        role: &str,
        parallel: usize,
        factory: impl Fn(usize) -> Box<dyn ModuleRuntime>,
    ) -> Result<(), DispatchError> {
        self.pool.plug(&self.registry, library, role, parallel, factory)
    }

    /// Register a module for the local synchronous path, used when no
    /// pooled worker matches.
    pub fn register_local(&self, module: Box<dyn ModuleRuntime>) {
        let library = module.library().to_string();
        debug!(library = %library, "registering local module");
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(library, module);
    }

    /// Park on the registry epoch until the capability shows up; false on
    /// timeout, per the capability-wait contract.
    pub fn wait_for_capability(&self, library: &str, method: &str, timeout: Duration) -> bool {
        self.registry
            .wait_for_capability(library, Some(method), timeout, self.mode)
    }

    /// Route one call. Pooled workers win over the local path; when neither
    /// exists the call waits a bounded grace period for a capability and
    /// then fails with `NoExecutor`.
    pub fn call(
        &self,
        library: &str,
        method: &str,
        params: &[u8],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, DispatchError> {
        if self.remote_eligible(library, method) {
            return self.call_remote(library, method, params, input, timeout);
        }
        if self.has_local(library) {
            return self.call_local(library, method, params, input);
        }
        let grace = CAPABILITY_GRACE.min(timeout);
        if self
            .registry
            .wait_for_capability(library, Some(method), grace, self.mode)
        {
            if self.remote_eligible(library, method) {
                return self.call_remote(library, method, params, input, timeout);
            }
            // Announced, but nobody executes it here.
            return Err(DispatchError::NoExecutor {
                library: library.to_string(),
                method: method.to_string(),
            });
        }
        Err(DispatchError::CapabilityUnavailable {
            library: library.to_string(),
            method: method.to_string(),
        })
    }

    fn remote_eligible(&self, library: &str, method: &str) -> bool {
        self.pool.worker_count(library) > 0
            && self.registry.has_capability(library, Some(method))
    }

    fn has_local(&self, library: &str) -> bool {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(library)
    }

    fn call_local(
        &self,
        library: &str,
        method: &str,
        params: &[u8],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, DispatchError> {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let module = local
            .get_mut(library)
            .ok_or_else(|| DispatchError::NoExecutor {
                library: library.to_string(),
                method: method.to_string(),
            })?;
        module
            .execute(method, params, input)
            .map_err(|reason| DispatchError::Worker { reason })
    }

    fn call_remote(
        &self,
        library: &str,
        method: &str,
        params: &[u8],
        input: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>, DispatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            library: library.to_string(),
            method: method.to_string(),
            params: params.to_vec(),
            input: input.map(<[u8]>::to_vec),
        };
        let deadline = Instant::now() + timeout;

        // Concurrent callers contend on the inbox write guard; contention
        // and back-pressure both mean "try again" until the deadline.
        let encoded = encode_job(&job);
        loop {
            match self.inbox.push(&encoded) {
                Ok(()) => break,
                Err(IpcError::BackPressure { .. })
                | Err(IpcError::Bridge(BridgeError::RegionDenied { .. })) => {
                    if self.bridge.shutdown_requested() {
                        return Err(DispatchError::Shutdown);
                    }
                    if Instant::now() >= deadline {
                        return Err(DispatchError::Timeout { what: "inbox slot" });
                    }
                    std::thread::yield_now();
                }
                Err(err) => return Err(err.into()),
            }
        }

        let watcher = self.bridge.watcher(self.mode);
        loop {
            let epoch = self.bridge.atomic_load(flags::OUTBOX_KERNEL_DIRTY);
            if let Some(reply) = self.take_reply(id) {
                return match reply {
                    JobReply::Done { output, .. } => Ok(output),
                    JobReply::Failed { reason, .. } => Err(DispatchError::Worker { reason }),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(id, library, method, "job reply timed out");
                return Err(DispatchError::Timeout { what: "job reply" });
            }
            match watcher.park(flags::OUTBOX_KERNEL_DIRTY, epoch, Some(deadline - now)) {
                Park::Shutdown => return Err(DispatchError::Shutdown),
                Park::Changed(_) | Park::TimedOut(_) => {}
            }
        }
    }

    fn take_reply(&self, id: u64) -> Option<JobReply> {
        let mut inbox = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stashed_for_others = false;
        while let Some(raw) = inbox.consumer.pop() {
            match decode_job_reply(&raw) {
                Ok(reply) => {
                    stashed_for_others |= reply.id() != id;
                    inbox.stash.insert(reply.id(), reply);
                }
                Err(err) => warn!(%err, "dropping undecodable job reply"),
            }
        }
        let mine = inbox.stash.remove(&id);
        drop(inbox);
        if stashed_for_others {
            // Whoever those replies belong to is parked on the outbox
            // epoch, which our drain consumed; republish so they re-check
            // the stash.
            self.bridge.publish_epoch(flags::OUTBOX_KERNEL_DIRTY);
        }
        mine
    }

    /// Raise the shutdown flag, wake every waiter, and join the workers.
    pub fn shutdown(&self) {
        self.bridge.request_shutdown();
        self.pool.join();
    }
}
