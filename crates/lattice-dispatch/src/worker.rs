use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use lattice_bridge::{Bridge, BridgeError, Park, WaitMode};
use lattice_ipc::protocol::{decode_job, encode_job_reply, Job, JobReply};
use lattice_ipc::{IpcError, OutboxConsumer, OutboxProducer};
use lattice_layout::{flags, Owner, RegionId};

use crate::error::DispatchError;
use crate::registry::CapabilityRegistry;

/// What a compute module implements. Instances are owned by one worker
/// thread each; the pool builds them through the factory handed to `plug`.
pub trait ModuleRuntime: Send {
    fn library(&self) -> &str;

    /// Method names announced in the capability registry on plug.
    fn methods(&self) -> Vec<String>;

    fn execute(
        &mut self,
        method: &str,
        params: &[u8],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, String>;
}

/// Fans inbox jobs out to per-library queues. The inbox ring has a single
/// logical consumer; whichever worker wakes first drains it under the
/// router lock and the decoded jobs land in their pool's local queue.
struct InboxRouter {
    bridge: Arc<Bridge>,
    consumer: Mutex<OutboxConsumer>,
    queues: Mutex<HashMap<String, mpsc::Sender<Job>>>,
    /// Jobs naming an unplugged library are failed back to the dispatcher.
    rejects: Mutex<OutboxProducer>,
}

impl InboxRouter {
    fn new(bridge: Arc<Bridge>) -> Result<InboxRouter, DispatchError> {
        Ok(InboxRouter {
            consumer: Mutex::new(OutboxConsumer::new(
                bridge.clone(),
                RegionId::Inbox,
                Owner::MODULE,
            )?),
            queues: Mutex::new(HashMap::new()),
            rejects: Mutex::new(OutboxProducer::new(
                bridge.clone(),
                RegionId::OutboxKernel,
                Owner::MODULE,
            )?),
            bridge,
        })
    }

    fn register(&self, library: &str, sender: mpsc::Sender<Job>) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(library.to_string(), sender);
    }

    fn route_pending(&self) {
        let consumer = self.consumer.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(raw) = consumer.pop() {
            let job = match decode_job(&raw) {
                Ok(job) => job,
                Err(err) => {
                    warn!(%err, "dropping undecodable inbox job");
                    continue;
                }
            };
            let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            match queues.get(&job.library) {
                Some(sender) => {
                    if let Err(send_err) = sender.send(job) {
                        let job = send_err.0;
                        drop(queues);
                        self.reject(job, "worker pool gone");
                    }
                }
                None => {
                    let library = job.library.clone();
                    drop(queues);
                    self.reject(job, &format!("no worker pool for {library}"));
                }
            }
        }
    }

    fn reject(&self, job: Job, reason: &str) {
        let reply = JobReply::Failed {
            id: job.id,
            reason: reason.to_string(),
        };
        let producer = self.rejects.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = push_with_retry(&self.bridge, &producer, &encode_job_reply(&reply)) {
            warn!(%err, id = job.id, "could not reject unroutable job");
        }
    }
}

/// Serialized-entry push: guard contention and back-pressure both mean
/// "yield and try again", bounded by the shutdown flag.
fn push_with_retry(
    bridge: &Bridge,
    producer: &OutboxProducer,
    payload: &[u8],
) -> Result<(), IpcError> {
    loop {
        match producer.push(payload) {
            Ok(()) => return Ok(()),
            Err(IpcError::BackPressure { .. })
            | Err(IpcError::Bridge(BridgeError::RegionDenied { .. })) => {
                if bridge.shutdown_requested() {
                    return Err(IpcError::Shutdown);
                }
                thread::yield_now();
            }
            Err(err) => return Err(err),
        }
    }
}

struct WorkerHandle {
    library: String,
    role: String,
    index: usize,
    thread: thread::JoinHandle<()>,
}

struct PoolQueue {
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
}

/// Pool of compute workers, keyed by `(library, role, index)`. Each worker
/// holds its own module instance and a handle to the shared buffer, parks
/// on the inbox epoch, and answers on the kernel-bound outbox.
pub struct WorkerPool {
    bridge: Arc<Bridge>,
    mode: WaitMode,
    router: Arc<InboxRouter>,
    queues: Mutex<HashMap<String, PoolQueue>>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl WorkerPool {
    pub fn new(bridge: Arc<Bridge>, mode: WaitMode) -> Result<WorkerPool, DispatchError> {
        let router = Arc::new(InboxRouter::new(bridge.clone())?);
        Ok(WorkerPool {
            bridge,
            mode,
            router,
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Workers currently plugged for a library.
    pub fn worker_count(&self, library: &str) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.library == library)
            .count()
    }

    /// Spin up workers for `(library, role)` until `parallel` of them
    /// exist; workers already matching are reused. The first instance's
    /// announced methods are recorded in the registry.
    pub fn plug(
        &self,
        registry: &CapabilityRegistry,
        library: &str,
        role: &str,
        parallel: usize,
        factory: impl Fn(usize) -> Box<dyn ModuleRuntime>,
    ) -> Result<(), DispatchError> {
        let receiver = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            let queue = queues.entry(library.to_string()).or_insert_with(|| {
                let (sender, receiver) = mpsc::channel();
                self.router.register(library, sender);
                PoolQueue {
                    receiver: Arc::new(Mutex::new(receiver)),
                }
            });
            queue.receiver.clone()
        };

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = workers
            .iter()
            .filter(|w| w.library == library && w.role == role)
            .count();

        let mut announced = existing > 0;
        for index in existing..parallel {
            let module = factory(index);
            if !announced {
                let methods = module.methods();
                let methods: Vec<&str> = methods.iter().map(String::as_str).collect();
                registry.announce(library, &methods)?;
                announced = true;
            }
            let thread = self.spawn_worker(library, role, index, module, receiver.clone())?;
            workers.push(WorkerHandle {
                library: library.to_string(),
                role: role.to_string(),
                index,
                thread,
            });
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        library: &str,
        role: &str,
        index: usize,
        mut module: Box<dyn ModuleRuntime>,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ) -> Result<thread::JoinHandle<()>, DispatchError> {
        let bridge = self.bridge.clone();
        let router = self.router.clone();
        let mode = self.mode;
        let name = format!("{library}-{role}-{index}");
        let replies = OutboxProducer::new(bridge.clone(), RegionId::OutboxKernel, Owner::MODULE)?;

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(worker = %name, "worker loop starting");
                let watcher = bridge.watcher(mode);
                let mut expected = bridge.atomic_load(flags::INBOX_DIRTY);
                loop {
                    if !bridge.context_current() {
                        debug!(worker = %name, "worker exiting: stale context");
                        return;
                    }
                    router.route_pending();
                    loop {
                        let job = receiver
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .try_recv();
                        let Ok(job) = job else { break };
                        let reply = run_job(module.as_mut(), &job);
                        if let Err(err) = push_with_retry(&bridge, &replies, &encode_job_reply(&reply)) {
                            warn!(worker = %name, %err, id = job.id, "reply lost");
                        }
                    }
                    // Bounded park so the loop re-checks the context hash
                    // even when the inbox stays quiet.
                    match watcher.park(flags::INBOX_DIRTY, expected, Some(Duration::from_millis(200))) {
                        Park::Shutdown => {
                            debug!(worker = %name, "worker exiting: shutdown");
                            return;
                        }
                        Park::Changed(value) | Park::TimedOut(value) => expected = value,
                    }
                }
            })
            .expect("spawn worker thread");
        Ok(handle)
    }

    /// Join every worker. Call after the shutdown flag is raised.
    pub fn join(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.drain(..) {
            if worker.thread.join().is_err() {
                warn!(
                    library = %worker.library,
                    role = %worker.role,
                    index = worker.index,
                    "worker thread panicked"
                );
            }
        }
    }
}

fn run_job(module: &mut dyn ModuleRuntime, job: &Job) -> JobReply {
    match module.execute(&job.method, &job.params, job.input.as_deref()) {
        Ok(output) => JobReply::Done { id: job.id, output },
        Err(reason) => JobReply::Failed { id: job.id, reason },
    }
}
