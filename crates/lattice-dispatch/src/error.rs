use thiserror::Error;

use lattice_bridge::BridgeError;
use lattice_ipc::protocol::DecodeError;
use lattice_ipc::IpcError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No worker matches the capability and no local path exists.
    #[error("no executor for {library}::{method}")]
    NoExecutor { library: String, method: String },

    /// The bounded wait for the capability to be announced elapsed.
    #[error("capability {library}::{method} never appeared")]
    CapabilityUnavailable { library: String, method: String },

    /// The worker rejected the correlated request.
    #[error("worker failed: {reason}")]
    Worker { reason: String },

    /// Timed out waiting for the correlated reply.
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// The registry has no free entry for another module.
    #[error("module registry is full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    /// Shutdown observed while the call was in flight.
    #[error("shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
