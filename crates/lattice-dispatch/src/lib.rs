//! Routing of compute work across contexts.
//!
//! The dispatcher turns `(library, method, params, input?)` calls into jobs
//! on the inbox ring, correlates replies coming back over the kernel-bound
//! outbox, and falls back to a local synchronous module when no worker is
//! eligible. Modules announce their methods in the shared registry region;
//! `wait_for_capability` parks on the registry epoch.

mod dispatcher;
mod error;
mod registry;
mod worker;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use registry::CapabilityRegistry;
pub use worker::{ModuleRuntime, WorkerPool};
