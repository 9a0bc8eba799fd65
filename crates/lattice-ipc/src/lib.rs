//! Cross-context queues inside the shared buffer.
//!
//! Three transports share the epoch-flag publish protocol:
//!
//! - the wrap-around byte ring carrying length-prefixed opaque messages
//!   (inbox and both outboxes, and the arena queues with roles reversed);
//! - the mesh-event queue of fixed-size CRC-checked slots;
//! - the arena request/response pair serving bump allocations.
//!
//! Message payloads are opaque bytes end to end; the `protocol` module
//! provides the codecs the dispatcher layers on top.

mod arena;
mod error;
mod mesh;
mod outbox;
pub mod protocol;
mod ring;

pub use arena::{ArenaClient, ArenaGrant, ArenaServer};
pub use error::IpcError;
pub use mesh::{MeshConsumer, MeshProducer};
pub use outbox::{OutboxConsumer, OutboxProducer};
pub use ring::{ByteRing, RingStatus};
