//! The shared linear buffer `S` and the signaling substrate on top of it.
//!
//! One buffer is created per context tree and handed to every other context
//! by reference. All cross-context coordination goes through the atomic
//! flag table in its first 128 bytes; payload bytes are plain memory whose
//! visibility is established by the flag protocol.

mod buffer;
mod wait;

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub mod wasm;

pub use buffer::{AccessError, SharedBuffer};
pub use wait::WaitOutcome;
