use thiserror::Error;

use lattice_layout::LayoutError;
use lattice_shared::AccessError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Bridge not initialized, or cleared since the view was handed out.
    #[error("bridge is not ready")]
    NotReady,

    /// Caller's owner bit is not in the region's mask, or the single-writer
    /// lock is held by someone else.
    #[error("{owner} denied {action} access to {region}")]
    RegionDenied {
        region: &'static str,
        owner: &'static str,
        action: &'static str,
    },

    /// The buffer carries a different layout stamp than this build expects.
    #[error("layout stamp mismatch: magic {magic:#x} version {version}")]
    LayoutMismatch { magic: i32, version: i32 },

    /// The buffer length does not correspond to any memory tier.
    #[error("buffer length {len} matches no tier")]
    UnknownTier { len: usize },

    /// A dedicated buffer always starts at its own system base; embeddings
    /// with an interior base hand out the sub-buffer instead.
    #[error("system base {base} is not supported for a dedicated buffer")]
    UnsupportedBase { base: usize },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}
