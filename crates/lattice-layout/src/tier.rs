use serde::{Deserialize, Serialize};

const MIB: usize = 1024 * 1024;

/// Total size of the shared buffer, negotiated at startup from the host's
/// memory budget. Every region except the arena sits at the same offset in
/// all tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Mib32,
    Mib64,
    Mib128,
    Mib256,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Mib32, Tier::Mib64, Tier::Mib128, Tier::Mib256];

    /// Total buffer length in bytes.
    pub fn total_bytes(self) -> usize {
        match self {
            Tier::Mib32 => 32 * MIB,
            Tier::Mib64 => 64 * MIB,
            Tier::Mib128 => 128 * MIB,
            Tier::Mib256 => 256 * MIB,
        }
    }

    /// The tier whose buffer is exactly `len` bytes, if any. Used when
    /// attaching to a buffer created by another context.
    pub fn from_exact(len: usize) -> Option<Tier> {
        Tier::ALL.into_iter().find(|t| t.total_bytes() == len)
    }
}
