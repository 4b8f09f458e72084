use std::fmt;

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// UNIX nanoseconds timestamp claimed by an event creator.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Build a timestamp from whole UNIX seconds.
    #[must_use]
    pub const fn from_unix(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    /// Whole UNIX seconds, truncating sub-second precision.
    #[must_use]
    pub const fn unix(self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    /// Big-endian byte representation.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn unix_roundtrip_truncates_nanos() {
        let t = Timestamp::from_unix(1_700_000_000);
        assert_eq!(t.unix(), 1_700_000_000);
        assert_eq!(Timestamp(t.0 + 999).unix(), 1_700_000_000);
    }

    #[test]
    fn ordering_follows_nanos() {
        assert!(Timestamp(1) < Timestamp(2));
        assert_eq!(Timestamp::default(), Timestamp(0));
    }
}
