//! Byte layout of a [`HighestBefore`] vector inside the overlay store.
//!
//! Every branch occupies [`SLOT_SIZE`] bytes, all big-endian:
//!
//! ```text
//! 0..4    seq      u32
//! 4..8    min_seq  u32
//! 8..16   time     u64 (UNIX nanoseconds)
//! ```
//!
//! A forked slot is written as `seq = 0, min_seq = FORK_MIN_SEQ`. No clean
//! slot can carry that pair because a clean slot with `seq = 0` always has
//! `min_seq = 0`.

use super::{BranchSeq, HighestBefore};
use crate::error::ErrorCode;
use crate::time::Timestamp;
use crate::EventSeq;

/// Bytes per encoded branch slot.
pub const SLOT_SIZE: usize = 16;

/// `min_seq` sentinel marking a forked slot.
pub const FORK_MIN_SEQ: EventSeq = 0x7FFF_FFFF;

/// Errors returned when decoding a stored vector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VectorError {
    /// The value length is not a whole number of slots.
    #[error("vector of {len} bytes is not a multiple of {SLOT_SIZE}")]
    Truncated { len: usize },
}

impl VectorError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::CorruptVector
    }
}

impl HighestBefore {
    /// Encode into the fixed-width slot layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len() * SLOT_SIZE);
        for (_, seq, time) in self.iter() {
            let (s, m) = match seq {
                BranchSeq::Clean { seq, min_seq } => (seq, min_seq),
                BranchSeq::Forked => (0, FORK_MIN_SEQ),
            };
            buf.extend_from_slice(&s.to_be_bytes());
            buf.extend_from_slice(&m.to_be_bytes());
            buf.extend_from_slice(&time.to_be_bytes());
        }
        buf
    }

    /// Decode a vector written by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Truncated`] if `data` is not a whole number of
    /// slots.
    pub fn from_bytes(data: &[u8]) -> Result<Self, VectorError> {
        if data.len() % SLOT_SIZE != 0 {
            return Err(VectorError::Truncated { len: data.len() });
        }
        let mut hb = Self::new(data.len() / SLOT_SIZE);
        for (branch, slot) in (0..).zip(data.chunks_exact(SLOT_SIZE)) {
            let seq = be_u32(&slot[0..4]);
            let min_seq = be_u32(&slot[4..8]);
            let time = be_u64(&slot[8..16]);
            let decoded = if seq == 0 && min_seq == FORK_MIN_SEQ {
                BranchSeq::Forked
            } else {
                BranchSeq::Clean { seq, min_seq }
            };
            hb.set(branch, decoded);
            hb.set_time(branch, Timestamp(time));
        }
        Ok(hb)
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_be_bytes(raw)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_be_bytes(raw)
}
