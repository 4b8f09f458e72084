//! Highest-before vectors.
//!
//! A [`HighestBefore`] vector is attached to every indexed event. For each
//! validator branch it records the highest sequence number from that branch
//! the event causally observes, the lowest sequence still known on the path
//! to it, and the creation time that branch claimed for its highest event.
//!
//! # Sub-modules
//!
//! - [`ops`]: merge operators ([`HighestBefore::collect_from`],
//!   [`HighestBefore::gather_from`], [`HighestBefore::init_with_event`]).
//! - [`codec`]: fixed-width byte layout used by the overlay store.

pub mod codec;
pub mod ops;

pub use codec::VectorError;

use crate::time::Timestamp;
use crate::{BranchId, EventSeq};

/// Knowledge about one branch inside a [`HighestBefore`] vector.
///
/// Once a branch is observed to equivocate its slot becomes [`BranchSeq::Forked`]
/// and never returns to [`BranchSeq::Clean`]; a forked slot carries no
/// sequence numbers because they no longer order anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchSeq {
    Clean { seq: EventSeq, min_seq: EventSeq },
    Forked,
}

impl Default for BranchSeq {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BranchSeq {
    /// Slot that observes nothing.
    pub const EMPTY: Self = Self::Clean { seq: 0, min_seq: 0 };

    /// True when nothing from this branch is observed and it is not forked.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Clean { seq: 0, .. })
    }

    #[must_use]
    pub const fn is_fork_detected(self) -> bool {
        matches!(self, Self::Forked)
    }

    /// Highest observed sequence; 0 for forked slots.
    #[must_use]
    pub const fn seq(self) -> EventSeq {
        match self {
            Self::Clean { seq, .. } => seq,
            Self::Forked => 0,
        }
    }

    /// Lowest known sequence on the path to [`Self::seq`]; 0 for forked slots.
    #[must_use]
    pub const fn min_seq(self) -> EventSeq {
        match self {
            Self::Clean { min_seq, .. } => min_seq,
            Self::Forked => 0,
        }
    }
}

/// Per-event vector of [`BranchSeq`] plus the claimed creation times,
/// indexed by [`BranchId`].
///
/// Reads past the end return an empty slot; writes past the end grow the
/// vector. A time entry is only meaningful when its slot has a non-zero seq.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighestBefore {
    seqs: Vec<BranchSeq>,
    times: Vec<Timestamp>,
}

impl HighestBefore {
    /// Empty vector with room for `size` branches.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            seqs: vec![BranchSeq::EMPTY; size],
            times: vec![Timestamp::default(); size],
        }
    }

    /// Number of branch slots currently allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    #[cfg(test)]
    pub(crate) fn is_zero_sized(&self) -> bool {
        self.seqs.is_empty()
    }

    #[must_use]
    pub fn get(&self, branch: BranchId) -> BranchSeq {
        self.seqs
            .get(branch as usize)
            .copied()
            .unwrap_or(BranchSeq::EMPTY)
    }

    /// Claimed creation time of the highest observed event of `branch`.
    #[must_use]
    pub fn time(&self, branch: BranchId) -> Timestamp {
        self.times
            .get(branch as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&mut self, branch: BranchId, seq: BranchSeq) {
        let i = self.grow_to(branch);
        self.seqs[i] = seq;
    }

    pub fn set_time(&mut self, branch: BranchId, time: Timestamp) {
        let i = self.grow_to(branch);
        self.times[i] = time;
    }

    #[must_use]
    pub fn is_empty(&self, branch: BranchId) -> bool {
        self.get(branch).is_empty()
    }

    #[must_use]
    pub fn is_fork_detected(&self, branch: BranchId) -> bool {
        self.get(branch).is_fork_detected()
    }

    #[must_use]
    pub fn seq(&self, branch: BranchId) -> EventSeq {
        self.get(branch).seq()
    }

    #[must_use]
    pub fn min_seq(&self, branch: BranchId) -> EventSeq {
        self.get(branch).min_seq()
    }

    /// Mark `branch` as equivocating. Sticky.
    pub fn set_fork_detected(&mut self, branch: BranchId) {
        self.set(branch, BranchSeq::Forked);
    }

    /// Iterate `(branch, seq, time)` over allocated slots.
    pub fn iter(&self) -> impl Iterator<Item = (BranchId, BranchSeq, Timestamp)> + '_ {
        self.seqs
            .iter()
            .zip(&self.times)
            .enumerate()
            .map(|(i, (seq, time))| (branch_id(i), *seq, *time))
    }

    fn grow_to(&mut self, branch: BranchId) -> usize {
        let i = branch as usize;
        if i >= self.seqs.len() {
            self.seqs.resize(i + 1, BranchSeq::EMPTY);
            self.times.resize(i + 1, Timestamp::default());
        }
        i
    }
}

fn branch_id(i: usize) -> BranchId {
    BranchId::try_from(i).unwrap_or(BranchId::MAX)
}
