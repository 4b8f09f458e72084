//! Merge operators over [`HighestBefore`] vectors.
//!
//! [`HighestBefore::collect_from`] is the pointwise supremum used while an
//! event is built from its parents. It is commutative, associative and
//! idempotent, which is what makes the final vector independent of the
//! order parents (and events) are processed in.
//!
//! [`HighestBefore::gather_from`] collapses several branches of the same
//! validator into one slot for consumers that want one slot per validator.

use super::{BranchSeq, HighestBefore};
use crate::index::IndexedEvent;
use crate::time::Timestamp;
use crate::BranchId;

impl HighestBefore {
    /// Seed the slot of the event's own creator branch.
    pub fn init_with_event<E: IndexedEvent + ?Sized>(&mut self, branch: BranchId, event: &E) {
        let seq = event.seq();
        self.set(branch, BranchSeq::Clean { seq, min_seq: seq });
        self.set_time(branch, event.creation_time());
    }

    /// Fold `other` into `self` for branches `0..branch_count`.
    pub fn collect_from(&mut self, other: &Self, branch_count: BranchId) {
        for branch in 0..branch_count {
            let his = other.get(branch);
            if his.is_empty() {
                continue;
            }
            let (my_seq, my_min) = match self.get(branch) {
                // already at the top of the lattice
                BranchSeq::Forked => continue,
                BranchSeq::Clean { seq, min_seq } => (seq, min_seq),
            };
            let BranchSeq::Clean {
                seq: his_seq,
                min_seq: his_min,
            } = his
            else {
                self.set_fork_detected(branch);
                continue;
            };

            let min_seq = if my_seq == 0 || my_min > his_min {
                his_min
            } else {
                my_min
            };
            if his_seq > my_seq {
                self.set(
                    branch,
                    BranchSeq::Clean {
                        seq: his_seq,
                        min_seq,
                    },
                );
                self.set_time(branch, other.time(branch));
            } else if min_seq != my_min {
                self.set(
                    branch,
                    BranchSeq::Clean {
                        seq: my_seq,
                        min_seq,
                    },
                );
            }
        }
    }

    /// Write into slot `to` the best of `other`'s slots listed in `from`.
    ///
    /// The first forked source in list order wins outright, keeping the time
    /// of the highest clean source scanned before it. Otherwise the source
    /// with the strictly highest seq wins, carrying its time.
    pub fn gather_from(&mut self, to: BranchId, other: &Self, from: &[BranchId]) {
        let mut highest = BranchSeq::EMPTY;
        let mut highest_time = Timestamp::default();
        for &branch in from {
            let seq = other.get(branch);
            if seq.is_fork_detected() {
                // keeps the time of the best clean source seen so far
                highest = seq;
                break;
            }
            if seq.seq() > highest.seq() {
                highest = seq;
                highest_time = other.time(branch);
            }
        }
        self.set(to, highest);
        self.set_time(to, highest_time);
    }
}
