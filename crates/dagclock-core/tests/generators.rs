#![allow(dead_code)]

use dagclock_core::{BranchSeq, HighestBefore, Timestamp, ValidatorWeights};
use proptest::prelude::*;

pub const BRANCHES: usize = 6;

pub fn arb_branch_seq() -> impl Strategy<Value = BranchSeq> + Clone {
    prop_oneof![
        3 => Just(BranchSeq::EMPTY),
        6 => (1u32..50, 0u32..50).prop_map(|(seq, back)| BranchSeq::Clean {
            seq,
            min_seq: seq.saturating_sub(back).max(1),
        }),
        1 => Just(BranchSeq::Forked),
    ]
}

/// A vector whose times are a function of (branch, seq), the way times of a
/// real DAG are: the same event always carries the same claimed time.
pub fn arb_vector() -> impl Strategy<Value = HighestBefore> + Clone {
    prop::collection::vec(arb_branch_seq(), BRANCHES).prop_map(|slots| {
        let mut hb = HighestBefore::new(BRANCHES);
        for (branch, seq) in (0u32..).zip(slots) {
            hb.set(branch, seq);
            if seq.seq() > 0 {
                hb.set_time(branch, claimed_time(branch, seq.seq()));
            }
        }
        hb
    })
}

pub fn claimed_time(branch: u32, seq: u32) -> Timestamp {
    Timestamp(u64::from(seq) * 1_000 + u64::from(branch))
}

pub fn arb_weights() -> impl Strategy<Value = ValidatorWeights> + Clone {
    prop::collection::vec(0u32..1_000, BRANCHES).prop_map(ValidatorWeights::new)
}

pub fn arb_pair() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> + Clone {
    (
        prop::collection::vec(any::<u8>(), 1..24),
        prop::collection::vec(any::<u8>(), 1..64),
    )
}
