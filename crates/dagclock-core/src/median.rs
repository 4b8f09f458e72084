//! Stake-weighted median of claimed creation times.
//!
//! Given a merged [`HighestBefore`] vector (one slot per validator), every
//! validator votes for the creation time of its highest observed event with
//! its stake. Forked validators keep their slot but vote with zero weight;
//! validators with nothing observed vote for the caller's default time.
//!
//! The result must be bit-identical on every node, so only values enter the
//! computation: ties between equal times never change the outcome.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::time::Timestamp;
use crate::vector::HighestBefore;
use crate::{ValidatorId, Weight};

/// Stake table indexed by [`ValidatorId`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorWeights {
    weights: Vec<Weight>,
}

impl ValidatorWeights {
    #[must_use]
    pub const fn new(weights: Vec<Weight>) -> Self {
        Self { weights }
    }

    /// Number of validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Stake of `validator`, 0 if unknown.
    #[must_use]
    pub fn get(&self, validator: ValidatorId) -> Weight {
        self.weights
            .get(validator as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Sum of all stakes.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.weights.iter().map(|w| u64::from(*w)).sum()
    }

    /// Iterate `(validator, weight)`.
    pub fn iter(&self) -> impl Iterator<Item = (ValidatorId, Weight)> + '_ {
        (0..).zip(self.weights.iter().copied())
    }
}

impl From<Vec<Weight>> for ValidatorWeights {
    fn from(weights: Vec<Weight>) -> Self {
        Self::new(weights)
    }
}

/// The weighted walk stopped outside `[half, total]`.
///
/// Only reachable with a vector or weight table that violates its own
/// invariants; callers must treat it as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MedianError {
    #[error(
        "median wasn't calculated correctly, median={median}, curr_weight={curr_weight}, total_weight={total_weight}, entries={entries}"
    )]
    Inconsistent {
        median: Timestamp,
        curr_weight: u64,
        total_weight: u64,
        entries: usize,
    },
}

impl MedianError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MedianInconsistent
    }
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    weight: u64,
    time: Timestamp,
}

/// Compute the stake-weighted median claimed time of `before`.
///
/// `before` must hold one slot per validator of `weights` (see
/// [`crate::Index::merged_highest_before`]). An empty weight table yields
/// `default_time`.
///
/// # Errors
///
/// Returns [`MedianError::Inconsistent`] if the sanity bound fails.
pub fn median_time(
    before: &HighestBefore,
    weights: &ValidatorWeights,
    default_time: Timestamp,
) -> Result<Timestamp, MedianError> {
    if weights.is_empty() {
        return Ok(default_time);
    }

    // not equal to weights.total(): cheaters don't count
    let mut honest_total: u64 = 0;
    let mut votes: Vec<Vote> = weights
        .iter()
        .map(|(validator, weight)| {
            let seq = before.get(validator);
            let mut vote = Vote {
                weight: u64::from(weight),
                time: before.time(validator),
            };
            if seq.is_fork_detected() {
                vote.weight = 0;
            } else if seq.seq() == 0 {
                vote.time = default_time;
            }
            honest_total += vote.weight;
            vote
        })
        .collect();
    // honest_total may be 0 if every validator is forked

    votes.sort_by_key(|v| v.time);

    let half = honest_total / 2;
    let mut curr_weight: u64 = 0;
    let mut median = default_time;
    for vote in &votes {
        curr_weight += vote.weight;
        if curr_weight >= half {
            median = vote.time;
            break;
        }
    }

    if curr_weight < half || curr_weight > honest_total {
        return Err(MedianError::Inconsistent {
            median,
            curr_weight,
            total_weight: honest_total,
            entries: votes.len(),
        });
    }
    Ok(median)
}
