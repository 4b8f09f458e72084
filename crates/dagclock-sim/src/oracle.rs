//! Invariant checks over a [`SimulationResult`].
//!
//! The first replay (generation order) is the reference; every other replay
//! must agree with it event by event.

use dagclock_core::{HighestBefore, Timestamp, ValidatorId, ValidatorWeights};

use crate::{DEFAULT_TIME, Replay, SimulationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// Diagnostic information for a single failed invariant check.
/// `event` is a position in the DAG's generation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A replay order produced a different per-branch vector.
    VectorDivergence { ordering: usize, event: usize },

    /// A replay order produced a different median time.
    MedianDivergence {
        ordering: usize,
        event: usize,
        expected: Timestamp,
        actual: Timestamp,
    },

    /// The index median differs from a from-scratch weighted median.
    MedianMismatch {
        event: usize,
        expected: Timestamp,
        actual: Timestamp,
    },

    /// The event sees two lineages of `validator` but its merged vector
    /// does not flag the validator.
    UndetectedFork { event: usize, validator: ValidatorId },

    /// An honest validator is flagged as forked.
    FalseFork { event: usize, validator: ValidatorId },

    /// The event's own slot does not hold its own sequence number.
    OwnSlot {
        event: usize,
        expected_seq: u32,
        actual_seq: u32,
    },
}

pub struct IndexOracle;

impl IndexOracle {
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        let Some(reference) = result.replays.first() else {
            return OracleResult::pass();
        };
        Self::check_order_independence(&result.replays)
            .merge(Self::check_medians(result, reference))
            .merge(Self::check_forks(result, reference))
            .merge(Self::check_own_slots(result, reference))
    }

    /// Every replay matches the first one.
    #[must_use]
    pub fn check_order_independence(replays: &[Replay]) -> OracleResult {
        let Some((reference, rest)) = replays.split_first() else {
            return OracleResult::pass();
        };
        let mut violations = Vec::new();
        for (offset, replay) in rest.iter().enumerate() {
            let ordering = offset + 1;
            for event in 0..reference.vectors.len() {
                if replay.vectors.get(event) != reference.vectors.get(event)
                    || replay.merged.get(event) != reference.merged.get(event)
                {
                    violations.push(InvariantViolation::VectorDivergence { ordering, event });
                }
                let expected = reference.medians[event];
                let actual = replay.medians.get(event).copied().unwrap_or(expected);
                if actual != expected {
                    violations.push(InvariantViolation::MedianDivergence {
                        ordering,
                        event,
                        expected,
                        actual,
                    });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    /// Index medians equal a reference computation over the merged vectors.
    #[must_use]
    pub fn check_medians(result: &SimulationResult, replay: &Replay) -> OracleResult {
        let violations = replay
            .merged
            .iter()
            .zip(&replay.medians)
            .enumerate()
            .filter_map(|(event, (merged, &actual))| {
                let expected = reference_median(merged, &result.dag.weights, DEFAULT_TIME);
                (expected != actual).then_some(InvariantViolation::MedianMismatch {
                    event,
                    expected,
                    actual,
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_forks(result: &SimulationResult, replay: &Replay) -> OracleResult {
        let layout = &result.dag.layout;
        let mut violations = Vec::new();
        for (event, (scatter, merged)) in replay.vectors.iter().zip(&replay.merged).enumerate() {
            for validator in 0..layout.validator_count() {
                let lineages = layout
                    .branches_of(validator)
                    .iter()
                    .filter(|&&b| !scatter.is_empty(b))
                    .count();
                let flagged = merged.is_fork_detected(validator);
                if lineages >= 2 && !flagged {
                    violations.push(InvariantViolation::UndetectedFork { event, validator });
                }
                if flagged && !result.dag.is_cheater(validator) {
                    violations.push(InvariantViolation::FalseFork { event, validator });
                }
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_own_slots(result: &SimulationResult, replay: &Replay) -> OracleResult {
        let violations = result
            .dag
            .events
            .iter()
            .zip(&replay.vectors)
            .enumerate()
            .filter_map(|(event, (ev, hb))| {
                let slot = hb.get(ev.branch);
                if slot.is_fork_detected() || slot.seq() == ev.seq {
                    return None;
                }
                Some(InvariantViolation::OwnSlot {
                    event,
                    expected_seq: ev.seq,
                    actual_seq: slot.seq(),
                })
            })
            .collect();
        OracleResult::from_violations(violations)
    }
}

/// Weighted median without sorting: the smallest voted time whose
/// cumulative weight reaches half of the honest stake.
#[must_use]
pub fn reference_median(
    merged: &HighestBefore,
    weights: &ValidatorWeights,
    default_time: Timestamp,
) -> Timestamp {
    if weights.is_empty() {
        return default_time;
    }
    let votes: Vec<(Timestamp, u64)> = weights
        .iter()
        .map(|(validator, weight)| {
            let slot = merged.get(validator);
            if slot.is_fork_detected() {
                (merged.time(validator), 0)
            } else if slot.seq() == 0 {
                (default_time, u64::from(weight))
            } else {
                (merged.time(validator), u64::from(weight))
            }
        })
        .collect();
    let half = votes.iter().map(|(_, w)| w).sum::<u64>() / 2;

    votes
        .iter()
        .map(|&(time, _)| time)
        .filter(|&candidate| {
            let at_or_below: u64 = votes
                .iter()
                .filter(|(t, _)| *t <= candidate)
                .map(|(_, w)| w)
                .sum();
            at_or_below >= half
        })
        .min()
        .unwrap_or(default_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimulationConfig, Simulator};
    use dagclock_core::BranchSeq;

    fn merged(slots: &[(u32, u64)]) -> HighestBefore {
        let mut hb = HighestBefore::new(slots.len());
        for (v, &(seq, time)) in (0..).zip(slots) {
            if seq > 0 {
                hb.set(v, BranchSeq::Clean { seq, min_seq: 1 });
                hb.set_time(v, Timestamp(time));
            }
        }
        hb
    }

    #[test]
    fn reference_median_scenarios() {
        let weights = ValidatorWeights::new(vec![80, 15, 5]);
        let hb = merged(&[(1, 100), (1, 200), (1, 300)]);
        assert_eq!(reference_median(&hb, &weights, Timestamp(0)), Timestamp(100));

        let hb = merged(&[(0, 0), (1, 200), (1, 300)]);
        assert_eq!(reference_median(&hb, &weights, Timestamp(7)), Timestamp(7));
    }

    #[test]
    fn reference_median_ignores_forked() {
        let weights = ValidatorWeights::new(vec![50, 30, 20]);
        let mut hb = merged(&[(1, 100), (1, 200), (1, 300)]);
        hb.set_fork_detected(0);
        // honest stake 50, half 25: 200 reaches 30
        assert_eq!(reference_median(&hb, &weights, Timestamp(0)), Timestamp(200));
    }

    #[test]
    fn tampered_replay_is_reported() {
        let mut result = Simulator::new(SimulationConfig {
            orderings: 2,
            ..SimulationConfig::default()
        })
        .expect("valid")
        .run()
        .expect("run");
        assert!(IndexOracle::check_all(&result).passed);

        let replay = &mut result.replays[1];
        replay.medians[0] = Timestamp(u64::MAX);
        replay.vectors[1].set_fork_detected(0);
        let report = IndexOracle::check_order_independence(&result.replays);
        assert!(!report.passed);
        assert!(report.violations.contains(&InvariantViolation::VectorDivergence {
            ordering: 1,
            event: 1
        }));
        assert!(
            report
                .violations
                .iter()
                .any(|v| matches!(v, InvariantViolation::MedianDivergence { event: 0, .. }))
        );
    }

    #[test]
    fn own_slot_violation_is_reported() {
        let mut result = Simulator::new(SimulationConfig {
            orderings: 1,
            cheaters: 0,
            ..SimulationConfig::default()
        })
        .expect("valid")
        .run()
        .expect("run");
        let branch = result.dag.events[0].branch;
        result.replays[0].vectors[0].set(branch, BranchSeq::Clean { seq: 9, min_seq: 1 });
        let report = IndexOracle::check_own_slots(&result, &result.replays[0]);
        assert_eq!(report.violations.len(), 1);
    }
}
