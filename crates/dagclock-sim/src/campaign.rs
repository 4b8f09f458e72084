//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same DAG shape, collecting pass/fail results
//! and identifying the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use dagclock_core::IndexConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::oracle::{IndexOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator, tiny_index_config};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    pub validators: u32,
    pub rounds: u32,
    pub parents_per_event: usize,
    pub cheaters: u32,
    pub orderings: usize,
    pub index: IndexConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            validators: sim.validators,
            rounds: sim.rounds,
            parents_per_event: sim.parents_per_event,
            cheaters: sim.cheaters,
            orderings: sim.orderings,
            index: tiny_index_config(),
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            validators: self.validators,
            rounds: self.rounds,
            parents_per_event: self.parents_per_event,
            cheaters: self.cheaters,
            orderings: self.orderings,
            index: self.index.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or the per-seed
    /// simulation config is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which at least one equivocation was flagged.
    pub seeds_with_forks: usize,
    pub events_indexed: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full result and oracle verdict of one seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        seeds_with_forks: 0,
        events_indexed: 0,
    };

    for seed in config.seed_range.clone() {
        let trace = replay_seed(seed, config)?;
        report.seeds_run += 1;
        report.events_indexed += trace.result.dag.events.len() * trace.result.replays.len();
        if trace.result.fork_detected() {
            report.seeds_with_forks += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(report)
}

/// Replay a single seed with full details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = IndexOracle::check_all(&result);
    Ok(DetailedTrace { result, oracle })
}

#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::VectorDivergence { ordering, event } => {
            format!("VectorDivergence: ordering {ordering} built a different vector for event {event}")
        }
        InvariantViolation::MedianDivergence {
            ordering,
            event,
            expected,
            actual,
        } => {
            format!(
                "MedianDivergence: ordering {ordering} event {event} median={actual}, \
                 reference order gave {expected}"
            )
        }
        InvariantViolation::MedianMismatch {
            event,
            expected,
            actual,
        } => {
            format!("MedianMismatch: event {event} median={actual}, expected {expected}")
        }
        InvariantViolation::UndetectedFork { event, validator } => {
            format!(
                "UndetectedFork: event {event} sees two lineages of validator {validator} \
                 but does not flag it"
            )
        }
        InvariantViolation::FalseFork { event, validator } => {
            format!("FalseFork: event {event} flags honest validator {validator}")
        }
        InvariantViolation::OwnSlot {
            event,
            expected_seq,
            actual_seq,
        } => {
            format!("OwnSlot: event {event} has seq={actual_seq} in its own slot, expected {expected_seq}")
        }
    }
}
