//! dagclock-sim library.
//!
//! Generates random validator DAGs (optionally with equivocating validators),
//! replays each one into fresh vector indexes in several topological orders,
//! and checks that every order yields the same vectors and median times.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod dag;
pub mod oracle;
pub mod rng;

use anyhow::{Result, bail};
use dagclock_core::store::MemoryStore;
use dagclock_core::{HighestBefore, Index, IndexConfig, IndexError, KvStore, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::Dag;
use crate::rng::DeterministicRng;

/// Time every validator votes for until one of its events is observed.
pub const DEFAULT_TIME: Timestamp = Timestamp(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub validators: u32,
    pub rounds: u32,
    /// Other-validator parents per event, on top of the self-parent.
    pub parents_per_event: usize,
    /// Validators that emit two conflicting events per round from round 2.
    pub cheaters: u32,
    /// Topological orders to replay. The first is generation order.
    pub orderings: usize,
    pub index: IndexConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            validators: 7,
            rounds: 12,
            parents_per_event: 2,
            cheaters: 1,
            orderings: 3,
            index: tiny_index_config(),
        }
    }
}

/// Budgets small enough that every replay flushes and spills.
#[must_use]
pub const fn tiny_index_config() -> IndexConfig {
    IndexConfig {
        cache_size: 2 * 1024,
        batch_size: 512,
        pending_limit: 1024,
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.validators == 0 {
            bail!("validators must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.cheaters > self.validators {
            bail!(
                "cheaters ({}) must not exceed validators ({})",
                self.cheaters,
                self.validators
            );
        }
        if self.orderings == 0 {
            bail!("orderings must be > 0");
        }
        Ok(())
    }
}

/// Everything one replay of the DAG produced, indexed by event position in
/// [`Dag::events`].
#[derive(Debug, Clone)]
pub struct Replay {
    pub order: Vec<usize>,
    /// Per-branch vectors.
    pub vectors: Vec<HighestBefore>,
    /// Per-validator vectors.
    pub merged: Vec<HighestBefore>,
    pub medians: Vec<Timestamp>,
    /// `set_fork_detected` calls that changed a vector.
    pub forks_marked: usize,
    /// Vectors that reached the persistent store.
    pub spilled: usize,
    /// Pair writes the persistent store received, counting rewrites.
    pub store_writes: usize,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    pub dag: Dag,
    pub replays: Vec<Replay>,
}

impl SimulationResult {
    /// True if any replay observed an equivocation.
    #[must_use]
    pub fn fork_detected(&self) -> bool {
        self.replays.iter().any(|r| r.forks_marked > 0)
    }
}

#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rng = DeterministicRng::new(config.seed);
        Ok(Self { config, rng })
    }

    /// Generate the DAG and replay it in every configured order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index rejects an event or its store fails.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let dag = Dag::generate(&self.config, &mut self.rng);
        let mut replays = Vec::with_capacity(self.config.orderings);
        for ordering in 0..self.config.orderings {
            let order = if ordering == 0 {
                (0..dag.events.len()).collect()
            } else {
                let mut rng = self.rng.fork(ordering as u64);
                dag.random_topological_order(&mut rng)
            };
            let replay = replay(&dag, order, &self.config.index)?;
            debug!(
                ordering,
                forks_marked = replay.forks_marked,
                spilled = replay.spilled,
                store_writes = replay.store_writes,
                "replay finished"
            );
            replays.push(replay);
        }

        info!(
            seed = self.config.seed,
            events = dag.events.len(),
            cheaters = dag.cheaters.len(),
            orderings = replays.len(),
            "simulation complete"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            dag,
            replays,
        })
    }
}

/// Index `dag` in `order` on a fresh in-memory store and read back every
/// event's vectors and median time.
///
/// # Errors
///
/// Returns an error if the index rejects an event or its store fails.
pub fn replay(dag: &Dag, order: Vec<usize>, config: &IndexConfig) -> Result<Replay> {
    let mut index = Index::new(
        MemoryStore::new(),
        dag.layout.clone(),
        dag.weights.clone(),
        config.clone(),
    );

    let mut forks_marked = 0;
    for &i in &order {
        let event = &dag.events[i];
        let hb = index.add(&event.id, event, event.branch, &dag.parent_ids(i))?;
        forks_marked += mark_forks(&mut index, &event.id, &hb)?;
    }
    index.flush()?;

    let count = dag.events.len();
    let mut vectors = Vec::with_capacity(count);
    let mut merged = Vec::with_capacity(count);
    let mut medians = Vec::with_capacity(count);
    for event in &dag.events {
        vectors.push(index.highest_before(&event.id)?);
        merged.push(index.merged_highest_before(&event.id)?);
        medians.push(index.median_time(&event.id, DEFAULT_TIME));
    }
    let (spilled, store_writes) = index
        .store()
        .backing()
        .parent()
        .map_or((0, 0), |store| (store.len(), store.writes()));
    index.close()?;

    Ok(Replay {
        order,
        vectors,
        merged,
        medians,
        forks_marked,
        spilled,
        store_writes,
    })
}

/// Play the engine's part: once an event sees two lineages of a validator,
/// flag every branch of that validator in the event's vector.
///
/// # Errors
///
/// Returns the index error of the failed update.
pub fn mark_forks<S: KvStore>(
    index: &mut Index<S>,
    id: &[u8],
    hb: &HighestBefore,
) -> Result<usize, IndexError> {
    let mut marked = 0;
    for validator in 0..index.layout().validator_count() {
        let branches = index.layout().branches_of(validator).to_vec();
        if branches.len() < 2 {
            continue;
        }
        let seen = branches.iter().filter(|&&b| !hb.is_empty(b)).count();
        if seen < 2 {
            continue;
        }
        for branch in branches {
            if !hb.is_fork_detected(branch) {
                index.set_fork_detected(id, branch)?;
                marked += 1;
            }
        }
    }
    Ok(marked)
}
