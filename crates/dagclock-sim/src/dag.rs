//! Random validator DAGs.
//!
//! Every validator emits one event per round. Its parents are its own
//! previous event plus up to `parents_per_event` heads of other validators'
//! branches as they stood at the end of the previous round, so generation
//! order is always a valid topological order. Cheaters start a second
//! lineage in round 2 that branches off their round-1 event and gets its own
//! branch id.

use dagclock_core::{
    BranchId, BranchLayout, EventSeq, IndexedEvent, Timestamp, ValidatorId, ValidatorWeights,
};

use crate::SimulationConfig;
use crate::rng::DeterministicRng;

/// Milliseconds between rounds of claimed creation time.
pub const ROUND_MILLIS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEvent {
    pub id: [u8; 32],
    pub creator: ValidatorId,
    /// Lineage the event extends. Equals `creator` for honest events.
    pub branch: BranchId,
    pub seq: EventSeq,
    pub time: Timestamp,
    /// Indices into [`Dag::events`], self-parent first.
    pub parents: Vec<usize>,
}

impl IndexedEvent for SimEvent {
    fn seq(&self) -> EventSeq {
        self.seq
    }

    fn creation_time(&self) -> Timestamp {
        self.time
    }
}

#[derive(Debug, Clone)]
pub struct Dag {
    /// Events in generation order.
    pub events: Vec<SimEvent>,
    pub layout: BranchLayout,
    pub weights: ValidatorWeights,
    /// Sorted ids of equivocating validators.
    pub cheaters: Vec<ValidatorId>,
}

impl Dag {
    #[must_use]
    pub fn generate(config: &SimulationConfig, rng: &mut DeterministicRng) -> Self {
        let validators = config.validators;
        let mut layout = BranchLayout::new(validators);
        let weights: Vec<u32> = (0..validators)
            .map(|_| 1 + u32::try_from(rng.next_bounded(100)).unwrap_or(0))
            .collect();

        let mut shuffled: Vec<ValidatorId> = (0..validators).collect();
        rng.shuffle(&mut shuffled);
        let mut cheaters = shuffled[..config.cheaters as usize].to_vec();
        cheaters.sort_unstable();
        for &cheater in &cheaters {
            layout.add_branch(cheater);
        }

        let mut events: Vec<SimEvent> = Vec::new();
        let mut heads: Vec<Option<usize>> = vec![None; layout.branch_count() as usize];

        for round in 1..=config.rounds {
            // parents come from earlier rounds only
            let snapshot = heads.clone();
            for creator in 0..validators {
                let branches = layout.branches_of(creator);
                let lineages = if round >= 2 { branches } else { &branches[..1] };
                for &branch in lineages {
                    let self_parent = snapshot[branch as usize].or(snapshot[creator as usize]);
                    let mut others: Vec<usize> = snapshot
                        .iter()
                        .enumerate()
                        .filter(|(b, _)| {
                            BranchId::try_from(*b)
                                .ok()
                                .and_then(|b| layout.owner(b))
                                != Some(creator)
                        })
                        .filter_map(|(_, head)| *head)
                        .collect();
                    rng.shuffle(&mut others);
                    others.truncate(config.parents_per_event);

                    let mut parents: Vec<usize> = self_parent.into_iter().collect();
                    parents.extend(others);

                    let time =
                        Timestamp(u64::from(round) * ROUND_MILLIS + rng.next_bounded(ROUND_MILLIS));
                    let parent_ids: Vec<&[u8; 32]> =
                        parents.iter().map(|&p| &events[p].id).collect();
                    let id = event_id(creator, branch, round, time, &parent_ids);

                    heads[branch as usize] = Some(events.len());
                    events.push(SimEvent {
                        id,
                        creator,
                        branch,
                        seq: round,
                        time,
                        parents,
                    });
                }
            }
        }

        Self {
            events,
            layout,
            weights: ValidatorWeights::new(weights),
            cheaters,
        }
    }

    #[must_use]
    pub fn is_cheater(&self, validator: ValidatorId) -> bool {
        self.cheaters.binary_search(&validator).is_ok()
    }

    /// Parent ids of event `index`, self-parent first.
    #[must_use]
    pub fn parent_ids(&self, index: usize) -> Vec<&[u8]> {
        self.events[index]
            .parents
            .iter()
            .map(|&p| self.events[p].id.as_slice())
            .collect()
    }

    /// A uniformly chosen ready event at every step of Kahn's algorithm.
    #[must_use]
    pub fn random_topological_order(&self, rng: &mut DeterministicRng) -> Vec<usize> {
        let mut waiting: Vec<usize> = self.events.iter().map(|e| e.parents.len()).collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.events.len()];
        for (child, event) in self.events.iter().enumerate() {
            for &parent in &event.parents {
                children[parent].push(child);
            }
        }

        let mut ready: Vec<usize> = (0..self.events.len())
            .filter(|&i| waiting[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.events.len());
        while !ready.is_empty() {
            let next = ready.swap_remove(rng.next_index(ready.len()));
            order.push(next);
            for &child in &children[next] {
                waiting[child] -= 1;
                if waiting[child] == 0 {
                    ready.push(child);
                }
            }
        }
        order
    }

    /// True if `order` lists every event once, each after all its parents.
    #[must_use]
    pub fn is_topological(&self, order: &[usize]) -> bool {
        if order.len() != self.events.len() {
            return false;
        }
        let mut position = vec![usize::MAX; self.events.len()];
        for (pos, &event) in order.iter().enumerate() {
            match position.get_mut(event) {
                Some(slot) if *slot == usize::MAX => *slot = pos,
                _ => return false,
            }
        }
        self.events.iter().enumerate().all(|(i, event)| {
            event
                .parents
                .iter()
                .all(|&parent| position[parent] < position[i])
        })
    }
}

fn event_id(
    creator: ValidatorId,
    branch: BranchId,
    seq: EventSeq,
    time: Timestamp,
    parents: &[&[u8; 32]],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&creator.to_be_bytes());
    hasher.update(&branch.to_be_bytes());
    hasher.update(&seq.to_be_bytes());
    hasher.update(&time.to_be_bytes());
    for parent in parents {
        hasher.update(parent.as_slice());
    }
    *hasher.finalize().as_bytes()
}
