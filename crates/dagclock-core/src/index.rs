//! Vector index driven by an external DAG engine.
//!
//! The engine owns event storage, topological ordering and fork detection.
//! It hands the index three things: the branch layout (which branch ids
//! belong to which validator), the validator weights, and events in
//! topological order together with their parents' ids. The index builds each
//! event's [`HighestBefore`] vector from its parents, persists it through the
//! [`OverlayStore`], and answers merged-vector and median-time queries.
//!
//! Failures that would make the index return a wrong median are routed to a
//! critical-error handler and then abort the call with a panic.

use std::fmt::Write as _;

use tracing::{error, instrument, trace};

use crate::config::IndexConfig;
use crate::error::ErrorCode;
use crate::median::{MedianError, ValidatorWeights, median_time};
use crate::store::{KvStore, OverlayStore, StoreError};
use crate::time::Timestamp;
use crate::vector::{HighestBefore, VectorError};
use crate::{BranchId, EventSeq, ValidatorId};

/// Prefix of every vector key in the overlay.
pub const HIGHEST_BEFORE_PREFIX: &[u8] = b"hb";

/// Event metadata the index needs when it first sees an event.
pub trait IndexedEvent {
    /// Creator-local sequence number.
    fn seq(&self) -> EventSeq;

    /// Creation time claimed by the creator.
    fn creation_time(&self) -> Timestamp;
}

/// Which branch ids belong to which validator.
///
/// Validator `v` always owns branch `v`. Branches added for equivocating
/// lineages get ids after the last validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchLayout {
    by_validator: Vec<Vec<BranchId>>,
    owners: Vec<ValidatorId>,
}

impl BranchLayout {
    /// One branch per validator.
    #[must_use]
    pub fn new(validators: ValidatorId) -> Self {
        Self {
            by_validator: (0..validators).map(|v| vec![v]).collect(),
            owners: (0..validators).collect(),
        }
    }

    /// Allocate an extra branch for `validator` and return its id.
    ///
    /// # Panics
    ///
    /// Panics if `validator` is not part of the layout.
    pub fn add_branch(&mut self, validator: ValidatorId) -> BranchId {
        let id = self.branch_count();
        self.by_validator[validator as usize].push(id);
        self.owners.push(validator);
        id
    }

    #[must_use]
    pub fn branch_count(&self) -> BranchId {
        BranchId::try_from(self.owners.len()).unwrap_or(BranchId::MAX)
    }

    #[must_use]
    pub fn validator_count(&self) -> ValidatorId {
        ValidatorId::try_from(self.by_validator.len()).unwrap_or(ValidatorId::MAX)
    }

    /// Branches of `validator`, primary branch first.
    #[must_use]
    pub fn branches_of(&self, validator: ValidatorId) -> &[BranchId] {
        self.by_validator
            .get(validator as usize)
            .map_or(&[], Vec::as_slice)
    }

    /// Validator owning `branch`.
    #[must_use]
    pub fn owner(&self, branch: BranchId) -> Option<ValidatorId> {
        self.owners.get(branch as usize).copied()
    }

    /// True once any validator has more than one branch.
    #[must_use]
    pub fn has_forks(&self) -> bool {
        self.owners.len() > self.by_validator.len()
    }
}

/// Errors from index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error("event={0} not found")]
    EventNotFound(String),

    #[error(transparent)]
    Median(#[from] MedianError),
}

impl IndexError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::Vector(err) => err.code(),
            Self::EventNotFound(_) => ErrorCode::EventNotFound,
            Self::Median(err) => err.code(),
        }
    }
}

/// Handler invoked before the index aborts on a critical error.
pub type CritHandler = Box<dyn Fn(&IndexError) + Send + Sync>;

fn log_crit(err: &IndexError) {
    error!(code = %err.code(), "critical vector index failure: {err}");
}

/// Highest-before vector index over an overlay store.
pub struct Index<S> {
    store: OverlayStore<S>,
    layout: BranchLayout,
    weights: ValidatorWeights,
    config: IndexConfig,
    crit: CritHandler,
}

impl<S> std::fmt::Debug for Index<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("layout", &self.layout)
            .field("weights", &self.weights)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: KvStore> Index<S> {
    pub fn new(
        store: S,
        layout: BranchLayout,
        weights: ValidatorWeights,
        config: IndexConfig,
    ) -> Self {
        Self {
            store: OverlayStore::new(store, config.cache_size, config.batch_size),
            layout,
            weights,
            config,
            crit: Box::new(log_crit),
        }
    }

    /// Replace the critical-error handler. It runs before the index panics.
    #[must_use]
    pub fn with_crit(mut self, crit: impl Fn(&IndexError) + Send + Sync + 'static) -> Self {
        self.crit = Box::new(crit);
        self
    }

    /// Start a new epoch on a fresh persistent store. Pending writes of the
    /// previous store are discarded.
    pub fn reset(&mut self, store: S, layout: BranchLayout, weights: ValidatorWeights) {
        self.store.drop_not_flushed();
        self.store = OverlayStore::new(store, self.config.cache_size, self.config.batch_size);
        self.layout = layout;
        self.weights = weights;
    }

    /// Index `event` created on `creator` with the given parents.
    ///
    /// Parents must already be indexed. The new vector is persisted under
    /// `id` and returned.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EventNotFound`] for an unindexed parent and
    /// store/decoding errors unchanged.
    #[instrument(skip_all, fields(creator = creator, seq = event.seq()))]
    pub fn add<E, P>(
        &mut self,
        id: &[u8],
        event: &E,
        creator: BranchId,
        parents: &[P],
    ) -> Result<HighestBefore, IndexError>
    where
        E: IndexedEvent + ?Sized,
        P: AsRef<[u8]>,
    {
        let branch_count = self.layout.branch_count();
        let mut hb = HighestBefore::new(branch_count as usize);
        hb.init_with_event(creator, event);
        for parent in parents {
            let other = self.highest_before(parent.as_ref())?;
            hb.collect_from(&other, branch_count);
        }
        self.store.put(&vector_key(id), &hb.to_bytes())?;
        trace!(parents = parents.len(), branches = branch_count, "indexed event");
        self.maybe_flush()?;
        Ok(hb)
    }

    /// Mark `branch` forked in the stored vector of `id`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::highest_before`], plus store write errors.
    pub fn set_fork_detected(&mut self, id: &[u8], branch: BranchId) -> Result<(), IndexError> {
        let mut hb = self.highest_before(id)?;
        if hb.is_fork_detected(branch) {
            return Ok(());
        }
        hb.set_fork_detected(branch);
        self.store.put(&vector_key(id), &hb.to_bytes())?;
        Ok(())
    }

    /// Per-branch vector of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EventNotFound`] if `id` was never indexed.
    pub fn highest_before(&mut self, id: &[u8]) -> Result<HighestBefore, IndexError> {
        let bytes = self
            .store
            .get(&vector_key(id))?
            .ok_or_else(|| IndexError::EventNotFound(hex(id)))?;
        Ok(HighestBefore::from_bytes(&bytes)?)
    }

    /// Vector of `id` with exactly one slot per validator.
    ///
    /// # Errors
    ///
    /// Same as [`Self::highest_before`].
    pub fn merged_highest_before(&mut self, id: &[u8]) -> Result<HighestBefore, IndexError> {
        let scatter = self.highest_before(id)?;
        if !self.layout.has_forks() {
            return Ok(scatter);
        }
        let validators = self.layout.validator_count();
        let mut merged = HighestBefore::new(validators as usize);
        for validator in 0..validators {
            merged.gather_from(validator, &scatter, self.layout.branches_of(validator));
        }
        Ok(merged)
    }

    /// Stake-weighted median claimed time as observed by `id`.
    ///
    /// # Panics
    ///
    /// After running the critical-error handler, if `id` cannot be read or
    /// the median fails its sanity check.
    #[instrument(skip(self, id), fields(id = %hex(id)))]
    pub fn median_time(&mut self, id: &[u8], default_time: Timestamp) -> Timestamp {
        let result = self
            .merged_highest_before(id)
            .and_then(|before| {
                median_time(&before, &self.weights, default_time).map_err(IndexError::from)
            });
        match result {
            Ok(median) => median,
            Err(err) => self.fatal(&err),
        }
    }

    /// Flush pending vectors into the bounded cache.
    ///
    /// # Errors
    ///
    /// Returns the persistent store's error unchanged.
    pub fn flush(&mut self) -> Result<(), IndexError> {
        Ok(self.store.flush()?)
    }

    /// Flush if the pending estimate exceeds `pending_limit`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::flush`].
    pub fn maybe_flush(&mut self) -> Result<bool, IndexError> {
        if self.store.not_flushed_size_est() <= self.config.pending_limit {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Discard vectors written since the last flush.
    pub fn drop_not_flushed(&mut self) {
        self.store.drop_not_flushed();
    }

    /// Close the overlay and the persistent store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] if already closed.
    pub fn close(&mut self) -> Result<(), IndexError> {
        Ok(self.store.close()?)
    }

    #[must_use]
    pub const fn layout(&self) -> &BranchLayout {
        &self.layout
    }

    /// Mutable layout, for engines that allocate fork branches on the fly.
    pub const fn layout_mut(&mut self) -> &mut BranchLayout {
        &mut self.layout
    }

    #[must_use]
    pub const fn weights(&self) -> &ValidatorWeights {
        &self.weights
    }

    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &OverlayStore<S> {
        &self.store
    }

    fn fatal(&self, err: &IndexError) -> ! {
        (self.crit)(err);
        panic!("{}: {err}", err.code());
    }
}

fn vector_key(id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(HIGHEST_BEFORE_PREFIX.len() + id.len());
    key.extend_from_slice(HIGHEST_BEFORE_PREFIX);
    key.extend_from_slice(id);
    key
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vector::BranchSeq;

    struct Ev {
        seq: EventSeq,
        time: u64,
    }

    impl IndexedEvent for Ev {
        fn seq(&self) -> EventSeq {
            self.seq
        }

        fn creation_time(&self) -> Timestamp {
            Timestamp(self.time)
        }
    }

    fn index(validators: ValidatorId) -> Index<MemoryStore> {
        let weights = ValidatorWeights::new(vec![1; validators as usize]);
        Index::new(
            MemoryStore::new(),
            BranchLayout::new(validators),
            weights,
            IndexConfig::lite(),
        )
    }

    const NO_PARENTS: &[&[u8]] = &[];

    #[test]
    fn layout_tracks_fork_branches() {
        let mut layout = BranchLayout::new(3);
        assert!(!layout.has_forks());
        let extra = layout.add_branch(1);
        assert_eq!(extra, 3);
        assert_eq!(layout.branch_count(), 4);
        assert_eq!(layout.validator_count(), 3);
        assert_eq!(layout.branches_of(1), &[1, 3]);
        assert_eq!(layout.owner(3), Some(1));
        assert!(layout.has_forks());
        assert!(layout.branches_of(9).is_empty());
    }

    #[test]
    fn add_merges_parents() {
        let mut idx = index(2);
        idx.add(b"a1", &Ev { seq: 1, time: 10 }, 0, NO_PARENTS).expect("a1");
        idx.add(b"b1", &Ev { seq: 1, time: 11 }, 1, NO_PARENTS).expect("b1");
        let hb = idx
            .add(b"a2", &Ev { seq: 2, time: 20 }, 0, &[b"a1", b"b1"])
            .expect("a2");
        assert_eq!(hb.get(0), BranchSeq::Clean { seq: 2, min_seq: 1 });
        assert_eq!(hb.get(1), BranchSeq::Clean { seq: 1, min_seq: 1 });
        assert_eq!(hb.time(1), Timestamp(11));
        assert_eq!(idx.highest_before(b"a2").expect("stored"), hb);
    }

    #[test]
    fn unknown_parent_is_reported() {
        let mut idx = index(1);
        let err = idx
            .add(b"a2", &Ev { seq: 2, time: 1 }, 0, &[b"zz"])
            .expect_err("missing parent");
        assert!(matches!(err, IndexError::EventNotFound(ref id) if id == "7a7a"));
        assert_eq!(err.code(), ErrorCode::EventNotFound);
    }

    #[test]
    fn merged_view_gathers_fork_branches() {
        let mut idx = index(2);
        let extra = idx.layout_mut().add_branch(1);
        idx.add(b"b1", &Ev { seq: 1, time: 5 }, 1, NO_PARENTS).expect("b1");
        idx.add(b"b1'", &Ev { seq: 3, time: 7 }, extra, NO_PARENTS).expect("b1'");
        idx.add(b"a1", &Ev { seq: 1, time: 6 }, 0, &[b"b1".as_slice(), b"b1'"])
            .expect("a1");

        let merged = idx.merged_highest_before(b"a1").expect("merged");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.seq(1), 3);
        assert_eq!(merged.time(1), Timestamp(7));

        idx.set_fork_detected(b"a1", extra).expect("mark");
        let merged = idx.merged_highest_before(b"a1").expect("merged");
        assert!(merged.is_fork_detected(1));
    }

    #[test]
    fn median_time_uses_weights() {
        let mut idx = Index::new(
            MemoryStore::new(),
            BranchLayout::new(2),
            ValidatorWeights::new(vec![1, 9]),
            IndexConfig::lite(),
        );
        idx.add(b"a1", &Ev { seq: 1, time: 100 }, 0, NO_PARENTS).expect("a1");
        idx.add(b"b1", &Ev { seq: 1, time: 300 }, 1, &[b"a1"]).expect("b1");
        assert_eq!(idx.median_time(b"b1", Timestamp(0)), Timestamp(300));
        assert_eq!(idx.median_time(b"a1", Timestamp(50)), Timestamp(50));
    }

    #[test]
    fn median_with_forked_validator_stays_on_claimed_times() {
        let mut idx = Index::new(
            MemoryStore::new(),
            BranchLayout::new(2),
            ValidatorWeights::new(vec![1, 5]),
            IndexConfig::lite(),
        );
        let extra = idx.layout_mut().add_branch(1);
        idx.add(b"b1", &Ev { seq: 1, time: 50 }, 1, NO_PARENTS).expect("b1");
        idx.add(b"bx", &Ev { seq: 1, time: 60 }, extra, NO_PARENTS).expect("bx");
        idx.add(b"a1", &Ev { seq: 1, time: 100 }, 0, &[b"b1", b"bx"])
            .expect("a1");
        idx.set_fork_detected(b"a1", extra).expect("mark");

        let merged = idx.merged_highest_before(b"a1").expect("merged");
        assert!(merged.is_fork_detected(1));
        assert_eq!(merged.time(1), Timestamp(50));
        // honest stake is 1, so the lowest vote wins: the forked slot's time
        assert_eq!(idx.median_time(b"a1", Timestamp(7)), Timestamp(50));
    }

    #[test]
    fn median_of_unknown_event_is_fatal() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let mut idx = index(1).with_crit(move |_| flag.store(true, Ordering::SeqCst));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            idx.median_time(b"nope", Timestamp(0))
        }));
        assert!(result.is_err());
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn maybe_flush_respects_pending_limit() {
        let config = IndexConfig {
            pending_limit: 1_000_000,
            ..IndexConfig::lite()
        };
        let mut idx = Index::new(
            MemoryStore::new(),
            BranchLayout::new(1),
            ValidatorWeights::new(vec![1]),
            config,
        );
        idx.add(b"a1", &Ev { seq: 1, time: 1 }, 0, NO_PARENTS).expect("a1");
        assert_eq!(idx.store().not_flushed_pairs(), 1);
        assert!(!idx.maybe_flush().expect("maybe"));
        idx.flush().expect("flush");
        assert_eq!(idx.store().not_flushed_pairs(), 0);
        assert!(idx.highest_before(b"a1").is_ok());
    }

    #[test]
    fn reset_starts_empty_epoch() {
        let mut idx = index(1);
        idx.add(b"a1", &Ev { seq: 1, time: 1 }, 0, NO_PARENTS).expect("a1");
        idx.reset(MemoryStore::new(), BranchLayout::new(2), ValidatorWeights::new(vec![1, 1]));
        assert!(matches!(
            idx.highest_before(b"a1"),
            Err(IndexError::EventNotFound(_))
        ));
        assert_eq!(idx.layout().validator_count(), 2);
    }

    #[test]
    fn closed_index_reports_closed() {
        let mut idx = index(1);
        idx.close().expect("close");
        let err = idx
            .add(b"a1", &Ev { seq: 1, time: 1 }, 0, NO_PARENTS)
            .expect_err("closed");
        assert_eq!(err.code(), ErrorCode::StoreClosed);
    }
}
