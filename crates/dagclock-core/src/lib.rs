//! dagclock-core library.
//!
//! Highest-before vector clocks for a DAG of validator events, the branch
//! merge operators that build them, the stake-weighted median time derived
//! from them, and the bounded overlay store that keeps them off the heap.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per layer, each mapping to an [`ErrorCode`].
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod error;
pub mod index;
pub mod median;
pub mod store;
pub mod time;
pub mod vector;

pub use config::{ConfigError, IndexConfig};
pub use error::ErrorCode;
pub use index::{BranchLayout, Index, IndexError, IndexedEvent};
pub use median::{MedianError, ValidatorWeights, median_time};
pub use store::{KvStore, StoreError};
pub use time::Timestamp;
pub use vector::{BranchSeq, HighestBefore};

/// Dense index of a validator branch. A validator owns at least the branch
/// equal to its own validator index; equivocation adds more.
pub type BranchId = u32;

/// Dense validator index into the weight table.
pub type ValidatorId = u32;

/// Per-creator event sequence number. The first event of a creator has seq 1.
pub type EventSeq = u32;

/// Validator stake.
pub type Weight = u32;
