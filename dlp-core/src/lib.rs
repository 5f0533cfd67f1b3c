//! DLP Registry & Reward Core
//!
//! Registry-and-reward engine for staked operators ("DLPs") competing for a
//! periodic reward budget.
//!
//! # Architecture
//!
//! - **Lazy Epochs**: Epochs materialize on the first call that observes them
//! - **Ranked Set**: Ordered index of eligible DLPs; top-K walks the index in rank
//!   order, bounded by `eligible_dlps_limit`
//! - **Score Oracle**: Stake scores are ingested, write-once, from a trusted manager
//! - **Idempotent Claims**: Each stake remembers the last epoch it settled
//!
//! # Invariants
//!
//! - Atomic calls: a rejected call changes nothing
//! - Deterministic replay: same calls -> same state digest
//! - A DLP's status is the bucket of its stake, unless deregistered
//! - An epoch's snapshot is frozen once its successor exists

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod access;
pub mod config;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ranking;
pub mod registry;
pub mod reward;
pub mod score;
pub mod snapshot;
pub mod stake;
pub mod types;
pub mod vault;

// Re-exports
pub use access::{AccessControl, Role, StaticRoles};
pub use config::Config;
pub use engine::Engine;
pub use epoch::{DlpEpochRecord, Epoch};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventRecord};
pub use registry::{Dlp, DlpInfo};
pub use score::ScoreEntry;
pub use snapshot::EngineSnapshot;
pub use stake::Stake;
pub use types::{Address, Amount, BlockNumber, CallContext, DlpId, DlpStatus, EpochId, StakeId};
pub use vault::{AccruedOwnerShares, InMemoryVault, OwnerShare, OwnerShareSink, ValueTransfer};
