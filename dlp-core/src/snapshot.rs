//! Engine snapshots
//!
//! A snapshot captures every piece of ledger state the engine owns. The
//! external collaborators (access control, vault, owner-share sink) are not
//! part of it. All maps are ordered, so the bincode encoding and therefore
//! [`EngineSnapshot::digest`] are identical on every replica that applied
//! the same calls.

use crate::epoch::EpochScheduler;
use crate::ranking::RankedSet;
use crate::registry::DlpRegistry;
use crate::stake::StakeLedger;
use crate::types::BlockNumber;
use crate::{Config, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Serializable engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Configuration in force
    pub config: Config,

    /// DLP registry
    pub registry: DlpRegistry,

    /// Stake ledger
    pub stakes: StakeLedger,

    /// Epochs and per-epoch records
    pub epochs: EpochScheduler,

    /// Ranked eligible set membership
    pub eligible: RankedSet,

    /// Highest block observed
    pub last_block: BlockNumber,

    /// Sequence of the last emitted event
    pub event_sequence: u64,
}

impl EngineSnapshot {
    /// Canonical bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode canonical bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// SHA-256 of the canonical bytes
    pub fn digest(&self) -> Result<[u8; 32]> {
        let bytes = self.to_bytes()?;
        Ok(Sha256::digest(&bytes).into())
    }
}

/// Write `value` to `path` with bincode, replacing any previous file atomically
pub fn save<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let bytes = bincode::serialize(value)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Snapshot saved");
    Ok(())
}

/// Read a value written by [`save`]
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let bytes = fs::read(path.as_ref())?;
    Ok(bincode::deserialize(&bytes)?)
}
