//! Epoch scheduler
//!
//! Epochs are materialized lazily. Epoch `n` starts at `start_block` for
//! `n = 1` and at the previous epoch's end + 1 afterwards, and spans
//! `epoch_size` blocks as configured when it is created. Creating epoch `n`
//! freezes the snapshot of epoch `n - 1`.

use crate::types::{Amount, BlockNumber, DlpId, EpochId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Materialized epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch ID (from 1)
    pub id: EpochId,

    /// First block
    pub start_block: BlockNumber,

    /// Last block (inclusive)
    pub end_block: BlockNumber,

    /// Reward budget captured at creation
    pub reward_amount: Amount,

    /// Top-ranked DLPs, filled at finalization
    pub dlp_ids: Vec<DlpId>,

    /// Snapshot frozen
    pub finalized: bool,
}

/// Per (epoch, DLP) snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DlpEpochRecord {
    /// DLP stake at finalization
    pub stake_amount: Amount,

    /// Ranked top in the epoch
    pub is_top_dlp: bool,

    /// Epoch reward if top, else zero
    pub reward_amount: Amount,

    /// Stakers percentage in force during the epoch
    pub stakers_percentage: Decimal,

    /// Oracle-supplied aggregate score (zero until saved)
    pub total_stakes_score: Amount,

    /// A score was written, zero included
    pub score_saved: bool,
}

/// Finalization input for one top DLP
#[derive(Debug, Clone, PartialEq)]
pub struct TopDlpSnapshot {
    /// DLP ID
    pub dlp_id: DlpId,

    /// Live stake amount
    pub stake_amount: Amount,

    /// Stakers percentage effective in the finalized epoch
    pub stakers_percentage: Decimal,
}

/// Epoch store and boundary arithmetic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochScheduler {
    /// Epochs, id = index + 1
    epochs: Vec<Epoch>,

    /// Records keyed by epoch, then DLP
    records: BTreeMap<EpochId, BTreeMap<DlpId, DlpEpochRecord>>,
}

impl EpochScheduler {
    /// Create empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of materialized epochs (also the latest epoch id)
    pub fn count(&self) -> EpochId {
        self.epochs.len() as EpochId
    }

    /// Lookup by id
    pub fn get(&self, epoch_id: EpochId) -> Result<&Epoch> {
        epoch_id
            .checked_sub(1)
            .and_then(|index| self.epochs.get(index as usize))
            .ok_or(Error::InvalidEpochId(epoch_id))
    }

    /// Latest materialized epoch
    pub fn last(&self) -> Option<&Epoch> {
        self.epochs.last()
    }

    /// Bounds of the next epoch to create, `None` once block numbers are exhausted
    pub fn next_bounds(
        &self,
        start_block: BlockNumber,
        epoch_size: BlockNumber,
    ) -> Option<(BlockNumber, BlockNumber)> {
        let start = match self.epochs.last() {
            Some(last) => last.end_block.checked_add(1)?,
            None => start_block,
        };
        let end = start.saturating_add(epoch_size.saturating_sub(1));
        Some((start, end))
    }

    /// Materialize the next epoch
    pub fn open(
        &mut self,
        start_block: BlockNumber,
        end_block: BlockNumber,
        reward_amount: Amount,
    ) -> EpochId {
        let id = self.count() + 1;
        self.epochs.push(Epoch {
            id,
            start_block,
            end_block,
            reward_amount,
            dlp_ids: Vec::new(),
            finalized: false,
        });
        id
    }

    /// Freeze the snapshot of `epoch_id`; a second call is a no-op
    ///
    /// A score saved before finalization is kept.
    pub fn finalize(&mut self, epoch_id: EpochId, top: &[TopDlpSnapshot]) -> bool {
        let epoch = match epoch_id
            .checked_sub(1)
            .and_then(|index| self.epochs.get_mut(index as usize))
        {
            Some(epoch) if !epoch.finalized => epoch,
            _ => return false,
        };

        epoch.dlp_ids = top.iter().map(|snapshot| snapshot.dlp_id).collect();
        epoch.finalized = true;
        let reward_amount = epoch.reward_amount;

        let records = self.records.entry(epoch_id).or_default();
        for snapshot in top {
            let record = records.entry(snapshot.dlp_id).or_default();
            record.stake_amount = snapshot.stake_amount;
            record.is_top_dlp = true;
            record.reward_amount = reward_amount;
            record.stakers_percentage = snapshot.stakers_percentage;
        }
        true
    }

    /// Latest epoch containing a block at or before `block_number` (0 if none)
    pub fn current_epoch_id(&self, block_number: BlockNumber) -> EpochId {
        self.epochs
            .partition_point(|epoch| epoch.start_block <= block_number) as EpochId
    }

    /// Latest finalized epoch whose rewards are claimable at `block_number` (0 if none)
    pub fn last_claimable_epoch_id(
        &self,
        block_number: BlockNumber,
        reward_claim_delay: BlockNumber,
    ) -> EpochId {
        self.epochs.partition_point(|epoch| {
            epoch.finalized && epoch.end_block.saturating_add(reward_claim_delay) <= block_number
        }) as EpochId
    }

    /// Record for (epoch, DLP), default if never written
    pub fn record(&self, epoch_id: EpochId, dlp_id: DlpId) -> DlpEpochRecord {
        self.records
            .get(&epoch_id)
            .and_then(|records| records.get(&dlp_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Stored oracle score for (epoch, DLP)
    pub fn score(&self, epoch_id: EpochId, dlp_id: DlpId) -> Amount {
        self.records
            .get(&epoch_id)
            .and_then(|records| records.get(&dlp_id))
            .map(|record| record.total_stakes_score)
            .unwrap_or(Decimal::ZERO)
    }

    /// Whether a score was ever written for (epoch, DLP)
    pub fn is_score_saved(&self, epoch_id: EpochId, dlp_id: DlpId) -> bool {
        self.records
            .get(&epoch_id)
            .and_then(|records| records.get(&dlp_id))
            .map(|record| record.score_saved)
            .unwrap_or(false)
    }

    /// Write the oracle score for (epoch, DLP)
    pub fn set_score(&mut self, epoch_id: EpochId, dlp_id: DlpId, score: Amount) {
        let record = self
            .records
            .entry(epoch_id)
            .or_default()
            .entry(dlp_id)
            .or_default();
        record.total_stakes_score = score;
        record.score_saved = true;
    }
}
