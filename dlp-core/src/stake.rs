//! Stake ledger
//!
//! Individual stakes and their open -> closed -> withdrawn lifecycle. The
//! ledger only stores records; the engine checks ownership and delays.

use crate::types::{Address, Amount, BlockNumber, DlpId, EpochId, StakeId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Single stake on a DLP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    /// Stake ID
    pub id: StakeId,

    /// Owner of the stake
    pub staker_address: Address,

    /// DLP staked on
    pub dlp_id: DlpId,

    /// Staked amount
    pub amount: Amount,

    /// Block the stake was opened
    pub start_block: BlockNumber,

    /// Block the stake was closed (None while open)
    pub end_block: Option<BlockNumber>,

    /// Funds released back to the staker
    pub withdrawn: bool,

    /// Last epoch whose reward has been settled
    pub last_claimed_epoch_id: EpochId,
}

impl Stake {
    /// Whether the stake is still open
    pub fn is_open(&self) -> bool {
        self.end_block.is_none()
    }

    /// First block at which a closed stake can be withdrawn
    pub fn withdrawable_at(&self, delay: BlockNumber) -> Option<BlockNumber> {
        self.end_block.map(|end| end.saturating_add(delay))
    }
}

/// Stake ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StakeLedger {
    /// Stakes by id
    stakes: BTreeMap<StakeId, Stake>,

    /// Stake ids per staker
    by_staker: BTreeMap<Address, BTreeSet<StakeId>>,

    /// Value currently escrowed (opened or closed, not yet withdrawn)
    escrowed: Amount,
}

impl StakeLedger {
    /// Create empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stakes ever opened
    pub fn count(&self) -> u64 {
        self.stakes.len() as u64
    }

    /// Lookup by id
    pub fn get(&self, stake_id: StakeId) -> Result<&Stake> {
        self.stakes.get(&stake_id).ok_or(Error::InvalidStakeId(stake_id))
    }

    /// Stake ids owned by `staker`, ascending
    pub fn ids_of(&self, staker: &Address) -> Vec<StakeId> {
        self.by_staker
            .get(staker)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Value held for stakes not yet withdrawn
    pub fn escrowed(&self) -> Amount {
        self.escrowed
    }

    /// Open a stake; preconditions are checked by the caller
    pub fn open(
        &mut self,
        staker_address: Address,
        dlp_id: DlpId,
        amount: Amount,
        start_block: BlockNumber,
        last_claimed_epoch_id: EpochId,
    ) -> StakeId {
        let id = self.count() + 1;
        self.by_staker
            .entry(staker_address.clone())
            .or_default()
            .insert(id);
        self.stakes.insert(
            id,
            Stake {
                id,
                staker_address,
                dlp_id,
                amount,
                start_block,
                end_block: None,
                withdrawn: false,
                last_claimed_epoch_id,
            },
        );
        self.escrowed += amount;
        id
    }

    /// Mark closed at `block_number`; returns the closed stake
    pub fn close(&mut self, stake_id: StakeId, block_number: BlockNumber) -> Result<&Stake> {
        let stake = self
            .stakes
            .get_mut(&stake_id)
            .ok_or(Error::InvalidStakeId(stake_id))?;
        if stake.end_block.is_some() {
            return Err(Error::AlreadyClosed(stake_id));
        }
        stake.end_block = Some(block_number);
        Ok(stake)
    }

    /// Mark withdrawn; returns the released amount
    pub fn withdraw(&mut self, stake_id: StakeId) -> Result<Amount> {
        let stake = self
            .stakes
            .get_mut(&stake_id)
            .ok_or(Error::InvalidStakeId(stake_id))?;
        if stake.withdrawn {
            return Err(Error::StakeAlreadyWithdrawn(stake_id));
        }
        stake.withdrawn = true;
        self.escrowed -= stake.amount;
        Ok(stake.amount)
    }

    /// Record the last settled epoch
    pub fn set_last_claimed(&mut self, stake_id: StakeId, epoch_id: EpochId) -> Result<()> {
        let stake = self
            .stakes
            .get_mut(&stake_id)
            .ok_or(Error::InvalidStakeId(stake_id))?;
        stake.last_claimed_epoch_id = epoch_id;
        Ok(())
    }
}
