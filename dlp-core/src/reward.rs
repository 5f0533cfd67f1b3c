//! Reward calculator
//!
//! A stake earns, for every epoch in which its DLP was ranked top:
//!
//! ```text
//! reward_amount * stakers_percentage / 100 * stake_score / total_stakes_score
//! ```
//!
//! The walk starts after the stake's last settled epoch and ends at the
//! latest epoch past its claim delay. It stops early in front of a top
//! epoch whose score has not been saved yet, so that epoch is picked up by a
//! later claim instead of being skipped. An epoch whose saved score is zero
//! earns nothing and is settled like any other.

use crate::epoch::EpochScheduler;
use crate::registry::Dlp;
use crate::score::stake_score;
use crate::stake::Stake;
use crate::types::{Address, Amount, BlockNumber, EpochId, StakeId};
use crate::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept in reward amounts
pub const REWARD_DECIMALS: u32 = 18;

/// Settlement of one stake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Stake ID
    pub stake_id: StakeId,

    /// Staker receiving the payout
    pub staker_address: Address,

    /// Reward accrued over the walked epochs
    pub amount: Amount,

    /// New last settled epoch
    pub through_epoch_id: EpochId,
}

impl Claim {
    /// Whether settling this claim changes anything
    pub fn is_noop(&self, stake: &Stake) -> bool {
        self.amount.is_zero() && self.through_epoch_id == stake.last_claimed_epoch_id
    }
}

/// Reward of one stake in one epoch
pub fn epoch_reward(
    reward_amount: Amount,
    stakers_percentage: Decimal,
    stake_score: Amount,
    total_stakes_score: Amount,
) -> Result<Amount> {
    if total_stakes_score.is_zero() {
        return Ok(Decimal::ZERO);
    }
    reward_amount
        .checked_mul(stakers_percentage)
        .and_then(|value| value.checked_div(Decimal::ONE_HUNDRED))
        .and_then(|value| value.checked_mul(stake_score))
        .and_then(|value| value.checked_div(total_stakes_score))
        .map(|value| value.round_dp_with_strategy(REWARD_DECIMALS, RoundingStrategy::ToZero))
        .ok_or(Error::ArithmeticOverflow("epoch reward"))
}

/// Compute what `stake` can claim once epochs up to `last_claimable` are open for claims
pub fn claimable(
    stake: &Stake,
    dlp: &Dlp,
    epochs: &EpochScheduler,
    last_claimable: EpochId,
    day_size: BlockNumber,
) -> Result<Claim> {
    let mut claim = Claim {
        stake_id: stake.id,
        staker_address: stake.staker_address.clone(),
        amount: Decimal::ZERO,
        through_epoch_id: stake.last_claimed_epoch_id,
    };
    if last_claimable <= stake.last_claimed_epoch_id {
        return Ok(claim);
    }

    for &epoch_id in dlp.epoch_ids_after(stake.last_claimed_epoch_id) {
        if epoch_id > last_claimable {
            break;
        }
        let epoch = epochs.get(epoch_id)?;

        if matches!(stake.end_block, Some(end) if end < epoch.start_block) {
            break;
        }
        if stake.start_block > epoch.end_block {
            continue;
        }

        let record = epochs.record(epoch_id, dlp.id);
        if !record.score_saved {
            claim.through_epoch_id = epoch_id - 1;
            return Ok(claim);
        }
        if record.total_stakes_score.is_zero() {
            continue;
        }

        let score_end = stake
            .end_block
            .map_or(epoch.end_block, |end| end.min(epoch.end_block));
        let score = stake_score(stake.amount, stake.start_block, score_end, day_size)?;
        let reward = epoch_reward(
            record.reward_amount,
            record.stakers_percentage,
            score,
            record.total_stakes_score,
        )?;
        claim.amount = claim
            .amount
            .checked_add(reward)
            .ok_or(Error::ArithmeticOverflow("claim total"))?;
    }

    claim.through_epoch_id = last_claimable;
    Ok(claim)
}
