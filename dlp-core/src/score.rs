//! Stake score
//!
//! A stake's score is its amount scaled by a bonus multiplier that grows
//! with the number of whole days the stake has been held, saturating at 3x
//! after 64 days.

use crate::types::{Amount, BlockNumber, DlpId, EpochId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Bonus multiplier (percent) indexed by whole days staked
const MULTIPLIERS: [u16; 65] = [
    100, 106, 112, 118, 124, 130, 136, 141, 147, 152, 158, 163, 168, 173, 178, 183, 188, 192,
    197, 201, 205, 210, 214, 218, 222, 226, 229, 233, 237, 240, 244, 247, 250, 253, 256, 259,
    262, 264, 267, 269, 272, 274, 276, 278, 280, 282, 284, 286, 288, 289, 290, 292, 293, 294,
    295, 296, 297, 298, 298, 299, 299, 300, 300, 300, 300,
];

/// Multiplier (percent) for a number of whole days staked
pub fn multiplier(days_staked: u64) -> u16 {
    let index = days_staked.min(MULTIPLIERS.len() as u64 - 1) as usize;
    MULTIPLIERS[index]
}

/// Score of `amount` held from `start_block` to `end_block`
pub fn stake_score(
    amount: Amount,
    start_block: BlockNumber,
    end_block: BlockNumber,
    day_size: BlockNumber,
) -> Result<Amount> {
    let days_staked = end_block.saturating_sub(start_block) / day_size.max(1);
    amount
        .checked_mul(Decimal::from(multiplier(days_staked)))
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .ok_or(Error::ArithmeticOverflow("stake score"))
}

/// One oracle submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Ended epoch
    pub epoch_id: EpochId,

    /// Registered DLP
    pub dlp_id: DlpId,

    /// Aggregate score of every stake on the DLP during the epoch
    pub total_stakes_score: Amount,
}
