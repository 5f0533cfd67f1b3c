//! Configuration for the engine
//!
//! Every field is admin-mutable at runtime through the maintainer setters
//! on [`crate::Engine`]. Epochs capture `epoch_size` and
//! `epoch_reward_amount` when they are created, so changes only affect
//! epochs materialized afterwards.

use crate::types::{Amount, BlockNumber};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum size of the ranked eligible set
    pub eligible_dlps_limit: usize,

    /// Number of DLPs ranked top per epoch (K)
    pub epoch_dlps_limit: usize,

    /// Minimum amount for a single stake
    pub min_stake_amount: Amount,

    /// Minimum stake required to register a DLP
    pub min_dlp_registration_stake: Amount,

    /// Lower bound for a DLP's stakers percentage (0-100)
    pub min_dlp_stakers_percentage: Decimal,

    /// Upper bound for a DLP's stakers percentage (0-100)
    pub max_dlp_stakers_percentage: Decimal,

    /// Stake at or above which a DLP is Eligible
    pub dlp_eligibility_threshold: Amount,

    /// Stake at or above which a DLP is SubEligible
    pub dlp_sub_eligibility_threshold: Amount,

    /// Blocks between closing a stake and withdrawing it
    pub stake_withdrawal_delay: BlockNumber,

    /// Blocks between an epoch's end and its rewards becoming claimable
    pub reward_claim_delay: BlockNumber,

    /// Epoch length in blocks
    pub epoch_size: BlockNumber,

    /// Reward budget captured by each new epoch
    pub epoch_reward_amount: Amount,

    /// First block of epoch 1
    pub start_block: BlockNumber,

    /// Blocks per day, used by the stake score duration
    pub day_size: BlockNumber,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            eligible_dlps_limit: 500,
            epoch_dlps_limit: 16,
            min_stake_amount: Decimal::from(1),
            min_dlp_registration_stake: Decimal::from(100),
            min_dlp_stakers_percentage: Decimal::from(50),
            max_dlp_stakers_percentage: Decimal::from(100),
            dlp_eligibility_threshold: Decimal::from(10_000),
            dlp_sub_eligibility_threshold: Decimal::from(5_000),
            stake_withdrawal_delay: 50_400, // ~7 days of 12s blocks
            reward_claim_delay: 7_200,      // ~1 day
            epoch_size: 151_200,            // ~21 days
            epoch_reward_amount: Decimal::from(100_000),
            start_block: 0,
            day_size: 7_200,
        }
    }
}

impl Config {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.epoch_size == 0 {
            return Err(Error::InvalidParameter("epoch_size must be positive".to_string()));
        }

        if self.day_size == 0 {
            return Err(Error::InvalidParameter("day_size must be positive".to_string()));
        }

        if self.epoch_dlps_limit > self.eligible_dlps_limit {
            return Err(Error::InvalidParameter(format!(
                "epoch_dlps_limit {} exceeds eligible_dlps_limit {}",
                self.epoch_dlps_limit, self.eligible_dlps_limit
            )));
        }

        if self.min_dlp_stakers_percentage.is_sign_negative()
            || self.min_dlp_stakers_percentage > self.max_dlp_stakers_percentage
            || self.max_dlp_stakers_percentage > Decimal::ONE_HUNDRED
        {
            return Err(Error::InvalidStakersPercentage(format!(
                "bounds [{}, {}] must satisfy 0 <= min <= max <= 100",
                self.min_dlp_stakers_percentage, self.max_dlp_stakers_percentage
            )));
        }

        if self.dlp_sub_eligibility_threshold > self.dlp_eligibility_threshold {
            return Err(Error::InvalidParameter(format!(
                "sub-eligibility threshold {} exceeds eligibility threshold {}",
                self.dlp_sub_eligibility_threshold, self.dlp_eligibility_threshold
            )));
        }

        let amounts = [
            ("min_stake_amount", self.min_stake_amount),
            ("min_dlp_registration_stake", self.min_dlp_registration_stake),
            ("dlp_eligibility_threshold", self.dlp_eligibility_threshold),
            ("dlp_sub_eligibility_threshold", self.dlp_sub_eligibility_threshold),
            ("epoch_reward_amount", self.epoch_reward_amount),
        ];
        for (name, amount) in amounts {
            if amount.is_sign_negative() {
                return Err(Error::InvalidParameter(format!("{} must not be negative", name)));
            }
        }

        Ok(())
    }

    /// Whether a percentage is inside the configured bounds
    pub fn stakers_percentage_in_bounds(&self, percentage: Decimal) -> bool {
        percentage >= self.min_dlp_stakers_percentage
            && percentage <= self.max_dlp_stakers_percentage
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(value) = env_parse::<BlockNumber>("DLP_EPOCH_SIZE")? {
            config.epoch_size = value;
        }

        if let Some(value) = env_parse::<BlockNumber>("DLP_START_BLOCK")? {
            config.start_block = value;
        }

        if let Some(value) = env_parse::<Decimal>("DLP_EPOCH_REWARD_AMOUNT")? {
            config.epoch_reward_amount = value;
        }

        if let Some(value) = env_parse::<usize>("DLP_EPOCH_DLPS_LIMIT")? {
            config.epoch_dlps_limit = value;
        }

        if let Some(value) = env_parse::<usize>("DLP_ELIGIBLE_DLPS_LIMIT")? {
            config.eligible_dlps_limit = value;
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
