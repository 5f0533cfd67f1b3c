//! Registry and reward engine
//!
//! Every mutating entry point runs in three steps:
//!
//! 1. Authorize and validate with pure reads, precomputing every amount
//! 2. Perform at most one external transfer
//! 3. Catch epochs up to the call's block, apply state changes, emit events
//!
//! Steps 1 and 2 may fail. Step 3 cannot, so a rejected call leaves the
//! engine exactly as it found it.
//!
//! # Example
//!
//! ```
//! use dlp_core::{Address, CallContext, Config, DlpInfo, Engine, InMemoryVault, StaticRoles};
//! use rust_decimal::Decimal;
//!
//! # fn main() -> dlp_core::Result<()> {
//! let mut vault = InMemoryVault::new();
//! vault.deposit("owner", Decimal::from(20_000));
//! let mut engine = Engine::new(Config::default(), StaticRoles::new("admin"), vault)?;
//!
//! let info = DlpInfo {
//!     dlp_address: Address::new("dlp-1"),
//!     owner_address: Address::new("owner"),
//!     treasury_address: Address::new("treasury"),
//!     stakers_percentage: Decimal::from(80),
//!     name: "first".to_string(),
//!     icon_url: String::new(),
//!     website: String::new(),
//!     metadata: String::new(),
//! };
//! let dlp_id = engine.register_dlp(&CallContext::new("owner", 1), info, Decimal::from(10_000))?;
//! assert_eq!(engine.top_dlp_ids(16), vec![dlp_id]);
//! # Ok(())
//! # }
//! ```

use crate::access::{AccessControl, Role, StaticRoles};
use crate::epoch::{DlpEpochRecord, Epoch, EpochScheduler, TopDlpSnapshot};
use crate::events::{EngineEvent, EventLog, EventRecord};
use crate::metrics::Metrics;
use crate::ranking::RankedSet;
use crate::registry::{Dlp, DlpInfo, DlpRegistry};
use crate::reward::{self, REWARD_DECIMALS};
use crate::score::{self, ScoreEntry};
use crate::snapshot::EngineSnapshot;
use crate::stake::{Stake, StakeLedger};
use crate::types::{Address, Amount, BlockNumber, CallContext, DlpId, DlpStatus, EpochId, StakeId};
use crate::vault::{AccruedOwnerShares, InMemoryVault, OwnerShare, OwnerShareSink, ValueTransfer};
use crate::{Config, Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// DLP registry and reward engine
#[derive(Debug)]
pub struct Engine<A = StaticRoles, V = InMemoryVault> {
    /// Configuration in force
    config: Config,

    /// Capability checks
    access: A,

    /// Value transfers
    vault: V,

    /// Receiver of the owner portion of epoch rewards
    owner_shares: Box<dyn OwnerShareSink>,

    /// DLP registry
    registry: DlpRegistry,

    /// Stake ledger
    stakes: StakeLedger,

    /// Epochs and per-epoch records
    epochs: EpochScheduler,

    /// Ranked eligible set
    eligible: RankedSet,

    /// Event outbox
    events: EventLog,

    /// Highest block observed
    last_block: BlockNumber,

    /// Metrics
    metrics: Metrics,
}

impl<A: AccessControl, V: ValueTransfer> Engine<A, V> {
    /// Create an empty engine
    pub fn new(config: Config, access: A, vault: V) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            access,
            vault,
            owner_shares: Box::new(AccruedOwnerShares::new()),
            registry: DlpRegistry::new(),
            stakes: StakeLedger::new(),
            epochs: EpochScheduler::new(),
            eligible: RankedSet::new(),
            events: EventLog::new(),
            last_block: 0,
            metrics: Metrics::new()?,
        })
    }

    /// Rebuild an engine from a snapshot
    pub fn from_snapshot(snapshot: EngineSnapshot, access: A, vault: V) -> Result<Self> {
        snapshot.config.validate()?;
        let engine = Self {
            config: snapshot.config,
            access,
            vault,
            owner_shares: Box::new(AccruedOwnerShares::new()),
            registry: snapshot.registry,
            stakes: snapshot.stakes,
            epochs: snapshot.epochs,
            eligible: snapshot.eligible,
            events: EventLog::resume(snapshot.event_sequence),
            last_block: snapshot.last_block,
            metrics: Metrics::new()?,
        };
        engine.metrics.update_eligible_set_size(engine.eligible.len());
        engine.refresh_escrow_metric();

        info!(
            dlps = engine.registry.count(),
            stakes = engine.stakes.count(),
            epochs = engine.epochs.count(),
            last_block = engine.last_block,
            "Engine restored from snapshot"
        );
        Ok(engine)
    }

    /// Replace the owner-share sink
    pub fn with_owner_share_sink(mut self, sink: Box<dyn OwnerShareSink>) -> Self {
        self.owner_shares = sink;
        self
    }

    /// Capture all ledger state
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            config: self.config.clone(),
            registry: self.registry.clone(),
            stakes: self.stakes.clone(),
            epochs: self.epochs.clone(),
            eligible: self.eligible.clone(),
            last_block: self.last_block,
            event_sequence: self.events.last_sequence(),
        }
    }

    /// SHA-256 over the canonical snapshot bytes
    pub fn state_digest(&self) -> Result<[u8; 32]> {
        self.snapshot().digest()
    }

    // ===== DLP registry =====

    /// Register a DLP with its initial stake, owned by the caller
    pub fn register_dlp(
        &mut self,
        ctx: &CallContext,
        info: DlpInfo,
        stake_amount: Amount,
    ) -> Result<DlpId> {
        self.begin(ctx)?;

        info.check_addresses()?;
        self.check_stakers_percentage(info.stakers_percentage)?;
        if stake_amount < self.config.min_dlp_registration_stake {
            return Err(Error::InvalidStakeAmount(format!(
                "registration stake {} below minimum {}",
                stake_amount, self.config.min_dlp_registration_stake
            )));
        }
        let existing = self.registry.status_of(&info.dlp_address);
        if existing != DlpStatus::None {
            return Err(Error::InvalidDlpStatus(existing));
        }
        let dlp_id = self.registry.next_id();
        self.check_admission(dlp_id, stake_amount)?;

        self.vault.collect(&ctx.caller, stake_amount)?;

        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        self.emit(
            block_number,
            EngineEvent::DlpRegistered {
                dlp_id,
                dlp_address: info.dlp_address.clone(),
                owner_address: info.owner_address.clone(),
                treasury_address: info.treasury_address.clone(),
                stakers_percentage: info.stakers_percentage,
                name: info.name.clone(),
            },
        );
        info!(dlp_id, dlp_address = %info.dlp_address, %stake_amount, "DLP registered");
        self.registry
            .insert(info, Decimal::ZERO, DlpStatus::Registered, block_number);
        self.metrics.registrations_total.inc();

        self.open_stake(ctx, dlp_id, stake_amount, stake_amount);
        Ok(dlp_id)
    }

    /// Update a DLP's metadata, treasury or stakers percentage (owner only)
    ///
    /// A percentage change made while an epoch is running applies from the
    /// next epoch on.
    pub fn update_dlp(&mut self, ctx: &CallContext, dlp_id: DlpId, info: DlpInfo) -> Result<()> {
        self.begin(ctx)?;

        let dlp = self.registry.get(dlp_id)?;
        if ctx.caller != dlp.owner_address {
            return Err(Error::NotDlpOwner(dlp_id));
        }
        if dlp.status == DlpStatus::Deregistered {
            return Err(Error::InvalidDlpStatus(dlp.status));
        }
        if info.dlp_address != dlp.dlp_address {
            return Err(Error::DlpAddressCannotBeChanged);
        }
        info.check_addresses()?;
        self.check_stakers_percentage(info.stakers_percentage)?;

        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        let current_epoch = self.epochs.current_epoch_id(block_number);
        let effective_epoch_id = if current_epoch == 0 { 0 } else { current_epoch + 1 };

        if let Ok(dlp) = self.registry.get_mut(dlp_id) {
            dlp.owner_address = info.owner_address.clone();
            dlp.treasury_address = info.treasury_address.clone();
            dlp.name = info.name;
            dlp.icon_url = info.icon_url;
            dlp.website = info.website;
            dlp.metadata = info.metadata;
            dlp.schedule_stakers_percentage(
                info.stakers_percentage,
                current_epoch,
                effective_epoch_id,
            );
        }

        info!(dlp_id, stakers_percentage = %info.stakers_percentage, effective_epoch_id, "DLP updated");
        self.emit(
            block_number,
            EngineEvent::DlpUpdated {
                dlp_id,
                owner_address: info.owner_address,
                treasury_address: info.treasury_address,
                stakers_percentage: info.stakers_percentage,
                effective_epoch_id,
            },
        );
        Ok(())
    }

    /// Deregister a DLP (owner only, terminal)
    pub fn deregister_dlp(&mut self, ctx: &CallContext, dlp_id: DlpId) -> Result<()> {
        self.begin(ctx)?;

        let dlp = self.registry.get(dlp_id)?;
        if ctx.caller != dlp.owner_address {
            return Err(Error::NotDlpOwner(dlp_id));
        }
        if !dlp.status.is_active() {
            return Err(Error::InvalidDlpStatus(dlp.status));
        }

        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        if let Ok(dlp) = self.registry.get_mut(dlp_id) {
            dlp.status = DlpStatus::Deregistered;
        }
        self.eligible.remove(dlp_id);
        self.metrics.update_eligible_set_size(self.eligible.len());

        info!(dlp_id, "DLP deregistered");
        self.emit(
            block_number,
            EngineEvent::DlpStatusUpdated {
                dlp_id,
                status: DlpStatus::Deregistered,
            },
        );
        self.emit(block_number, EngineEvent::DlpDeregistered { dlp_id });
        Ok(())
    }

    // ===== Stake ledger =====

    /// Stake on an Eligible or SubEligible DLP
    pub fn create_stake(&mut self, ctx: &CallContext, dlp_id: DlpId, amount: Amount) -> Result<StakeId> {
        self.begin(ctx)?;

        let dlp = self.registry.get(dlp_id)?;
        if !dlp.status.accepts_stakes() {
            return Err(Error::InvalidDlpStatus(dlp.status));
        }
        if amount <= Decimal::ZERO || amount < self.config.min_stake_amount {
            return Err(Error::InvalidStakeAmount(format!(
                "stake {} below minimum {}",
                amount, self.config.min_stake_amount
            )));
        }
        let new_stake_amount = dlp
            .stake_amount
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow("dlp stake amount"))?;
        self.check_admission(dlp_id, new_stake_amount)?;

        self.vault.collect(&ctx.caller, amount)?;

        self.advance_to(ctx.block_number, ctx.block_number);
        Ok(self.open_stake(ctx, dlp_id, amount, new_stake_amount))
    }

    /// Close stakes owned by the caller (all or nothing)
    pub fn close_stakes(&mut self, ctx: &CallContext, stake_ids: &[StakeId]) -> Result<()> {
        self.begin(ctx)?;

        let mut seen = BTreeSet::new();
        let mut reductions: BTreeMap<DlpId, Amount> = BTreeMap::new();
        for &stake_id in stake_ids {
            let stake = self.stakes.get(stake_id)?;
            if stake.staker_address != ctx.caller {
                return Err(Error::NotStakeOwner(stake_id));
            }
            if !stake.is_open() || !seen.insert(stake_id) {
                return Err(Error::AlreadyClosed(stake_id));
            }

            let dlp = self.registry.get(stake.dlp_id)?;
            let reduction = reductions.entry(dlp.id).or_insert(Decimal::ZERO);
            *reduction = reduction
                .checked_add(stake.amount)
                .ok_or(Error::ArithmeticOverflow("stake reduction"))?;
            let remaining = dlp
                .stake_amount
                .checked_sub(*reduction)
                .ok_or(Error::ArithmeticOverflow("dlp stake amount"))?;

            // the owner keeps the registration minimum while the DLP is live
            if ctx.caller == dlp.owner_address
                && dlp.status != DlpStatus::Deregistered
                && remaining < self.config.min_dlp_registration_stake
            {
                return Err(Error::InvalidStakeAmount(format!(
                    "closing stake {} leaves dlp {} with {} below registration minimum {}",
                    stake_id, dlp.id, remaining, self.config.min_dlp_registration_stake
                )));
            }
        }

        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        for &stake_id in stake_ids {
            if self.stakes.close(stake_id, block_number).is_ok() {
                info!(stake_id, "Stake closed");
                self.emit(block_number, EngineEvent::StakeClosed { stake_id });
                self.metrics.stakes_closed_total.inc();
            }
        }
        for (dlp_id, reduction) in reductions {
            let stake_amount = match self.registry.get(dlp_id) {
                Ok(dlp) => dlp.stake_amount - reduction,
                Err(_) => continue,
            };
            self.set_stake_amount(dlp_id, stake_amount, block_number);
        }
        Ok(())
    }

    /// Withdraw closed stakes past their delay; returns the amount released
    pub fn withdraw_stakes(&mut self, ctx: &CallContext, stake_ids: &[StakeId]) -> Result<Amount> {
        self.begin(ctx)?;

        let mut seen = BTreeSet::new();
        let mut total = Decimal::ZERO;
        for &stake_id in stake_ids {
            let stake = self.stakes.get(stake_id)?;
            if stake.staker_address != ctx.caller {
                return Err(Error::NotStakeOwner(stake_id));
            }
            let available_at = stake
                .withdrawable_at(self.config.stake_withdrawal_delay)
                .ok_or(Error::StakeNotClosed(stake_id))?;
            if stake.withdrawn || !seen.insert(stake_id) {
                return Err(Error::StakeAlreadyWithdrawn(stake_id));
            }
            if ctx.block_number < available_at {
                return Err(Error::StakeWithdrawalTooEarly {
                    stake_id,
                    available_at,
                });
            }
            total = total
                .checked_add(stake.amount)
                .ok_or(Error::ArithmeticOverflow("withdrawal total"))?;
        }

        if total > Decimal::ZERO {
            self.vault.pay(&ctx.caller, total)?;
        }

        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        for &stake_id in stake_ids {
            if let Ok(amount) = self.stakes.withdraw(stake_id) {
                info!(stake_id, %amount, "Stake withdrawn");
                self.emit(block_number, EngineEvent::StakeWithdrawn { stake_id, amount });
                self.metrics.stakes_withdrawn_total.inc();
            }
        }
        self.refresh_escrow_metric();
        Ok(total)
    }

    // ===== Epoch scheduler =====

    /// Materialize every epoch that has started; returns the ids finalized
    pub fn create_epochs(&mut self, ctx: &CallContext) -> Result<Vec<EpochId>> {
        self.create_epochs_until_block_number(ctx, ctx.block_number)
    }

    /// Materialize epochs that start at or before `min(now, bound)`
    ///
    /// Lets a caller split a long catch-up across several calls.
    pub fn create_epochs_until_block_number(
        &mut self,
        ctx: &CallContext,
        bound: BlockNumber,
    ) -> Result<Vec<EpochId>> {
        self.begin(ctx)?;
        Ok(self.advance_to(bound.min(ctx.block_number), ctx.block_number))
    }

    /// Up to `k` DLP ids by descending stake, ties to the lower id
    pub fn top_dlp_ids(&self, k: usize) -> Vec<DlpId> {
        let registry = &self.registry;
        self.eligible.top(k, |dlp_id| {
            registry
                .get(dlp_id)
                .map(|dlp| dlp.status.accepts_stakes())
                .unwrap_or(false)
        })
    }

    // ===== Score oracle =====

    /// Save oracle scores, write-once per (epoch, DLP), all or nothing (manager only)
    pub fn save_epoch_dlps_total_stakes_score(
        &mut self,
        ctx: &CallContext,
        entries: &[ScoreEntry],
    ) -> Result<()> {
        self.begin(ctx)?;
        self.access.require_role(Role::Manager, &ctx.caller)?;

        let mut seen = BTreeSet::new();
        for entry in entries {
            self.check_score_entry(entry, ctx.block_number)?;
            let already_saved = self.epochs.is_score_saved(entry.epoch_id, entry.dlp_id);
            if already_saved || !seen.insert((entry.epoch_id, entry.dlp_id)) {
                return Err(Error::EpochDlpScoreAlreadySaved {
                    epoch_id: entry.epoch_id,
                    dlp_id: entry.dlp_id,
                });
            }
        }

        self.advance_to(ctx.block_number, ctx.block_number);
        for entry in entries {
            self.write_score(entry, false, ctx.block_number);
        }
        Ok(())
    }

    /// Overwrite an oracle score, zero included (maintainer only)
    pub fn override_epoch_dlps_total_stakes_score(
        &mut self,
        ctx: &CallContext,
        entry: &ScoreEntry,
    ) -> Result<()> {
        self.begin(ctx)?;
        self.access.require_role(Role::Maintainer, &ctx.caller)?;
        self.check_score_entry(entry, ctx.block_number)?;

        self.advance_to(ctx.block_number, ctx.block_number);
        self.write_score(entry, true, ctx.block_number);
        Ok(())
    }

    /// Score of `amount` staked from `start_block` to `end_block`
    pub fn calculate_stake_score(
        &self,
        amount: Amount,
        start_block: BlockNumber,
        end_block: BlockNumber,
    ) -> Result<Amount> {
        score::stake_score(amount, start_block, end_block, self.config.day_size)
    }

    // ===== Rewards =====

    /// Reward a stake could claim at `block_number`
    pub fn calculate_stake_claimable_amount(
        &self,
        stake_id: StakeId,
        block_number: BlockNumber,
    ) -> Result<Amount> {
        let stake = self.stakes.get(stake_id)?;
        let dlp = self.registry.get(stake.dlp_id)?;
        let last_claimable = self
            .epochs
            .last_claimable_epoch_id(block_number, self.config.reward_claim_delay);
        let claim = reward::claimable(stake, dlp, &self.epochs, last_claimable, self.config.day_size)?;
        Ok(claim.amount)
    }

    /// Claim rewards of the caller's stakes; returns the amount paid
    ///
    /// Repeated ids are settled once. A second claim over the same range
    /// pays nothing.
    pub fn claim_stakes_reward(&mut self, ctx: &CallContext, stake_ids: &[StakeId]) -> Result<Amount> {
        self.begin(ctx)?;

        let last_claimable = self
            .epochs
            .last_claimable_epoch_id(ctx.block_number, self.config.reward_claim_delay);
        let mut seen = BTreeSet::new();
        let mut claims = Vec::new();
        let mut total = Decimal::ZERO;
        for &stake_id in stake_ids {
            if !seen.insert(stake_id) {
                continue;
            }
            let stake = self.stakes.get(stake_id)?;
            if stake.staker_address != ctx.caller {
                return Err(Error::NotStakeOwner(stake_id));
            }
            let dlp = self.registry.get(stake.dlp_id)?;
            let claim =
                reward::claimable(stake, dlp, &self.epochs, last_claimable, self.config.day_size)?;
            if claim.is_noop(stake) {
                continue;
            }
            total = total
                .checked_add(claim.amount)
                .ok_or(Error::ArithmeticOverflow("claim total"))?;
            claims.push(claim);
        }

        if total > Decimal::ZERO {
            self.vault.pay(&ctx.caller, total)?;
        }

        // epochs finalized here become claimable from the next call on
        self.advance_to(ctx.block_number, ctx.block_number);
        for claim in claims {
            if self
                .stakes
                .set_last_claimed(claim.stake_id, claim.through_epoch_id)
                .is_err()
            {
                continue;
            }
            info!(
                stake_id = claim.stake_id,
                amount = %claim.amount,
                through_epoch_id = claim.through_epoch_id,
                "Stake reward claimed"
            );
            self.emit(
                ctx.block_number,
                EngineEvent::StakeRewardClaimed {
                    stake_id: claim.stake_id,
                    staker_address: claim.staker_address,
                    amount: claim.amount,
                    last_claimed_epoch_id: claim.through_epoch_id,
                },
            );
            self.metrics.reward_claims_total.inc();
        }
        Ok(total)
    }

    // ===== Configuration =====

    /// Set `eligible_dlps_limit`
    pub fn update_eligible_dlps_limit(&mut self, ctx: &CallContext, value: usize) -> Result<()> {
        self.update_config(ctx, "eligible_dlps_limit", value.to_string(), |config| {
            config.eligible_dlps_limit = value
        })
    }

    /// Set `epoch_dlps_limit`
    pub fn update_epoch_dlps_limit(&mut self, ctx: &CallContext, value: usize) -> Result<()> {
        self.update_config(ctx, "epoch_dlps_limit", value.to_string(), |config| {
            config.epoch_dlps_limit = value
        })
    }

    /// Set `min_stake_amount`
    pub fn update_min_stake_amount(&mut self, ctx: &CallContext, value: Amount) -> Result<()> {
        self.update_config(ctx, "min_stake_amount", value.to_string(), |config| {
            config.min_stake_amount = value
        })
    }

    /// Set `min_dlp_registration_stake`
    pub fn update_min_dlp_registration_stake(&mut self, ctx: &CallContext, value: Amount) -> Result<()> {
        self.update_config(ctx, "min_dlp_registration_stake", value.to_string(), |config| {
            config.min_dlp_registration_stake = value
        })
    }

    /// Set `min_dlp_stakers_percentage`
    pub fn update_min_dlp_stakers_percentage(&mut self, ctx: &CallContext, value: Decimal) -> Result<()> {
        self.update_config(ctx, "min_dlp_stakers_percentage", value.to_string(), |config| {
            config.min_dlp_stakers_percentage = value
        })
    }

    /// Set `max_dlp_stakers_percentage`
    pub fn update_max_dlp_stakers_percentage(&mut self, ctx: &CallContext, value: Decimal) -> Result<()> {
        self.update_config(ctx, "max_dlp_stakers_percentage", value.to_string(), |config| {
            config.max_dlp_stakers_percentage = value
        })
    }

    /// Set `dlp_eligibility_threshold` and re-evaluate statuses
    pub fn update_dlp_eligibility_threshold(&mut self, ctx: &CallContext, value: Amount) -> Result<()> {
        self.update_config(ctx, "dlp_eligibility_threshold", value.to_string(), |config| {
            config.dlp_eligibility_threshold = value
        })
    }

    /// Set `dlp_sub_eligibility_threshold` and re-evaluate statuses
    pub fn update_dlp_sub_eligibility_threshold(&mut self, ctx: &CallContext, value: Amount) -> Result<()> {
        self.update_config(ctx, "dlp_sub_eligibility_threshold", value.to_string(), |config| {
            config.dlp_sub_eligibility_threshold = value
        })
    }

    /// Set `stake_withdrawal_delay`
    pub fn update_stake_withdrawal_delay(&mut self, ctx: &CallContext, value: BlockNumber) -> Result<()> {
        self.update_config(ctx, "stake_withdrawal_delay", value.to_string(), |config| {
            config.stake_withdrawal_delay = value
        })
    }

    /// Set `reward_claim_delay`
    pub fn update_reward_claim_delay(&mut self, ctx: &CallContext, value: BlockNumber) -> Result<()> {
        self.update_config(ctx, "reward_claim_delay", value.to_string(), |config| {
            config.reward_claim_delay = value
        })
    }

    /// Set `epoch_size` for epochs created from now on
    pub fn update_epoch_size(&mut self, ctx: &CallContext, value: BlockNumber) -> Result<()> {
        self.update_config(ctx, "epoch_size", value.to_string(), |config| {
            config.epoch_size = value
        })
    }

    /// Set `epoch_reward_amount` for epochs created from now on
    pub fn update_epoch_reward_amount(&mut self, ctx: &CallContext, value: Amount) -> Result<()> {
        self.update_config(ctx, "epoch_reward_amount", value.to_string(), |config| {
            config.epoch_reward_amount = value
        })
    }

    /// Set `day_size`
    pub fn update_day_size(&mut self, ctx: &CallContext, value: BlockNumber) -> Result<()> {
        self.update_config(ctx, "day_size", value.to_string(), |config| {
            config.day_size = value
        })
    }

    /// Move `start_block`; only possible before epoch 1 is due
    pub fn update_start_block(&mut self, ctx: &CallContext, value: BlockNumber) -> Result<()> {
        if self.epochs.count() > 0 || self.config.start_block <= ctx.block_number {
            return Err(Error::InvalidParameter(
                "start_block is fixed once the first epoch is due".to_string(),
            ));
        }
        self.update_config(ctx, "start_block", value.to_string(), |config| {
            config.start_block = value
        })
    }

    // ===== Accessors =====

    /// Configuration in force
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// DLP by id
    pub fn dlp(&self, dlp_id: DlpId) -> Result<&Dlp> {
        self.registry.get(dlp_id)
    }

    /// DLP by operator address
    pub fn dlp_by_address(&self, dlp_address: &Address) -> Option<&Dlp> {
        self.registry
            .id_of(dlp_address)
            .and_then(|dlp_id| self.registry.get(dlp_id).ok())
    }

    /// Stake by id
    pub fn stake(&self, stake_id: StakeId) -> Result<&Stake> {
        self.stakes.get(stake_id)
    }

    /// Epoch by id
    pub fn epoch(&self, epoch_id: EpochId) -> Result<&Epoch> {
        self.epochs.get(epoch_id)
    }

    /// Record of a DLP in an epoch
    pub fn epoch_dlp(&self, epoch_id: EpochId, dlp_id: DlpId) -> Result<DlpEpochRecord> {
        self.epochs.get(epoch_id)?;
        self.registry.get(dlp_id)?;
        Ok(self.epochs.record(epoch_id, dlp_id))
    }

    /// Number of DLPs ever registered
    pub fn dlps_count(&self) -> u64 {
        self.registry.count()
    }

    /// Number of stakes ever opened
    pub fn stakes_count(&self) -> u64 {
        self.stakes.count()
    }

    /// Number of materialized epochs
    pub fn epochs_count(&self) -> u64 {
        self.epochs.count()
    }

    /// Latest materialized epoch that has started by the last observed block
    pub fn current_epoch_id(&self) -> EpochId {
        self.epochs.current_epoch_id(self.last_block)
    }

    /// Highest block observed
    pub fn last_block(&self) -> BlockNumber {
        self.last_block
    }

    /// Members of the ranked eligible set, in ranking order
    pub fn eligible_dlp_ids(&self) -> Vec<DlpId> {
        self.eligible.iter().map(|(dlp_id, _)| dlp_id).collect()
    }

    /// Stake ids owned by `staker`
    pub fn staker_stake_ids(&self, staker: &Address) -> Vec<StakeId> {
        self.stakes.ids_of(staker)
    }

    /// Owner share routed for a DLP so far
    pub fn owner_share_of(&self, dlp_id: DlpId) -> Option<Amount> {
        self.owner_shares.total_for(dlp_id)
    }

    /// Value escrowed for stakes not yet withdrawn
    pub fn escrow_balance(&self) -> Amount {
        self.stakes.escrowed()
    }

    /// Access-control collaborator
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Mutable access-control collaborator
    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    /// Value-transfer collaborator
    pub fn vault(&self) -> &V {
        &self.vault
    }

    /// Mutable value-transfer collaborator
    pub fn vault_mut(&mut self) -> &mut V {
        &mut self.vault
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Events not yet drained
    pub fn pending_events(&self) -> &[EventRecord] {
        self.events.pending()
    }

    /// Take every undelivered event
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.events.drain()
    }

    // ===== Internals =====

    fn begin(&self, ctx: &CallContext) -> Result<()> {
        self.access.require_not_paused()?;
        if ctx.block_number < self.last_block {
            return Err(Error::BlockNumberRegressed {
                given: ctx.block_number,
                last: self.last_block,
            });
        }
        Ok(())
    }

    fn check_stakers_percentage(&self, percentage: Decimal) -> Result<()> {
        if self.config.stakers_percentage_in_bounds(percentage) {
            Ok(())
        } else {
            Err(Error::InvalidStakersPercentage(format!(
                "{} outside [{}, {}]",
                percentage,
                self.config.min_dlp_stakers_percentage,
                self.config.max_dlp_stakers_percentage
            )))
        }
    }

    /// Reject stake changes that would grow the eligible set past its limit
    fn check_admission(&self, dlp_id: DlpId, stake_amount: Amount) -> Result<()> {
        if stake_amount >= self.config.dlp_sub_eligibility_threshold
            && !self.eligible.contains(dlp_id)
            && self.eligible.len() >= self.config.eligible_dlps_limit
        {
            return Err(Error::TooManyEligibleDlps(self.config.eligible_dlps_limit));
        }
        Ok(())
    }

    fn check_score_entry(&self, entry: &ScoreEntry, block_number: BlockNumber) -> Result<()> {
        let epoch = self
            .epochs
            .get(entry.epoch_id)
            .map_err(|_| Error::EpochNotEnded(entry.epoch_id))?;
        if epoch.end_block >= block_number {
            return Err(Error::EpochNotEnded(entry.epoch_id));
        }
        self.registry.get(entry.dlp_id)?;
        if entry.total_stakes_score.is_sign_negative() {
            return Err(Error::InvalidParameter(format!(
                "negative score {} for epoch {}, dlp {}",
                entry.total_stakes_score, entry.epoch_id, entry.dlp_id
            )));
        }
        Ok(())
    }

    fn write_score(&mut self, entry: &ScoreEntry, overridden: bool, block_number: BlockNumber) {
        self.epochs
            .set_score(entry.epoch_id, entry.dlp_id, entry.total_stakes_score);
        info!(
            epoch_id = entry.epoch_id,
            dlp_id = entry.dlp_id,
            score = %entry.total_stakes_score,
            overridden,
            "Epoch DLP score saved"
        );
        self.emit(
            block_number,
            EngineEvent::EpochDlpScoreSaved {
                epoch_id: entry.epoch_id,
                dlp_id: entry.dlp_id,
                total_stakes_score: entry.total_stakes_score,
                overridden,
            },
        );
        self.metrics.scores_saved_total.inc();
    }

    /// Apply step of stake creation; the caller has validated and collected
    fn open_stake(
        &mut self,
        ctx: &CallContext,
        dlp_id: DlpId,
        amount: Amount,
        new_stake_amount: Amount,
    ) -> StakeId {
        let block_number = ctx.block_number;
        let current_epoch = self.epochs.current_epoch_id(block_number);
        let stake_id = self.stakes.open(
            ctx.caller.clone(),
            dlp_id,
            amount,
            block_number,
            current_epoch.saturating_sub(1),
        );
        self.set_stake_amount(dlp_id, new_stake_amount, block_number);

        info!(stake_id, dlp_id, staker = %ctx.caller, %amount, "Stake created");
        self.emit(
            block_number,
            EngineEvent::StakeCreated {
                stake_id,
                staker_address: ctx.caller.clone(),
                dlp_id,
                amount,
            },
        );
        self.metrics.stakes_created_total.inc();
        self.refresh_escrow_metric();
        stake_id
    }

    /// Store a DLP's new stake, recompute its status and set membership
    fn set_stake_amount(&mut self, dlp_id: DlpId, stake_amount: Amount, block_number: BlockNumber) {
        let (previous, status) = match self.registry.get_mut(dlp_id) {
            Ok(dlp) => {
                let previous = dlp.status;
                dlp.stake_amount = stake_amount;
                if previous != DlpStatus::Deregistered {
                    dlp.status = DlpStatus::for_stake(
                        stake_amount,
                        self.config.dlp_eligibility_threshold,
                        self.config.dlp_sub_eligibility_threshold,
                    );
                }
                (previous, dlp.status)
            }
            Err(_) => return,
        };

        if status != DlpStatus::Deregistered
            && stake_amount >= self.config.dlp_sub_eligibility_threshold
        {
            self.eligible.upsert(dlp_id, stake_amount);
        } else {
            self.eligible.remove(dlp_id);
        }
        self.metrics.update_eligible_set_size(self.eligible.len());

        if status != previous {
            info!(dlp_id, %previous, %status, "DLP status updated");
            self.emit(block_number, EngineEvent::DlpStatusUpdated { dlp_id, status });
        }
    }

    /// Re-bucket every live DLP after a threshold change; adds members, never removes
    fn reevaluate_statuses(&mut self, block_number: BlockNumber) {
        let mut changed = Vec::new();
        for dlp in self.registry.iter_mut() {
            if dlp.status == DlpStatus::Deregistered {
                continue;
            }
            let status = DlpStatus::for_stake(
                dlp.stake_amount,
                self.config.dlp_eligibility_threshold,
                self.config.dlp_sub_eligibility_threshold,
            );
            if dlp.stake_amount >= self.config.dlp_sub_eligibility_threshold {
                self.eligible.upsert(dlp.id, dlp.stake_amount);
            }
            if status != dlp.status {
                dlp.status = status;
                changed.push((dlp.id, status));
            }
        }

        self.metrics.update_eligible_set_size(self.eligible.len());
        for (dlp_id, status) in changed {
            info!(dlp_id, %status, "DLP status updated by threshold change");
            self.emit(block_number, EngineEvent::DlpStatusUpdated { dlp_id, status });
        }
    }

    fn update_config<F>(
        &mut self,
        ctx: &CallContext,
        parameter: &'static str,
        value: String,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Config),
    {
        self.begin(ctx)?;
        self.access.require_role(Role::Maintainer, &ctx.caller)?;

        let mut next = self.config.clone();
        mutate(&mut next);
        next.validate()?;

        // boundaries already crossed are materialized under the old values
        let block_number = ctx.block_number;
        self.advance_to(block_number, block_number);

        let thresholds_changed = next.dlp_eligibility_threshold
            != self.config.dlp_eligibility_threshold
            || next.dlp_sub_eligibility_threshold != self.config.dlp_sub_eligibility_threshold;
        self.config = next;
        if thresholds_changed {
            self.reevaluate_statuses(block_number);
        }

        info!(parameter, value = %value, "Config updated");
        self.emit(
            block_number,
            EngineEvent::ConfigUpdated {
                parameter: parameter.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Materialize epochs starting at or before `until`, finalizing each predecessor
    ///
    /// Returns the ids of the epochs finalized.
    fn advance_to(&mut self, until: BlockNumber, block_number: BlockNumber) -> Vec<EpochId> {
        self.last_block = self.last_block.max(block_number);

        let mut finalized = Vec::new();
        let mut created = 0;
        while let Some((start_block, end_block)) = self
            .epochs
            .next_bounds(self.config.start_block, self.config.epoch_size)
        {
            if start_block > until {
                break;
            }
            let reward_amount = self.config.epoch_reward_amount;
            let epoch_id = self.epochs.open(start_block, end_block, reward_amount);
            created += 1;

            info!(epoch_id, start_block, end_block, %reward_amount, "Epoch created");
            self.emit(
                block_number,
                EngineEvent::EpochCreated {
                    epoch_id,
                    start_block,
                    end_block,
                    reward_amount,
                },
            );

            if epoch_id > 1 && self.finalize_epoch(epoch_id - 1, block_number) {
                finalized.push(epoch_id - 1);
            }
        }

        if created > 0 {
            debug!(created, until, finalized = ?finalized, "Epoch catch-up");
        }
        self.metrics.record_catch_up(created);
        finalized
    }

    /// Freeze the top list and records of `epoch_id` and route owner shares
    fn finalize_epoch(&mut self, epoch_id: EpochId, block_number: BlockNumber) -> bool {
        let top: Vec<TopDlpSnapshot> = self
            .top_dlp_ids(self.config.epoch_dlps_limit)
            .into_iter()
            .filter_map(|dlp_id| self.registry.get(dlp_id).ok())
            .map(|dlp| TopDlpSnapshot {
                dlp_id: dlp.id,
                stake_amount: dlp.stake_amount,
                stakers_percentage: dlp.stakers_percentage_at(epoch_id),
            })
            .collect();

        if !self.epochs.finalize(epoch_id, &top) {
            return false;
        }
        let reward_amount = match self.epochs.get(epoch_id) {
            Ok(epoch) => epoch.reward_amount,
            Err(_) => return false,
        };

        for snapshot in &top {
            let treasury_address = match self.registry.get_mut(snapshot.dlp_id) {
                Ok(dlp) => {
                    dlp.epoch_ids.push(epoch_id);
                    dlp.treasury_address.clone()
                }
                Err(_) => continue,
            };

            match owner_share(reward_amount, snapshot.stakers_percentage) {
                Some(amount) if amount > Decimal::ZERO => {
                    self.owner_shares.route(OwnerShare {
                        epoch_id,
                        dlp_id: snapshot.dlp_id,
                        treasury_address: treasury_address.clone(),
                        amount,
                    });
                    self.emit(
                        block_number,
                        EngineEvent::OwnerShareRouted {
                            epoch_id,
                            dlp_id: snapshot.dlp_id,
                            treasury_address,
                            amount,
                        },
                    );
                }
                Some(_) => {}
                None => warn!(epoch_id, dlp_id = snapshot.dlp_id, "Owner share overflowed"),
            }
        }

        let dlp_ids: Vec<DlpId> = top.iter().map(|snapshot| snapshot.dlp_id).collect();
        info!(epoch_id, dlp_ids = ?dlp_ids, "Epoch finalized");
        self.emit(block_number, EngineEvent::EpochFinalized { epoch_id, dlp_ids });
        true
    }

    fn emit(&mut self, block_number: BlockNumber, event: EngineEvent) {
        self.events.emit(block_number, event);
    }

    fn refresh_escrow_metric(&self) {
        self.metrics
            .update_escrow_balance(self.stakes.escrowed().to_f64().unwrap_or(0.0));
    }
}

/// `reward * (100 - stakers_percentage) / 100`, truncated like stake rewards
fn owner_share(reward_amount: Amount, stakers_percentage: Decimal) -> Option<Amount> {
    Decimal::ONE_HUNDRED
        .checked_sub(stakers_percentage)?
        .checked_mul(reward_amount)?
        .checked_div(Decimal::ONE_HUNDRED)
        .map(|amount| amount.round_dp_with_strategy(REWARD_DECIMALS, RoundingStrategy::ToZero))
}
