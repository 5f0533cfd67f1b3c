//! Transaction application
//!
//! Decodes JSON transactions, applies each one against the shared engine and
//! reports the outcome as a [`Receipt`] carrying the emitted events.

use crate::{Config, Error, Result};
use dlp_core::{
    Address, Amount, BlockNumber, CallContext, DlpId, DlpInfo, Engine, EngineSnapshot, EpochId,
    EventRecord, InMemoryVault, Role, ScoreEntry, StakeId, StaticRoles,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Signed-off call against the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Caller address
    pub caller: Address,

    /// Block height at which the call executes
    pub block_number: BlockNumber,

    /// What to do
    pub command: Command,
}

impl Transaction {
    /// Create new transaction
    pub fn new(caller: impl Into<Address>, block_number: BlockNumber, command: Command) -> Self {
        Self {
            caller: caller.into(),
            block_number,
            command,
        }
    }

    /// Decode a JSON transaction
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidTransaction(format!("Failed to decode tx: {}", e)))
    }

    /// Encode as JSON
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn context(&self) -> CallContext {
        CallContext::new(self.caller.clone(), self.block_number)
    }
}

/// Engine entry points and read queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Register a DLP owned by the caller
    RegisterDlp {
        /// Registration details
        info: DlpInfo,
        /// Initial owner stake
        stake: Amount,
    },

    /// Update a DLP's mutable fields
    UpdateDlp {
        /// DLP ID
        dlp_id: DlpId,
        /// New details
        info: DlpInfo,
    },

    /// Deregister a DLP
    DeregisterDlp {
        /// DLP ID
        dlp_id: DlpId,
    },

    /// Stake on a DLP
    CreateStake {
        /// DLP ID
        dlp_id: DlpId,
        /// Amount
        amount: Amount,
    },

    /// Close stakes
    CloseStakes {
        /// Stake IDs
        stake_ids: Vec<StakeId>,
    },

    /// Withdraw closed stakes
    WithdrawStakes {
        /// Stake IDs
        stake_ids: Vec<StakeId>,
    },

    /// Claim rewards of stakes
    ClaimStakesReward {
        /// Stake IDs
        stake_ids: Vec<StakeId>,
    },

    /// Materialize every epoch up to the transaction's block; returns the ids finalized
    CreateEpochs,

    /// Materialize epochs up to a bound
    CreateEpochsUntilBlockNumber {
        /// Upper bound (capped at the transaction's block)
        block_number: BlockNumber,
    },

    /// Oracle score submission
    SaveEpochDlpsTotalStakesScore {
        /// Score entries
        entries: Vec<ScoreEntry>,
    },

    /// Maintainer score correction
    OverrideEpochDlpsTotalStakesScore {
        /// Score entry
        entry: ScoreEntry,
    },

    /// Change one configuration field
    UpdateConfig {
        /// Field and value
        update: ConfigUpdate,
    },

    /// Grant a role (admin only)
    GrantRole {
        /// Role
        role: Role,
        /// Grantee
        account: Address,
    },

    /// Revoke a role (admin only)
    RevokeRole {
        /// Role
        role: Role,
        /// Holder
        account: Address,
    },

    /// Disable mutating calls (admin only)
    Pause,

    /// Re-enable mutating calls (admin only)
    Unpause,

    /// Top-ranked eligible DLPs
    TopDlpIds {
        /// Maximum number of ids
        limit: usize,
    },

    /// DLP by id
    Dlp {
        /// DLP ID
        dlp_id: DlpId,
    },

    /// DLP by operator address
    DlpByAddress {
        /// Operator address
        dlp_address: Address,
    },

    /// Stake by id
    Stake {
        /// Stake ID
        stake_id: StakeId,
    },

    /// Stake ids of a staker
    StakerStakeIds {
        /// Staker
        staker: Address,
    },

    /// Epoch by id
    Epoch {
        /// Epoch ID
        epoch_id: EpochId,
    },

    /// Per-(epoch, DLP) record
    EpochDlp {
        /// Epoch ID
        epoch_id: EpochId,
        /// DLP ID
        dlp_id: DlpId,
    },

    /// Reward a stake could claim at the transaction's block
    StakeClaimable {
        /// Stake ID
        stake_id: StakeId,
    },

    /// Score of a hypothetical stake
    StakeScore {
        /// Amount
        amount: Amount,
        /// First block
        start_block: BlockNumber,
        /// Last block
        end_block: BlockNumber,
    },

    /// Configuration in force
    Config,

    /// Digest of the engine state
    StateDigest,
}

impl Command {
    /// Whether the command only reads state
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::TopDlpIds { .. }
                | Command::Dlp { .. }
                | Command::DlpByAddress { .. }
                | Command::Stake { .. }
                | Command::StakerStakeIds { .. }
                | Command::Epoch { .. }
                | Command::EpochDlp { .. }
                | Command::StakeClaimable { .. }
                | Command::StakeScore { .. }
                | Command::Config
                | Command::StateDigest
        )
    }
}

/// Configuration field change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parameter", content = "value", rename_all = "snake_case")]
pub enum ConfigUpdate {
    /// Maximum size of the ranked eligible set
    EligibleDlpsLimit(usize),
    /// DLPs rewarded per epoch
    EpochDlpsLimit(usize),
    /// Minimum stake
    MinStakeAmount(Amount),
    /// Minimum owner stake at registration
    MinDlpRegistrationStake(Amount),
    /// Lower stakers percentage bound
    MinDlpStakersPercentage(Amount),
    /// Upper stakers percentage bound
    MaxDlpStakersPercentage(Amount),
    /// Stake at which a DLP becomes eligible
    DlpEligibilityThreshold(Amount),
    /// Stake at which a DLP becomes sub-eligible
    DlpSubEligibilityThreshold(Amount),
    /// Blocks between close and withdrawal
    StakeWithdrawalDelay(BlockNumber),
    /// Blocks between epoch end and claim
    RewardClaimDelay(BlockNumber),
    /// Blocks per epoch
    EpochSize(BlockNumber),
    /// Reward budget per epoch
    EpochRewardAmount(Amount),
    /// Blocks per day
    DaySize(BlockNumber),
    /// First block of epoch 1
    StartBlock(BlockNumber),
}

/// Outcome of one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Whether the transaction applied
    pub ok: bool,

    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Return value
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,

    /// Events emitted by the transaction
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRecord>,
}

impl Receipt {
    fn accepted(output: Value, events: Vec<EventRecord>) -> Self {
        Self {
            ok: true,
            error: None,
            output,
            events,
        }
    }

    fn rejected(error: &Error) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            output: Value::Null,
            events: Vec::new(),
        }
    }
}

/// State persisted by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Engine ledger state
    pub engine: EngineSnapshot,

    /// Role table
    pub roles: StaticRoles,

    /// Balances and reserve
    pub vault: InMemoryVault,
}

/// Engine host applying transactions one at a time
#[derive(Debug)]
pub struct DlpApp {
    /// Engine
    engine: Mutex<Engine>,

    /// Snapshot file
    snapshot_path: Option<PathBuf>,
}

impl DlpApp {
    /// Create the app, restoring the snapshot file when it exists
    pub fn new(config: &Config) -> Result<Self> {
        let engine = match &config.snapshot_path {
            Some(path) if path.exists() => {
                info!("Restoring snapshot from: {:?}", path);
                Self::restore(path)?
            }
            _ => Engine::new(config.engine.clone(), config.roles(), config.vault())?,
        };

        Ok(Self {
            engine: Mutex::new(engine),
            snapshot_path: config.snapshot_path.clone(),
        })
    }

    fn restore(path: &Path) -> Result<Engine> {
        let snapshot: NodeSnapshot = dlp_core::snapshot::load(path)?;
        Ok(Engine::from_snapshot(snapshot.engine, snapshot.roles, snapshot.vault)?)
    }

    /// Decode and apply a JSON transaction
    pub fn deliver_bytes(&self, bytes: &[u8]) -> Receipt {
        match Transaction::from_bytes(bytes) {
            Ok(tx) => self.deliver(&tx),
            Err(e) => {
                warn!("Failed to decode transaction: {}", e);
                Receipt::rejected(&e)
            }
        }
    }

    /// Apply one transaction
    pub fn deliver(&self, tx: &Transaction) -> Receipt {
        let mut engine = self.engine.lock();

        match execute(&mut engine, tx) {
            Ok(output) => {
                let events = engine.drain_events();
                if !tx.command.is_query() {
                    info!(
                        caller = %tx.caller,
                        block = tx.block_number,
                        events = events.len(),
                        "Transaction applied"
                    );
                }
                Receipt::accepted(output, events)
            }
            Err(e) => {
                warn!(caller = %tx.caller, block = tx.block_number, "Transaction rejected: {}", e);
                Receipt::rejected(&e)
            }
        }
    }

    /// Capture everything the node persists
    pub fn snapshot(&self) -> NodeSnapshot {
        let engine = self.engine.lock();
        NodeSnapshot {
            engine: engine.snapshot(),
            roles: engine.access().clone(),
            vault: engine.vault().clone(),
        }
    }

    /// Write the snapshot file, if one is configured
    pub fn save_snapshot(&self) -> Result<Option<PathBuf>> {
        let Some(path) = &self.snapshot_path else {
            return Ok(None);
        };
        dlp_core::snapshot::save(path, &self.snapshot())?;
        info!("Snapshot saved to: {:?}", path);
        Ok(Some(path.clone()))
    }

    /// Hex digest of the engine state
    pub fn state_digest(&self) -> Result<String> {
        Ok(hex_digest(&self.engine.lock().state_digest()?))
    }

    /// Run a closure against the engine
    pub fn with_engine<R>(&self, f: impl FnOnce(&Engine) -> R) -> R {
        f(&self.engine.lock())
    }
}

fn execute(engine: &mut Engine, tx: &Transaction) -> Result<Value> {
    let ctx = tx.context();

    let output = match &tx.command {
        Command::RegisterDlp { info, stake } => {
            json!({ "dlp_id": engine.register_dlp(&ctx, info.clone(), *stake)? })
        }
        Command::UpdateDlp { dlp_id, info } => {
            engine.update_dlp(&ctx, *dlp_id, info.clone())?;
            Value::Null
        }
        Command::DeregisterDlp { dlp_id } => {
            engine.deregister_dlp(&ctx, *dlp_id)?;
            Value::Null
        }
        Command::CreateStake { dlp_id, amount } => {
            json!({ "stake_id": engine.create_stake(&ctx, *dlp_id, *amount)? })
        }
        Command::CloseStakes { stake_ids } => {
            engine.close_stakes(&ctx, stake_ids)?;
            Value::Null
        }
        Command::WithdrawStakes { stake_ids } => {
            json!({ "amount": engine.withdraw_stakes(&ctx, stake_ids)? })
        }
        Command::ClaimStakesReward { stake_ids } => {
            json!({ "amount": engine.claim_stakes_reward(&ctx, stake_ids)? })
        }
        Command::CreateEpochs => {
            json!({ "epoch_ids": engine.create_epochs(&ctx)? })
        }
        Command::CreateEpochsUntilBlockNumber { block_number } => {
            json!({ "epoch_ids": engine.create_epochs_until_block_number(&ctx, *block_number)? })
        }
        Command::SaveEpochDlpsTotalStakesScore { entries } => {
            engine.save_epoch_dlps_total_stakes_score(&ctx, entries)?;
            Value::Null
        }
        Command::OverrideEpochDlpsTotalStakesScore { entry } => {
            engine.override_epoch_dlps_total_stakes_score(&ctx, entry)?;
            Value::Null
        }
        Command::UpdateConfig { update } => {
            apply_config_update(engine, &ctx, update)?;
            Value::Null
        }
        Command::GrantRole { role, account } => {
            engine.access_mut().grant_role(&ctx.caller, *role, account.clone())?;
            Value::Null
        }
        Command::RevokeRole { role, account } => {
            engine.access_mut().revoke_role(&ctx.caller, *role, account)?;
            Value::Null
        }
        Command::Pause => {
            engine.access_mut().pause(&ctx.caller)?;
            Value::Null
        }
        Command::Unpause => {
            engine.access_mut().unpause(&ctx.caller)?;
            Value::Null
        }
        Command::TopDlpIds { limit } => json!(engine.top_dlp_ids(*limit)),
        Command::Dlp { dlp_id } => serde_json::to_value(engine.dlp(*dlp_id)?)?,
        Command::DlpByAddress { dlp_address } => serde_json::to_value(engine.dlp_by_address(dlp_address))?,
        Command::Stake { stake_id } => serde_json::to_value(engine.stake(*stake_id)?)?,
        Command::StakerStakeIds { staker } => json!(engine.staker_stake_ids(staker)),
        Command::Epoch { epoch_id } => serde_json::to_value(engine.epoch(*epoch_id)?)?,
        Command::EpochDlp { epoch_id, dlp_id } => {
            serde_json::to_value(engine.epoch_dlp(*epoch_id, *dlp_id)?)?
        }
        Command::StakeClaimable { stake_id } => {
            json!({ "amount": engine.calculate_stake_claimable_amount(*stake_id, tx.block_number)? })
        }
        Command::StakeScore {
            amount,
            start_block,
            end_block,
        } => {
            json!({ "score": engine.calculate_stake_score(*amount, *start_block, *end_block)? })
        }
        Command::Config => serde_json::to_value(engine.config())?,
        Command::StateDigest => json!({ "digest": hex_digest(&engine.state_digest()?) }),
    };

    Ok(output)
}

fn apply_config_update(engine: &mut Engine, ctx: &CallContext, update: &ConfigUpdate) -> Result<()> {
    match *update {
        ConfigUpdate::EligibleDlpsLimit(value) => engine.update_eligible_dlps_limit(ctx, value)?,
        ConfigUpdate::EpochDlpsLimit(value) => engine.update_epoch_dlps_limit(ctx, value)?,
        ConfigUpdate::MinStakeAmount(value) => engine.update_min_stake_amount(ctx, value)?,
        ConfigUpdate::MinDlpRegistrationStake(value) => {
            engine.update_min_dlp_registration_stake(ctx, value)?
        }
        ConfigUpdate::MinDlpStakersPercentage(value) => {
            engine.update_min_dlp_stakers_percentage(ctx, value)?
        }
        ConfigUpdate::MaxDlpStakersPercentage(value) => {
            engine.update_max_dlp_stakers_percentage(ctx, value)?
        }
        ConfigUpdate::DlpEligibilityThreshold(value) => {
            engine.update_dlp_eligibility_threshold(ctx, value)?
        }
        ConfigUpdate::DlpSubEligibilityThreshold(value) => {
            engine.update_dlp_sub_eligibility_threshold(ctx, value)?
        }
        ConfigUpdate::StakeWithdrawalDelay(value) => engine.update_stake_withdrawal_delay(ctx, value)?,
        ConfigUpdate::RewardClaimDelay(value) => engine.update_reward_claim_delay(ctx, value)?,
        ConfigUpdate::EpochSize(value) => engine.update_epoch_size(ctx, value)?,
        ConfigUpdate::EpochRewardAmount(value) => engine.update_epoch_reward_amount(ctx, value)?,
        ConfigUpdate::DaySize(value) => engine.update_day_size(ctx, value)?,
        ConfigUpdate::StartBlock(value) => engine.update_start_block(ctx, value)?,
    }
    Ok(())
}

fn hex_digest(digest: &[u8; 32]) -> String {
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
