//! Error types for the engine
//!
//! Every error is a synchronous rejection: the call that returns it has
//! left the engine exactly as it found it.

use crate::access::Role;
use crate::types::{BlockNumber, DlpId, DlpStatus, EpochId, StakeId};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// DLP is not in a status that allows the operation
    #[error("Invalid DLP status: {0}")]
    InvalidDlpStatus(DlpStatus),

    /// Stake amount below a minimum, or would leave a DLP under-collateralized
    #[error("Invalid stake amount: {0}")]
    InvalidStakeAmount(String),

    /// Stakers percentage outside the configured bounds
    #[error("Invalid stakers percentage: {0}")]
    InvalidStakersPercentage(String),

    /// Caller is not the DLP owner
    #[error("Not DLP owner of dlp {0}")]
    NotDlpOwner(DlpId),

    /// Caller is not the staker
    #[error("Not stake owner of stake {0}")]
    NotStakeOwner(StakeId),

    /// Stake already closed
    #[error("Stake {0} already closed")]
    AlreadyClosed(StakeId),

    /// Stake still open
    #[error("Stake {0} not closed")]
    StakeNotClosed(StakeId),

    /// Stake already withdrawn
    #[error("Stake {0} already withdrawn")]
    StakeAlreadyWithdrawn(StakeId),

    /// Withdrawal delay has not elapsed
    #[error("Stake {stake_id} withdrawal too early: available from block {available_at}")]
    StakeWithdrawalTooEarly {
        /// Stake ID
        stake_id: StakeId,
        /// First block at which the withdrawal succeeds
        available_at: BlockNumber,
    },

    /// Epoch not materialized or not yet ended
    #[error("Epoch {0} not ended")]
    EpochNotEnded(EpochId),

    /// Oracle score already written for (epoch, dlp)
    #[error("Score already saved for epoch {epoch_id}, dlp {dlp_id}")]
    EpochDlpScoreAlreadySaved {
        /// Epoch ID
        epoch_id: EpochId,
        /// DLP ID
        dlp_id: DlpId,
    },

    /// No DLP with this id was ever registered
    #[error("Invalid DLP id: {0}")]
    InvalidDlpId(DlpId),

    /// The operator address is immutable after registration
    #[error("DLP address cannot be changed")]
    DlpAddressCannotBeChanged,

    /// Zero or empty address supplied
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Mutating calls are disabled
    #[error("Engine is paused")]
    Paused,

    /// Caller lacks the capability required by the entry point
    #[error("Unauthorized: caller lacks role {0:?}")]
    Unauthorized(Role),

    /// No stake with this id
    #[error("Invalid stake id: {0}")]
    InvalidStakeId(StakeId),

    /// No epoch with this id
    #[error("Invalid epoch id: {0}")]
    InvalidEpochId(EpochId),

    /// Eligible set is at `eligible_dlps_limit`
    #[error("Too many eligible DLPs (limit {0})")]
    TooManyEligibleDlps(usize),

    /// Configuration or argument rejected
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Call carries a block number lower than one already observed
    #[error("Block number regressed: {given} < {last}")]
    BlockNumberRegressed {
        /// Block number supplied by the caller
        given: BlockNumber,
        /// Highest block number already observed
        last: BlockNumber,
    },

    /// Checked arithmetic failed
    #[error("Arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    /// External value transfer rejected
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Snapshot encoding or decoding failed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry rejected a collector
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Snapshot(err.to_string())
    }
}
