//! Engine events
//!
//! Every state transition appends an [`EventRecord`] to an outbox the host
//! drains after each call. Off-chain observers (including the score oracle)
//! rebuild state from this stream.

use crate::types::{Address, Amount, BlockNumber, DlpId, DlpStatus, EpochId, StakeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// State transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// DLP registered
    DlpRegistered {
        /// DLP ID
        dlp_id: DlpId,
        /// Operator address
        dlp_address: Address,
        /// Owner address
        owner_address: Address,
        /// Treasury address
        treasury_address: Address,
        /// Stakers percentage
        stakers_percentage: Decimal,
        /// Display name
        name: String,
    },

    /// DLP metadata or percentage updated
    DlpUpdated {
        /// DLP ID
        dlp_id: DlpId,
        /// Owner address
        owner_address: Address,
        /// Treasury address
        treasury_address: Address,
        /// New stakers percentage
        stakers_percentage: Decimal,
        /// First epoch the percentage applies to
        effective_epoch_id: EpochId,
    },

    /// DLP status changed
    DlpStatusUpdated {
        /// DLP ID
        dlp_id: DlpId,
        /// New status
        status: DlpStatus,
    },

    /// DLP deregistered
    DlpDeregistered {
        /// DLP ID
        dlp_id: DlpId,
    },

    /// Stake opened
    StakeCreated {
        /// Stake ID
        stake_id: StakeId,
        /// Staker
        staker_address: Address,
        /// DLP ID
        dlp_id: DlpId,
        /// Amount
        amount: Amount,
    },

    /// Stake closed
    StakeClosed {
        /// Stake ID
        stake_id: StakeId,
    },

    /// Stake withdrawn
    StakeWithdrawn {
        /// Stake ID
        stake_id: StakeId,
        /// Released amount
        amount: Amount,
    },

    /// Epoch materialized
    EpochCreated {
        /// Epoch ID
        epoch_id: EpochId,
        /// First block
        start_block: BlockNumber,
        /// Last block
        end_block: BlockNumber,
        /// Reward budget
        reward_amount: Amount,
    },

    /// Epoch snapshot frozen
    EpochFinalized {
        /// Epoch ID
        epoch_id: EpochId,
        /// Top-ranked DLPs
        dlp_ids: Vec<DlpId>,
    },

    /// Oracle score written
    EpochDlpScoreSaved {
        /// Epoch ID
        epoch_id: EpochId,
        /// DLP ID
        dlp_id: DlpId,
        /// Aggregate score
        total_stakes_score: Amount,
        /// Written through the override path
        overridden: bool,
    },

    /// Owner portion of a top DLP's reward handed to the sink
    OwnerShareRouted {
        /// Epoch ID
        epoch_id: EpochId,
        /// DLP ID
        dlp_id: DlpId,
        /// Treasury address
        treasury_address: Address,
        /// Amount
        amount: Amount,
    },

    /// Stake reward paid
    StakeRewardClaimed {
        /// Stake ID
        stake_id: StakeId,
        /// Staker
        staker_address: Address,
        /// Paid amount
        amount: Amount,
        /// Last settled epoch
        last_claimed_epoch_id: EpochId,
    },

    /// Configuration field changed
    ConfigUpdated {
        /// Field name
        parameter: String,
        /// New value, rendered as text
        value: String,
    },
}

/// Event with ordering metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Global sequence number (from 1)
    pub sequence: u64,

    /// Block of the call that emitted it
    pub block_number: BlockNumber,

    /// Event payload
    pub event: EngineEvent,
}

/// Outbox of undelivered events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    /// Sequence of the last emitted event
    last_sequence: u64,

    /// Undelivered events
    pending: Vec<EventRecord>,
}

impl EventLog {
    /// Create empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty outbox continuing after `last_sequence`
    pub fn resume(last_sequence: u64) -> Self {
        Self {
            last_sequence,
            pending: Vec::new(),
        }
    }

    /// Append an event
    pub fn emit(&mut self, block_number: BlockNumber, event: EngineEvent) {
        self.last_sequence += 1;
        self.pending.push(EventRecord {
            sequence: self.last_sequence,
            block_number,
            event,
        });
    }

    /// Undelivered events
    pub fn pending(&self) -> &[EventRecord] {
        &self.pending
    }

    /// Take every undelivered event
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Sequence of the last emitted event
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_survives_drain() {
        let mut log = EventLog::new();
        log.emit(5, EngineEvent::StakeClosed { stake_id: 1 });
        log.emit(6, EngineEvent::DlpDeregistered { dlp_id: 2 });

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].sequence, 2);
        assert!(log.pending().is_empty());

        log.emit(7, EngineEvent::StakeClosed { stake_id: 3 });
        assert_eq!(log.pending()[0].sequence, 3);
    }

    #[test]
    fn test_json_is_tagged() {
        let event = EngineEvent::DlpStatusUpdated {
            dlp_id: 4,
            status: DlpStatus::SubEligible,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dlp_status_updated");
        assert_eq!(json["status"], "SubEligible");
    }
}
