//! DLP registry
//!
//! Operator records, address index and the status state machine. The
//! registry holds no policy about who may call what; the engine enforces
//! ownership and capability checks before touching it.

use crate::types::{Address, Amount, BlockNumber, DlpId, DlpStatus, EpochId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator-supplied registration or update payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlpInfo {
    /// Operator address (immutable after registration)
    pub dlp_address: Address,

    /// Owner allowed to update and deregister
    pub owner_address: Address,

    /// Treasury receiving the owner share
    pub treasury_address: Address,

    /// Share of epoch rewards going to stakers (0-100)
    pub stakers_percentage: Decimal,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Icon URL
    #[serde(default)]
    pub icon_url: String,

    /// Website
    #[serde(default)]
    pub website: String,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: String,
}

impl DlpInfo {
    /// Reject zero owner or treasury addresses
    pub fn check_addresses(&self) -> Result<()> {
        for (field, address) in [
            ("dlp_address", &self.dlp_address),
            ("owner_address", &self.owner_address),
            ("treasury_address", &self.treasury_address),
        ] {
            if address.is_zero() {
                return Err(Error::InvalidAddress(field.to_string()));
            }
        }
        Ok(())
    }
}

/// Registered DLP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dlp {
    /// DLP ID
    pub id: DlpId,

    /// Operator address
    pub dlp_address: Address,

    /// Owner address
    pub owner_address: Address,

    /// Treasury address
    pub treasury_address: Address,

    /// Display name
    pub name: String,

    /// Icon URL
    pub icon_url: String,

    /// Website
    pub website: String,

    /// Free-form metadata
    pub metadata: String,

    /// Latest stakers percentage (pending until the next epoch when changed mid-epoch)
    pub stakers_percentage: Decimal,

    /// Percentage in force before `percentage_effective_epoch`
    stakers_percentage_epoch: Decimal,

    /// First epoch in which `stakers_percentage` applies
    percentage_effective_epoch: EpochId,

    /// Sum of open stakes
    pub stake_amount: Amount,

    /// Lifecycle status
    pub status: DlpStatus,

    /// Block of registration
    pub registration_block_number: BlockNumber,

    /// Epochs in which this DLP was ranked top, ascending
    pub epoch_ids: Vec<EpochId>,
}

impl Dlp {
    /// Stakers percentage effective in `epoch_id`
    pub fn stakers_percentage_at(&self, epoch_id: EpochId) -> Decimal {
        if epoch_id >= self.percentage_effective_epoch {
            self.stakers_percentage
        } else {
            self.stakers_percentage_epoch
        }
    }

    /// Change the stakers percentage starting at `effective_epoch`
    ///
    /// `current_epoch` is the epoch containing "now" (0 before epoch 1).
    pub fn schedule_stakers_percentage(
        &mut self,
        percentage: Decimal,
        current_epoch: EpochId,
        effective_epoch: EpochId,
    ) {
        self.stakers_percentage_epoch = self.stakers_percentage_at(current_epoch);
        self.stakers_percentage = percentage;
        self.percentage_effective_epoch = effective_epoch;
        if effective_epoch <= current_epoch {
            self.stakers_percentage_epoch = percentage;
        }
    }

    /// Whether the DLP was ranked top in `epoch_id`
    pub fn was_top_in(&self, epoch_id: EpochId) -> bool {
        self.epoch_ids.binary_search(&epoch_id).is_ok()
    }

    /// Top-ranked epochs strictly after `after`
    pub fn epoch_ids_after(&self, after: EpochId) -> &[EpochId] {
        let start = self.epoch_ids.partition_point(|id| *id <= after);
        &self.epoch_ids[start..]
    }
}

/// DLP registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DlpRegistry {
    /// DLPs by id
    dlps: BTreeMap<DlpId, Dlp>,

    /// Operator address index
    ids_by_address: BTreeMap<Address, DlpId>,
}

impl DlpRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of DLPs ever registered
    pub fn count(&self) -> u64 {
        self.dlps.len() as u64
    }

    /// Id the next registration receives
    pub fn next_id(&self) -> DlpId {
        self.count() + 1
    }

    /// Lookup by id
    pub fn get(&self, dlp_id: DlpId) -> Result<&Dlp> {
        self.dlps.get(&dlp_id).ok_or(Error::InvalidDlpId(dlp_id))
    }

    /// Mutable lookup by id
    pub fn get_mut(&mut self, dlp_id: DlpId) -> Result<&mut Dlp> {
        self.dlps.get_mut(&dlp_id).ok_or(Error::InvalidDlpId(dlp_id))
    }

    /// Lookup by operator address
    pub fn id_of(&self, dlp_address: &Address) -> Option<DlpId> {
        self.ids_by_address.get(dlp_address).copied()
    }

    /// Status of an operator address (`None` if never registered)
    pub fn status_of(&self, dlp_address: &Address) -> DlpStatus {
        self.id_of(dlp_address)
            .and_then(|id| self.dlps.get(&id))
            .map(|dlp| dlp.status)
            .unwrap_or(DlpStatus::None)
    }

    /// All DLPs in id order
    pub fn iter(&self) -> impl Iterator<Item = &Dlp> {
        self.dlps.values()
    }

    /// All DLPs in id order, mutable
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Dlp> {
        self.dlps.values_mut()
    }

    /// Insert a new DLP; the caller has already validated `info`
    pub fn insert(
        &mut self,
        info: DlpInfo,
        stake_amount: Amount,
        status: DlpStatus,
        block_number: BlockNumber,
    ) -> DlpId {
        let id = self.next_id();
        let dlp = Dlp {
            id,
            dlp_address: info.dlp_address.clone(),
            owner_address: info.owner_address,
            treasury_address: info.treasury_address,
            name: info.name,
            icon_url: info.icon_url,
            website: info.website,
            metadata: info.metadata,
            stakers_percentage: info.stakers_percentage,
            stakers_percentage_epoch: info.stakers_percentage,
            percentage_effective_epoch: 0,
            stake_amount,
            status,
            registration_block_number: block_number,
            epoch_ids: Vec::new(),
        };
        self.ids_by_address.insert(info.dlp_address, id);
        self.dlps.insert(id, dlp);
        id
    }
}
