//! Value movement in and out of the engine
//!
//! The engine escrows stake and pays out withdrawals and rewards through a
//! [`ValueTransfer`] collaborator. The owner portion of each epoch reward is
//! handed to an [`OwnerShareSink`].

use crate::types::{Address, Amount, DlpId, EpochId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// External balance primitive
pub trait ValueTransfer {
    /// Move `amount` from `from` into the engine
    fn collect(&mut self, from: &Address, amount: Amount) -> Result<()>;

    /// Move `amount` out of the engine to `to`
    fn pay(&mut self, to: &Address, amount: Amount) -> Result<()>;
}

/// Per-address balances plus the engine's own reserve
///
/// Collected value lands in the reserve; payouts draw from it. Reward
/// payouts therefore need the reserve to be funded up front with
/// [`InMemoryVault::fund_reserve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryVault {
    /// Account balances
    balances: BTreeMap<Address, Amount>,

    /// Value held by the engine
    reserve: Amount,
}

impl InMemoryVault {
    /// Create empty vault
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air (genesis allocation)
    pub fn deposit(&mut self, account: impl Into<Address>, amount: Amount) {
        *self.balances.entry(account.into()).or_default() += amount;
    }

    /// Credit the engine reserve (reward budget)
    pub fn fund_reserve(&mut self, amount: Amount) {
        self.reserve += amount;
    }

    /// Account balance
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Engine reserve
    pub fn reserve(&self) -> Amount {
        self.reserve
    }
}

impl ValueTransfer for InMemoryVault {
    fn collect(&mut self, from: &Address, amount: Amount) -> Result<()> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(Error::Transfer(format!(
                "insufficient balance for {}: have {}, need {}",
                from, balance, amount
            )));
        }
        self.balances.insert(from.clone(), balance - amount);
        self.reserve += amount;
        Ok(())
    }

    fn pay(&mut self, to: &Address, amount: Amount) -> Result<()> {
        if self.reserve < amount {
            return Err(Error::Transfer(format!(
                "insufficient reserve: have {}, need {}",
                self.reserve, amount
            )));
        }
        self.reserve -= amount;
        *self.balances.entry(to.clone()).or_default() += amount;
        Ok(())
    }
}

/// Owner portion of one DLP's epoch reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerShare {
    /// Finalized epoch
    pub epoch_id: EpochId,

    /// DLP ranked top in that epoch
    pub dlp_id: DlpId,

    /// Treasury the share is destined for
    pub treasury_address: Address,

    /// `reward * (100 - stakers_percentage) / 100`
    pub amount: Amount,
}

/// Receiver of owner shares at finalization
///
/// Must not fail: finalization runs inside the infallible apply phase.
pub trait OwnerShareSink: fmt::Debug + Send {
    /// Accept one share
    fn route(&mut self, share: OwnerShare);

    /// Total routed for a DLP so far, if the sink tracks it
    fn total_for(&self, dlp_id: DlpId) -> Option<Amount>;
}

/// Sink that accrues shares per DLP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccruedOwnerShares {
    /// Accrued total per DLP
    totals: BTreeMap<DlpId, Amount>,

    /// Every routed share, oldest first
    history: Vec<OwnerShare>,
}

impl AccruedOwnerShares {
    /// Create empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Every routed share, oldest first
    pub fn history(&self) -> &[OwnerShare] {
        &self.history
    }
}

impl OwnerShareSink for AccruedOwnerShares {
    fn route(&mut self, share: OwnerShare) {
        *self.totals.entry(share.dlp_id).or_default() += share.amount;
        self.history.push(share);
    }

    fn total_for(&self, dlp_id: DlpId) -> Option<Amount> {
        Some(self.totals.get(&dlp_id).copied().unwrap_or(Decimal::ZERO))
    }
}
