//! Core types shared by every engine module
//!
//! All types are designed for:
//! - Deterministic serialization (bincode, ordered maps only)
//! - Exact arithmetic (Decimal for stake, reward and score amounts)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount (stake, reward, score)
pub type Amount = Decimal;

/// Block height, the engine's only time source
pub type BlockNumber = u64;

/// DLP identifier, assigned monotonically from 1
pub type DlpId = u64;

/// Stake identifier, assigned monotonically from 1
pub type StakeId = u64;

/// Epoch identifier, assigned monotonically from 1 (0 = "before any epoch")
pub type EpochId = u64;

/// Account address (operator, owner, treasury, staker)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The zero address
    pub fn zero() -> Self {
        Self::new("0x0000000000000000000000000000000000000000")
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty address or one made only of zero digits
    pub fn is_zero(&self) -> bool {
        let digits = self
            .0
            .strip_prefix("0x")
            .or_else(|| self.0.strip_prefix("0X"))
            .unwrap_or(&self.0);
        digits.chars().all(|c| c == '0')
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Who is calling and at which block
///
/// Supplied by the host with every entry point. Block numbers must never
/// decrease from one call to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Caller address
    pub caller: Address,

    /// Block height at which the call executes
    pub block_number: BlockNumber,
}

impl CallContext {
    /// Create new call context
    pub fn new(caller: impl Into<Address>, block_number: BlockNumber) -> Self {
        Self {
            caller: caller.into(),
            block_number,
        }
    }
}

/// DLP lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DlpStatus {
    /// Never registered
    #[default]
    None = 0,
    /// Registered, stake below the sub-eligibility threshold
    Registered = 1,
    /// Stake at or above the eligibility threshold
    Eligible = 2,
    /// Stake between the sub-eligibility and eligibility thresholds
    SubEligible = 3,
    /// Terminal
    Deregistered = 4,
}

impl DlpStatus {
    /// Derive the status implied by a stake amount
    ///
    /// `Deregistered` and `None` are never produced here; callers keep a
    /// deregistered DLP deregistered.
    pub fn for_stake(
        stake_amount: Amount,
        eligibility_threshold: Amount,
        sub_eligibility_threshold: Amount,
    ) -> Self {
        if stake_amount >= eligibility_threshold {
            DlpStatus::Eligible
        } else if stake_amount >= sub_eligibility_threshold {
            DlpStatus::SubEligible
        } else {
            DlpStatus::Registered
        }
    }

    /// Whether new stakes may be opened on a DLP in this status
    pub fn accepts_stakes(&self) -> bool {
        matches!(self, DlpStatus::Eligible | DlpStatus::SubEligible)
    }

    /// Whether the owner may still deregister
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DlpStatus::Registered | DlpStatus::Eligible | DlpStatus::SubEligible
        )
    }
}

impl fmt::Display for DlpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DlpStatus::None => "None",
            DlpStatus::Registered => "Registered",
            DlpStatus::Eligible => "Eligible",
            DlpStatus::SubEligible => "SubEligible",
            DlpStatus::Deregistered => "Deregistered",
        };
        f.write_str(name)
    }
}
