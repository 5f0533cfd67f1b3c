//! Capability checks consumed at every mutating boundary
//!
//! The engine never decides who holds a role; it asks an [`AccessControl`]
//! implementation supplied by the host. [`StaticRoles`] is the in-process
//! reference implementation used by the node and the tests.

use crate::types::Address;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Privileged roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Grants and revokes roles, pauses and unpauses
    Admin,
    /// Configuration setters and score overrides
    Maintainer,
    /// Oracle score submission
    Manager,
}

/// External access-control collaborator
pub trait AccessControl {
    /// Whether `address` holds `role`
    fn has_role(&self, role: Role, address: &Address) -> bool;

    /// Whether mutating calls are disabled
    fn is_paused(&self) -> bool;

    /// Reject unless `address` holds `role`
    fn require_role(&self, role: Role, address: &Address) -> Result<()> {
        if self.has_role(role, address) {
            Ok(())
        } else {
            tracing::warn!(?role, caller = %address, "Rejected privileged call");
            Err(Error::Unauthorized(role))
        }
    }

    /// Reject while paused
    fn require_not_paused(&self) -> Result<()> {
        if self.is_paused() {
            Err(Error::Paused)
        } else {
            Ok(())
        }
    }
}

/// Role table held in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticRoles {
    /// Holders of each role
    members: BTreeMap<Role, BTreeSet<Address>>,

    /// Pause flag
    paused: bool,
}

impl StaticRoles {
    /// Create a role table with a single admin
    pub fn new(admin: impl Into<Address>) -> Self {
        let mut roles = Self::default();
        roles.insert(Role::Admin, admin.into());
        roles
    }

    /// Seed a role without an admin check (host bootstrap only)
    pub fn with_role(mut self, role: Role, address: impl Into<Address>) -> Self {
        self.insert(role, address.into());
        self
    }

    /// Grant `role` to `account`; `caller` must be an admin
    pub fn grant_role(&mut self, caller: &Address, role: Role, account: Address) -> Result<()> {
        self.require_role(Role::Admin, caller)?;
        tracing::info!(?role, account = %account, "Role granted");
        self.insert(role, account);
        Ok(())
    }

    /// Revoke `role` from `account`; `caller` must be an admin
    pub fn revoke_role(&mut self, caller: &Address, role: Role, account: &Address) -> Result<()> {
        self.require_role(Role::Admin, caller)?;
        if let Some(holders) = self.members.get_mut(&role) {
            holders.remove(account);
        }
        tracing::info!(?role, account = %account, "Role revoked");
        Ok(())
    }

    /// Disable mutating calls
    pub fn pause(&mut self, caller: &Address) -> Result<()> {
        self.require_role(Role::Admin, caller)?;
        self.paused = true;
        tracing::info!("Paused");
        Ok(())
    }

    /// Re-enable mutating calls
    pub fn unpause(&mut self, caller: &Address) -> Result<()> {
        self.require_role(Role::Admin, caller)?;
        self.paused = false;
        tracing::info!("Unpaused");
        Ok(())
    }

    fn insert(&mut self, role: Role, address: Address) {
        self.members.entry(role).or_default().insert(address);
    }
}

impl AccessControl for StaticRoles {
    fn has_role(&self, role: Role, address: &Address) -> bool {
        self.members
            .get(&role)
            .map(|holders| holders.contains(address))
            .unwrap_or(false)
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}
