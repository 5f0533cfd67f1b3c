//! Configuration for the host node

use dlp_core::{Address, Amount, Config as EngineConfig, InMemoryVault, Role, StaticRoles};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID
    pub node_id: String,

    /// Engine parameters
    pub engine: EngineConfig,

    /// Role assignments
    pub roles: RolesConfig,

    /// Initial vault state
    pub genesis: GenesisConfig,

    /// Snapshot file, restored on start and written on shutdown
    pub snapshot_path: Option<PathBuf>,
}

/// Role assignments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Admin address
    pub admin: Address,

    /// Maintainer addresses
    pub maintainers: Vec<Address>,

    /// Manager (score oracle) addresses
    pub managers: Vec<Address>,
}

/// Initial vault state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Account balances
    pub balances: BTreeMap<Address, Amount>,

    /// Reward reserve held by the engine
    pub reward_reserve: Amount,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            admin: Address::new("admin"),
            maintainers: vec![],
            managers: vec![],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            engine: EngineConfig::default(),
            roles: RolesConfig::default(),
            genesis: GenesisConfig::default(),
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            engine: EngineConfig::from_env()?,
            ..Config::default()
        };

        if let Ok(node_id) = std::env::var("DLP_NODE_ID") {
            config.node_id = node_id;
        }

        if let Ok(admin) = std::env::var("DLP_ADMIN") {
            config.roles.admin = Address::new(admin);
        }

        if let Ok(maintainers) = std::env::var("DLP_MAINTAINERS") {
            config.roles.maintainers = address_list(&maintainers);
        }

        if let Ok(managers) = std::env::var("DLP_MANAGERS") {
            config.roles.managers = address_list(&managers);
        }

        if let Ok(path) = std::env::var("DLP_SNAPSHOT_PATH") {
            config.snapshot_path = Some(PathBuf::from(path));
        }

        if let Ok(reserve) = std::env::var("DLP_REWARD_RESERVE") {
            config.genesis.reward_reserve = reserve
                .parse::<Decimal>()
                .map_err(|e| crate::Error::Config(format!("DLP_REWARD_RESERVE: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.engine.validate()?;

        if self.roles.admin.is_zero() {
            return Err(crate::Error::Config("admin address must be set".to_string()));
        }

        if self.genesis.reward_reserve < Decimal::ZERO {
            return Err(crate::Error::Config("reward reserve must not be negative".to_string()));
        }

        if let Some((account, _)) = self
            .genesis
            .balances
            .iter()
            .find(|(_, balance)| **balance < Decimal::ZERO)
        {
            return Err(crate::Error::Config(format!("negative genesis balance for {}", account)));
        }

        Ok(())
    }

    /// Role table seeded from the configured assignments
    pub fn roles(&self) -> StaticRoles {
        let roles = StaticRoles::new(self.roles.admin.clone());
        let roles = self
            .roles
            .maintainers
            .iter()
            .fold(roles, |roles, address| roles.with_role(Role::Maintainer, address.clone()));
        self.roles
            .managers
            .iter()
            .fold(roles, |roles, address| roles.with_role(Role::Manager, address.clone()))
    }

    /// Vault seeded with the genesis balances and reserve
    pub fn vault(&self) -> InMemoryVault {
        let mut vault = InMemoryVault::new();
        for (account, balance) in &self.genesis.balances {
            vault.deposit(account.clone(), *balance);
        }
        vault.fund_reserve(self.genesis.reward_reserve);
        vault
    }
}

fn address_list(raw: &str) -> Vec<Address> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(Address::new)
        .collect()
}
