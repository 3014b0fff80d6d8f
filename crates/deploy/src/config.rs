//! Project configuration: networks, named accounts and the unit manifest.
//!
//! The configuration lives in a `Contrail.toml` file:
//!
//! ```toml
//! artifacts = "artifacts"
//! deployments = "deployments"
//!
//! [named_accounts]
//! deployer = 0
//! agent = "0x1111111111111111111111111111111111111111"
//!
//! [networks.localhost]
//! url = "http://127.0.0.1:8545/"
//! timeout_secs = 120
//!
//! [[units]]
//! name = "Controller"
//! args = [{ account = "deployer" }]
//! ```
//!
//! Any value can be overridden from the environment with the `CONTRAIL_` prefix,
//! using `__` to reach nested keys (e.g. `CONTRAIL_NAMED_ACCOUNTS__AGENT=0x...`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Arg, Unit, UnitRegistry};

/// The default name for the project configuration file.
pub const CONFIG_FILENAME: &str = "Contrail.toml";

/// Prefix of environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "CONTRAIL_";

/// Default confirmation timeout per unit, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default receipt polling interval, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

fn default_artifacts() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_deployments() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// A named account: an index into the node's account list, or a literal address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamedAccount {
    Index(usize),
    Address(Address),
}

/// Connection and timing parameters of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of the node.
    pub url: Url,
    /// Expected chain ID. Checked against the node before anything is submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// How long to wait for each transaction to be confirmed.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fixed gas limit. The node estimates gas when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Overrides of the project-wide named accounts for this network.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_accounts: BTreeMap<String, NamedAccount>,
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Method invocation part of a call unit in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    pub target: String,
    pub method: String,
}

/// One `[[units]]` entry of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    /// Interface to deploy. Defaults to the unit name. Not allowed on call units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Makes this a call unit instead of a deploy unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallSpec>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub args: Vec<Arg>,
}

impl UnitSpec {
    pub fn into_unit(self) -> Result<Unit> {
        let unit = match (self.call, self.contract) {
            (Some(_), Some(contract)) => anyhow::bail!(
                "Unit {} declares both a call and a contract ({})",
                self.name,
                contract
            ),
            (Some(call), None) => Unit::call(self.name, call.target, call.method),
            (None, Some(contract)) => Unit::deploy(self.name).contract(contract),
            (None, None) => Unit::deploy(self.name),
        };

        let unit = self
            .tags
            .into_iter()
            .fold(unit, |unit, tag| unit.tag(tag));
        let unit = self
            .dependencies
            .into_iter()
            .fold(unit, |unit, dep| unit.depends_on(dep));
        Ok(unit.args(self.args))
    }
}

/// The whole project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory of compiled contract artifacts.
    #[serde(default = "default_artifacts")]
    pub artifacts: PathBuf,
    /// Directory where deployment records are persisted.
    #[serde(default = "default_deployments")]
    pub deployments: PathBuf,
    /// Record successful calls so that later runs skip them.
    #[serde(default)]
    pub track_calls: bool,
    #[serde(default)]
    pub named_accounts: BTreeMap<String, NamedAccount>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

impl ProjectConfig {
    /// Load the configuration from a file (or a directory containing
    /// [`CONFIG_FILENAME`]), merged with `CONTRAIL_` environment variables.
    ///
    /// Relative `artifacts` and `deployments` paths are resolved against the
    /// directory of the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let mut config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!("Failed to load configuration from {}", config_path.display()))?;

        if let Some(base) = config_path.parent() {
            config.artifacts = base.join(&config.artifacts);
            config.deployments = base.join(&config.deployments);
        }

        tracing::info!(
            path = %config_path.display(),
            networks = config.networks.len(),
            units = config.units.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse a configuration document without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration as TOML")
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            format!(
                "Unknown network {} (configured: {})",
                name,
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    /// Build the unit registry from the manifest, in declaration order.
    pub fn registry(&self) -> Result<UnitRegistry> {
        let mut registry = UnitRegistry::new();
        for spec in &self.units {
            let unit = spec.clone().into_unit()?;
            registry.register(unit).context("Invalid unit manifest")?;
        }
        Ok(registry)
    }

    /// Named accounts for `network`: project-wide entries overridden by the
    /// network's own.
    pub fn named_accounts_for(&self, network: &str) -> Result<BTreeMap<String, NamedAccount>> {
        let mut accounts = self.named_accounts.clone();
        accounts.extend(self.network(network)?.named_accounts.clone());
        Ok(accounts)
    }
}

/// Turn named accounts into addresses using the accounts the node exposes.
pub fn resolve_named_accounts(
    named: &BTreeMap<String, NamedAccount>,
    available: &[Address],
) -> Result<BTreeMap<String, Address>> {
    named
        .iter()
        .map(|(name, account)| {
            let address = match account {
                NamedAccount::Address(address) => *address,
                NamedAccount::Index(idx) => *available.get(*idx).with_context(|| {
                    format!(
                        "Named account {} refers to account #{} but the node exposes {} accounts",
                        name,
                        idx,
                        available.len()
                    )
                })?,
            };
            Ok((name.clone(), address))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResolveError, UnitAction};
    use tempdir::TempDir;

    const CONFIG: &str = r#"
        track_calls = true

        [named_accounts]
        deployer = 0
        agent = 1

        [networks.localhost]
        url = "http://127.0.0.1:8545/"

        [networks.rinkeby]
        url = "https://rinkeby.infura.io/v3/key"
        chain_id = 4
        timeout_secs = 240
        named_accounts = { agent = "0x1111111111111111111111111111111111111111" }

        [[units]]
        name = "Controller"
        tags = ["Controller"]
        args = [{ account = "deployer" }]

        [[units]]
        name = "ASTOStorage"
        contract = "StakingStorage"
        args = [{ unit = "Controller" }]

        [[units]]
        name = "ControllerInit"
        call = { target = "Controller", method = "init" }
        dependencies = ["ASTOStorage"]
        args = [{ unit = "ASTOStorage" }]
    "#;

    #[test]
    fn test_parse_config() {
        let config = ProjectConfig::from_toml(CONFIG).unwrap();

        assert!(config.track_calls);
        assert_eq!(config.artifacts, PathBuf::from("artifacts"));

        let localhost = config.network("localhost").unwrap();
        assert_eq!(localhost.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(localhost.chain_id, None);

        let rinkeby = config.network("rinkeby").unwrap();
        assert_eq!(rinkeby.chain_id, Some(4));
        assert_eq!(rinkeby.timeout(), Duration::from_secs(240));

        assert!(config.network("mainnet").is_err());
    }

    #[test]
    fn test_registry_from_manifest() {
        let config = ProjectConfig::from_toml(CONFIG).unwrap();
        let registry = config.registry().unwrap();

        assert_eq!(registry.len(), 3);
        match &registry.get("ASTOStorage").unwrap().action {
            UnitAction::Deploy { contract, args } => {
                assert_eq!(contract.contract_name, "StakingStorage");
                assert_eq!(args, &vec![Arg::unit("Controller")]);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert!(!registry.get("ControllerInit").unwrap().is_deploy());
    }

    #[test]
    fn test_call_with_contract_rejected() {
        let spec = UnitSpec {
            name: "Init".to_string(),
            contract: Some("Controller".to_string()),
            call: Some(CallSpec {
                target: "Controller".to_string(),
                method: "init".to_string(),
            }),
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            args: Vec::new(),
        };
        assert!(spec.into_unit().is_err());
    }

    #[test]
    fn test_duplicate_unit_in_manifest() {
        let config = ProjectConfig::from_toml(
            r#"
            [[units]]
            name = "Staking"
            [[units]]
            name = "Staking"
            "#,
        )
        .unwrap();

        let err = config.registry().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ResolveError>(),
            Some(&ResolveError::DuplicateName("Staking".to_string()))
        );
    }

    #[test]
    fn test_named_accounts_with_network_override() {
        let config = ProjectConfig::from_toml(CONFIG).unwrap();
        let node_accounts = vec![Address::with_last_byte(0xa), Address::with_last_byte(0xb)];

        let local = resolve_named_accounts(&config.named_accounts_for("localhost").unwrap(), &node_accounts)
            .unwrap();
        assert_eq!(local["deployer"], Address::with_last_byte(0xa));
        assert_eq!(local["agent"], Address::with_last_byte(0xb));

        let rinkeby = resolve_named_accounts(&config.named_accounts_for("rinkeby").unwrap(), &node_accounts)
            .unwrap();
        assert_eq!(rinkeby["agent"], Address::repeat_byte(0x11));
    }

    #[test]
    fn test_named_account_index_out_of_range() {
        let named = BTreeMap::from([("deployer".to_string(), NamedAccount::Index(3))]);
        assert!(resolve_named_accounts(&named, &[Address::ZERO]).is_err());
    }

    #[test]
    fn test_load_resolves_paths_against_config_dir() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join(CONFIG_FILENAME), CONFIG).unwrap();

        let config = ProjectConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.artifacts, temp_dir.path().join("artifacts"));
        assert_eq!(config.deployments, temp_dir.path().join("deployments"));
        assert_eq!(config.units.len(), 3);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new("contrail-test").expect("Failed to create temp dir");
        assert!(ProjectConfig::load(&temp_dir.path().join("nope.toml")).is_err());
    }
}
