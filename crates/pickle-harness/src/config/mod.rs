use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::{address, Address, B256};
use serde::{Deserialize, Serialize};

use crate::keystore::KeyManagerConfig;

/// Environment variable that overrides `network.rpc_endpoint`
pub const RPC_URL_ENV: &str = "HARNESS_RPC_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub global: GlobalConfig,
    pub network: NetworkConfig,
    pub artifacts: ArtifactConfig,
    pub deployment: DeploymentConfig,
    pub vault: VaultConfig,
    pub keystore: KeyManagerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log level for the harness
    pub log_level: String,
    /// Maximum number of retries for transport failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// How long to wait for a transaction receipt
    pub tx_timeout_secs: u64,
    /// Receipt polling interval
    pub receipt_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of the node (usually a local mainnet fork)
    pub rpc_endpoint: String,
    /// Expected chain id; checked before anything is sent
    pub chain_id: Option<u64>,
    /// Fork node to spawn when nothing answers on `rpc_endpoint`
    pub node: Option<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub startup_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Hardhat `artifacts/` (or foundry `out/`) directory
    pub dir: PathBuf,
    /// Use placeholder bytecode (simulated chain only)
    #[serde(default)]
    pub placeholder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeployStep {
    /// Deploy the PickleToken
    Token,
    /// Deploy the MasterChef
    Masterchef,
    /// Grant the admin role on the token to the MasterChef
    Handover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Node account index used to deploy
    pub deployer_index: usize,
    /// Steps executed by `harness deploy` when none are given on the command line
    pub steps: Vec<DeployStep>,
    pub token: TokenDeployConfig,
    pub masterchef: MasterChefDeployConfig,
    pub handover: HandoverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDeployConfig {
    pub artifact: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub child_chain_manager: Address,
    pub minter: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterChefDeployConfig {
    pub artifact: String,
    /// Reward token; the freshly deployed token is used when the token step ran first
    pub pickle: Address,
    pub devaddr: Address,
    pub pickle_per_block: u64,
    pub start_block: u64,
    pub bonus_end_block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverConfig {
    pub artifact: String,
    pub pickle: Address,
    pub masterchef: Address,
    pub role: B256,
    /// Keystore id (or env suffix) of the current admin's private key
    pub admin_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Underlying asset deposited into the jar (alUSD3CRV)
    pub want: Address,
    pub want_decimals: u8,
    /// Reward token distributed on withdrawal (ALCX)
    pub reward_token: Address,
    /// Holder impersonated to fund participants
    pub whale: Address,
    /// Share of harvested ALCX kept by the strategy, in basis points of 10_000
    pub keep_alcx: u64,
    pub controller_artifact: String,
    pub strategy_artifact: String,
    pub jar_artifact: String,
    /// Attach to these instead of deploying
    #[serde(default)]
    pub existing: ExistingContracts,
    pub roles: RoleAccounts,
    /// Time advanced before each harvest call of a harvest cycle
    #[serde(with = "durations")]
    pub harvest_windows: Vec<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExistingContracts {
    pub controller: Option<Address>,
    pub strategy: Option<Address>,
    pub jar: Option<Address>,
}

/// Node account indices for the administrative roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAccounts {
    /// Governance, strategist and timelock
    pub governance: usize,
    pub devfund: usize,
    pub treasury: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Print the prometheus exposition at the end of a run
    pub enabled: bool,
}

impl HarnessConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HarnessConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.is_empty() {
                self.network.rpc_endpoint = url;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.vault.keep_alcx > 10_000 {
            anyhow::bail!("vault.keep_alcx must be at most 10000 basis points");
        }
        if self.vault.harvest_windows.is_empty() {
            anyhow::bail!("vault.harvest_windows needs at least one window");
        }
        if self.vault.harvest_windows.iter().any(|window| window.subsec_nanos() != 0) {
            anyhow::bail!("vault.harvest_windows must be whole seconds");
        }
        if self.deployment.steps.is_empty() {
            anyhow::bail!("deployment.steps must name at least one step");
        }
        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        const DAY: u64 = 60 * 60 * 24;

        Self {
            global: GlobalConfig {
                log_level: "info".to_string(),
                max_retries: 3,
                retry_delay_ms: 500,
                tx_timeout_secs: 120,
                receipt_poll_interval_ms: 250,
            },
            network: NetworkConfig {
                rpc_endpoint: "http://127.0.0.1:8545".to_string(),
                chain_id: None,
                node: None,
            },
            artifacts: ArtifactConfig {
                dir: PathBuf::from("artifacts"),
                placeholder: false,
            },
            deployment: DeploymentConfig {
                deployer_index: 0,
                steps: vec![DeployStep::Handover],
                token: TokenDeployConfig {
                    artifact: "src/polygon/pickle-token.sol:PickleToken".to_string(),
                    name: "PickleToken".to_string(),
                    symbol: "PICKLE".to_string(),
                    decimals: 18,
                    child_chain_manager: address!("195fe6EE6639665CCeB15BCCeB9980FC445DFa0B"),
                    minter: address!("aCfE4511CE883C14c4eA40563F176C3C09b4c47C"),
                },
                masterchef: MasterChefDeployConfig {
                    artifact: "src/polygon/masterchef.sol:MasterChef".to_string(),
                    pickle: address!("835804CC589E07FBbbCE7B8c830F219Dac407F63"),
                    devaddr: address!("aCfE4511CE883C14c4eA40563F176C3C09b4c47C"),
                    pickle_per_block: 1_000_000_000_000,
                    start_block: 13_560_000,
                    bonus_end_block: 0,
                },
                handover: HandoverConfig {
                    artifact: "src/polygon/pickle-token.sol:PickleToken".to_string(),
                    pickle: address!("835804CC589E07FBbbCE7B8c830F219Dac407F63"),
                    masterchef: address!("52076435D07DDa4c43dD87E76B624c5D0ce4B01D"),
                    role: B256::ZERO,
                    admin_key: "prev-admin".to_string(),
                },
            },
            vault: VaultConfig {
                want: address!("43b4FdFD4Ff969587185cDB6f0BD875c5Fc83f8c"),
                want_decimals: 18,
                reward_token: address!("dbdb4d16eda451d0503b854cf79d55697f90c8df"),
                whale: address!("BAF18722C137E725327F1376329d3c99F26f6A60"),
                keep_alcx: 2000,
                controller_artifact: "ControllerV4".to_string(),
                strategy_artifact: "StrategyCurveAlusd3Crv".to_string(),
                jar_artifact: "PickleJarSymbiotic".to_string(),
                existing: ExistingContracts::default(),
                roles: RoleAccounts {
                    governance: 0,
                    devfund: 1,
                    treasury: 2,
                },
                harvest_windows: vec![Duration::from_secs(15 * DAY), Duration::from_secs(15 * DAY)],
            },
            keystore: KeyManagerConfig::default(),
            metrics: MetricsConfig { enabled: true },
        }
    }
}

/// Human-readable durations ("15days", "7d 12h") for serde
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Lists of human-readable durations
pub mod durations {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(values: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            values
                .iter()
                .map(|value| humantime::format_duration(*value).to_string()),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .map(|text| humantime::parse_duration(text).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reproduces_script_literals() {
        let config = HarnessConfig::default();
        assert_eq!(config.deployment.masterchef.pickle_per_block, 1_000_000_000_000);
        assert_eq!(config.deployment.masterchef.start_block, 13_560_000);
        assert_eq!(config.deployment.steps, vec![DeployStep::Handover]);
        assert_eq!(config.deployment.handover.role, B256::ZERO);
        assert_eq!(config.vault.keep_alcx, 2000);
        assert_eq!(config.vault.harvest_windows.len(), 2);
        assert_eq!(config.vault.harvest_windows[0], Duration::from_secs(1_296_000));
    }

    #[test]
    fn test_toml_round_trip_keeps_durations_readable() {
        let config = HarnessConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("15days"));

        let parsed: HarnessConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.vault.harvest_windows, config.vault.harvest_windows);
        assert_eq!(parsed.vault.whale, config.vault.whale);
    }

    #[test]
    fn test_validation_rejects_bad_keep() {
        let mut config = HarnessConfig::default();
        config.vault.keep_alcx = 20_000;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.vault.harvest_windows.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        HarnessConfig::default().save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.vault.want, HarnessConfig::default().vault.want);
    }
}
