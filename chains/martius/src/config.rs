//! Configuration loader for martius-bot

use anyhow::{Context, Result};
use core_logic::{ChainConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Env var that overrides `[chain].rpc_url`
pub const RPC_URL_ENV: &str = "MARTIUS_RPC_URL";

/// Upper bound for `[proxy].max_probes`
pub const MAX_PROXY_PROBES: usize = 50;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MartiusConfig {
    pub chain: ChainSection,
    pub files: FilesSection,
    pub proxy: ProxySection,
    pub submission: SubmissionSection,
    pub gas: GasSection,
    pub plan: PlanSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainSection {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub currency: String,
    pub explorer: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            name: "Martius Testnet".to_string(),
            chain_id: 121214,
            rpc_url: "https://martius-ii.testnet.romeprotocol.xyz".to_string(),
            currency: "rSOL".to_string(),
            explorer: Some("https://romescout-martius-i.testnet.romeprotocol.xyz".to_string()),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilesSection {
    pub accounts: String,
    pub proxies: String,
    /// solc standard-JSON output holding ABI + bytecode per contract
    pub artifacts: String,
    pub deployments: String,
    /// Optional list of transfer recipients, one address per line
    pub recipients: Option<String>,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            accounts: "accounts.txt".to_string(),
            proxies: "proxy.txt".to_string(),
            artifacts: "config/artifacts.json".to_string(),
            deployments: "deployed_contracts.json".to_string(),
            recipients: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySection {
    pub enabled: bool,
    pub test_url: String,
    pub probe_timeout_ms: u64,
    /// Remote plain-text proxy lists used when the local pool is exhausted
    pub online_sources: Vec<String>,
    pub max_probes: usize,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            enabled: true,
            test_url: "http://httpbin.org/ip".to_string(),
            probe_timeout_ms: 8_000,
            online_sources: vec![
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt"
                    .to_string(),
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt"
                    .to_string(),
            ],
            max_probes: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    Bounded,
    Persistent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionSection {
    pub mode: ModeSetting,
    pub max_attempts: u32,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub backoff_step_ms: u64,
    pub backoff_cap_ms: u64,
    pub nonce_race_delay_ms: u64,
    pub transport_delay_ms: u64,
    pub balance_poll_ms: u64,
    /// Native units kept aside for gas when checking balance before a broadcast
    pub gas_buffer: f64,
}

impl Default for SubmissionSection {
    fn default() -> Self {
        Self {
            mode: ModeSetting::Bounded,
            max_attempts: 5,
            receipt_timeout_secs: 120,
            receipt_poll_ms: 2_000,
            backoff_step_ms: 2_000,
            backoff_cap_ms: 30_000,
            nonce_race_delay_ms: 1_500,
            transport_delay_ms: 1_000,
            balance_poll_ms: 15_000,
            gas_buffer: 0.005,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasSection {
    pub deploy_limit: u64,
    pub call_limit: u64,
    pub transfer_limit: u64,
    pub safety_margin: f64,
}

impl Default for GasSection {
    fn default() -> Self {
        Self {
            deploy_limit: 500_000,
            call_limit: 200_000,
            transfer_limit: 21_000,
            safety_margin: 1.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanSection {
    /// Contract names to deploy, cycled per account; empty means every catalog entry
    pub contracts: Vec<String>,
    pub deployments_per_account: u32,
    pub interactions_per_contract: u32,
    pub transfers_per_account: u32,
    pub transfer_min: f64,
    pub transfer_max: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Concurrent account workers; 0 means one per account
    pub workers: usize,
}

impl Default for PlanSection {
    fn default() -> Self {
        Self {
            contracts: Vec::new(),
            deployments_per_account: 2,
            interactions_per_contract: 2,
            transfers_per_account: 3,
            transfer_min: 0.0001,
            transfer_max: 0.001,
            min_delay_ms: 3_000,
            max_delay_ms: 10_000,
            workers: 0,
        }
    }
}

fn read_error(path: &Path, e: std::io::Error) -> ConfigError {
    let path = path.display().to_string();
    if e.kind() == std::io::ErrorKind::NotFound {
        ConfigError::FileNotFound { path }
    } else {
        ConfigError::IoError {
            path,
            msg: e.to_string(),
        }
    }
}

impl MartiusConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```ignore
    /// let config = MartiusConfig::from_path("config/martius.toml")?;
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
        let mut config: Self = toml::from_str(&content).context("Failed to parse config TOML")?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                self.chain.rpc_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.chain.rpc_url).is_err() {
            return Err(ConfigError::InvalidRpcUrl {
                url: self.chain.rpc_url.clone(),
            });
        }
        if self.submission.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.gas.safety_margin < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "gas.safety_margin".into(),
                reason: "must be >= 1.0".into(),
            });
        }
        if self.plan.transfer_min < 0.0 || self.plan.transfer_max < self.plan.transfer_min {
            return Err(ConfigError::InvalidValue {
                field: "plan.transfer_min/transfer_max".into(),
                reason: "expected 0 <= min <= max".into(),
            });
        }
        if self.proxy.max_probes == 0 || self.proxy.max_probes > MAX_PROXY_PROBES {
            return Err(ConfigError::InvalidValue {
                field: "proxy.max_probes".into(),
                reason: format!("expected 1..={}", MAX_PROXY_PROBES),
            });
        }
        if self.submission.gas_buffer < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.gas_buffer".into(),
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            name: self.chain.name.clone(),
            rpc_endpoint: self.chain.rpc_url.clone(),
            chain_id: self.chain.chain_id,
            currency: self.chain.currency.clone(),
            explorer: self.chain.explorer.clone(),
        }
    }
}
