//! Contract catalog: ABI + creation bytecode per deployable contract.
//!
//! Loaded from solc standard-JSON output
//! (`contracts.<file>.<Name>.{abi, evm.bytecode.object}`) or from a flat
//! `{ "<Name>": { "abi": [...], "bytecode": "0x..." } }` map.

use alloy::json_abi::JsonAbi;
use alloy::primitives::Bytes;
use anyhow::{anyhow, Context, Result};
use core_logic::BuildError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Self {
        Self {
            name: name.into(),
            abi,
            bytecode,
        }
    }

    /// Catalog key, also used to look up interaction strategies
    pub fn kind(&self) -> String {
        self.name.to_lowercase()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractCatalog {
    contracts: BTreeMap<String, ContractArtifact>,
}

impl ContractCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract artifacts {}", path.display()))?;
        let catalog = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse contract artifacts {}", path.display()))?;
        info!(
            "Loaded {} contracts from {}: {}",
            catalog.len(),
            path.display(),
            catalog.names().join(", ")
        );
        Ok(catalog)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)?;
        let mut catalog = Self::default();

        if let Some(files) = root.get("contracts").and_then(Value::as_object) {
            for (file, contracts) in files {
                let Some(contracts) = contracts.as_object() else {
                    continue;
                };
                for (name, entry) in contracts {
                    let bytecode = entry
                        .pointer("/evm/bytecode/object")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let artifact = parse_artifact(name, entry.get("abi"), bytecode)
                        .with_context(|| format!("{}:{}", file, name))?;
                    catalog.insert(artifact);
                }
            }
        } else if let Some(entries) = root.as_object() {
            for (name, entry) in entries {
                if !entry.is_object() {
                    continue;
                }
                let bytecode = entry
                    .get("bytecode")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let artifact = parse_artifact(name, entry.get("abi"), bytecode)
                    .with_context(|| name.clone())?;
                catalog.insert(artifact);
            }
        } else {
            return Err(anyhow!("expected a JSON object"));
        }

        Ok(catalog)
    }

    pub fn insert(&mut self, artifact: ContractArtifact) {
        debug!(
            "Catalog entry {} ({} bytes of bytecode)",
            artifact.name,
            artifact.bytecode.len()
        );
        self.contracts.insert(artifact.kind(), artifact);
    }

    pub fn get(&self, name: &str) -> Result<&ContractArtifact, BuildError> {
        self.contracts
            .get(&name.to_lowercase())
            .ok_or_else(|| BuildError::UnknownContract {
                name: name.to_string(),
            })
    }

    /// Names of contracts that can actually be deployed
    pub fn deployable(&self) -> Vec<String> {
        self.contracts
            .values()
            .filter(|a| !a.bytecode.is_empty())
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.contracts.values().map(|a| a.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

fn parse_artifact(name: &str, abi: Option<&Value>, bytecode: &str) -> Result<ContractArtifact> {
    let abi: JsonAbi = match abi {
        Some(value) => serde_json::from_value(value.clone()).context("invalid ABI")?,
        None => JsonAbi::default(),
    };
    let hex_str = bytecode.trim().trim_start_matches("0x");
    let bytecode = hex::decode(hex_str).context("bytecode is not valid hex")?;
    Ok(ContractArtifact::new(name, abi, Bytes::from(bytecode)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDARD_JSON: &str = r#"{
        "contracts": {
            "Greeter.sol": {
                "Greeter": {
                    "abi": [
                        {"type":"constructor","inputs":[{"name":"g","type":"string"}],"stateMutability":"nonpayable"},
                        {"type":"function","name":"setGreeting","inputs":[{"name":"g","type":"string"}],"outputs":[],"stateMutability":"nonpayable"}
                    ],
                    "evm": {"bytecode": {"object": "6080604052"}}
                },
                "IGreeter": {
                    "abi": [],
                    "evm": {"bytecode": {"object": ""}}
                }
            }
        }
    }"#;

    #[test]
    fn test_standard_json() {
        let catalog = ContractCatalog::from_json_str(STANDARD_JSON).unwrap();
        assert_eq!(catalog.len(), 2);

        let greeter = catalog.get("greeter").unwrap();
        assert_eq!(greeter.name, "Greeter");
        assert_eq!(greeter.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
        assert!(greeter.abi.constructor().is_some());
        assert_eq!(catalog.deployable(), vec!["Greeter".to_string()]);
    }

    #[test]
    fn test_flat_map_and_unknown_contract() {
        let catalog =
            ContractCatalog::from_json_str(r#"{"Counter": {"abi": [], "bytecode": "0x00"}}"#)
                .unwrap();
        assert!(catalog.get("Counter").is_ok());
        assert_eq!(
            catalog.get("Missing").unwrap_err(),
            BuildError::UnknownContract {
                name: "Missing".into()
            }
        );
    }
}
