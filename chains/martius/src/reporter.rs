//! Result Reporter
//!
//! Every terminal [`TxResult`] goes through [`ResultReporter::report`]: one
//! `task_result` log line for the operator, the run tally, and any attached
//! sinks (the deployment store).

use crate::builder::{IntentTarget, TxIntent};
use crate::submission::{SubmissionEvent, SubmissionObserver, TxResult};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use core_logic::{ChainConfig, FailureClass, RunTally, RESULT_TARGET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MESSAGE_LIMIT: usize = 125;

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, intent: &TxIntent, result: &TxResult) -> Result<()>;
}

pub struct ResultReporter {
    tally: Arc<RunTally>,
    chain: ChainConfig,
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl ResultReporter {
    pub fn new(tally: Arc<RunTally>, chain: ChainConfig) -> Self {
        Self {
            tally,
            chain,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn tally(&self) -> &Arc<RunTally> {
        &self.tally
    }

    pub async fn report(&self, intent: &TxIntent, result: &TxResult, elapsed: Duration) {
        self.tally.record_action(
            intent.kind(),
            elapsed,
            result.success,
            result.classification,
        );

        let link = result
            .tx_hash
            .and_then(|hash| self.chain.tx_link(&hash.to_string()))
            .map(|l| format!(" {}", l))
            .unwrap_or_default();

        if result.success {
            let detail = match (result.contract_address, result.block_number) {
                (Some(addr), Some(block)) => {
                    format!("at {} (B: {})", addr.to_checksum(None), block)
                }
                (None, Some(block)) => format!("(B: {})", block),
                _ => String::new(),
            };
            info!(
                target: RESULT_TARGET,
                "SUCCESS [{}] {} {} in {:.1}s{}",
                intent.kind(),
                intent,
                detail,
                elapsed.as_secs_f64(),
                link
            );
        } else {
            let word = if result.classification == Some(FailureClass::Reverted) {
                "REVERTED"
            } else {
                "FAILED"
            };
            warn!(
                target: RESULT_TARGET,
                "{} [{}] {} <{}> {} after {} attempt(s) in {:.1}s{}",
                word,
                intent.kind(),
                intent,
                result.classification_label(),
                clip(&result.message),
                result.attempts,
                elapsed.as_secs_f64(),
                link
            );
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(intent, result).await {
                warn!("Result sink failed: {:#}", e);
            }
        }
    }
}

impl SubmissionObserver for ResultReporter {
    fn on_event(&self, event: &SubmissionEvent) {
        if let SubmissionEvent::Broadcast { .. } = event {
            self.tally.record_broadcast();
        }
    }
}

fn clip(message: &str) -> String {
    let flat = message.replace('\n', " | ");
    if flat.chars().count() > MESSAGE_LIMIT {
        let truncated: String = flat.chars().take(MESSAGE_LIMIT - 3).collect();
        format!("{}...", truncated)
    } else {
        flat
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub address: String,
    pub tx_hash: String,
    pub deployed_at: String,
}

/// `deployed_contracts.json`: deployments keyed by checksummed wallet address.
pub struct DeploymentStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Vec<DeploymentRecord>>>,
}

impl DeploymentStore {
    /// Loads existing records; a missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub async fn deployments_for(&self, wallet: Address) -> Vec<DeploymentRecord> {
        self.records
            .lock()
            .await
            .get(&wallet.to_checksum(None))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn total(&self) -> usize {
        self.records.lock().await.values().map(Vec::len).sum()
    }

    pub async fn insert(&self, wallet: Address, record: DeploymentRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records
            .entry(wallet.to_checksum(None))
            .or_default()
            .push(record);

        let json = serde_json::to_string_pretty(&*records)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for DeploymentStore {
    async fn record(&self, intent: &TxIntent, result: &TxResult) -> Result<()> {
        let IntentTarget::Deploy { contract } = &intent.target else {
            return Ok(());
        };
        if !result.success {
            return Ok(());
        }
        let (Some(address), Some(hash)) = (result.contract_address, result.tx_hash) else {
            warn!("Deployment of {} confirmed without a contract address", contract);
            return Ok(());
        };

        let record = DeploymentRecord {
            kind: contract.to_lowercase(),
            name: contract.clone(),
            address: address.to_checksum(None),
            tx_hash: hash.to_string(),
            deployed_at: Utc::now().to_rfc3339(),
        };
        debug!("Storing deployment {} at {}", contract, record.address);
        self.insert(intent.from, record).await
    }
}
