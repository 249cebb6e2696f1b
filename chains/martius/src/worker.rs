use crate::account::Account;
use crate::builder::{to_wei, TxIntent};
use crate::config::PlanSection;
use crate::interactions::random_address;
use crate::reporter::{DeploymentStore, ResultReporter};
use crate::submission::{SubmissionEngine, TxResult};
use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use core_logic::{random_delay, FailureClass, Worker, WorkerStats};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one account does in a run: deploy, then interact with what it
/// deployed (this run and earlier ones), then send transfers.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub contracts: Vec<String>,
    pub deployments: u32,
    pub interactions_per_contract: u32,
    pub transfers: u32,
    pub transfer_min: f64,
    pub transfer_max: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ActionPlan {
    /// `deployable` fills in when the section names no contracts.
    pub fn from_section(section: &PlanSection, deployable: Vec<String>) -> Self {
        let contracts = if section.contracts.is_empty() {
            deployable
        } else {
            section.contracts.clone()
        };
        Self {
            contracts,
            deployments: section.deployments_per_account,
            interactions_per_contract: section.interactions_per_contract,
            transfers: section.transfers_per_account,
            transfer_min: section.transfer_min,
            transfer_max: section.transfer_max,
            min_delay_ms: section.min_delay_ms,
            max_delay_ms: section.max_delay_ms,
        }
    }

    fn transfer_amount(&self) -> f64 {
        let (lo, hi) = if self.transfer_min <= self.transfer_max {
            (self.transfer_min, self.transfer_max)
        } else {
            (self.transfer_max, self.transfer_min)
        };
        if lo == hi {
            return lo;
        }
        rand::thread_rng().gen_range(lo..=hi)
    }
}

pub struct AccountWorker {
    index: usize,
    account: Account,
    engine: Arc<SubmissionEngine>,
    reporter: Arc<ResultReporter>,
    plan: Arc<ActionPlan>,
    recipients: Arc<Vec<Address>>,
    slots: Option<Arc<Semaphore>>,
    store: Option<Arc<DeploymentStore>>,
}

enum Step {
    Continue(TxResult),
    Stop,
}

impl AccountWorker {
    pub fn new(
        index: usize,
        account: Account,
        engine: Arc<SubmissionEngine>,
        reporter: Arc<ResultReporter>,
        plan: Arc<ActionPlan>,
        recipients: Arc<Vec<Address>>,
    ) -> Self {
        Self {
            index,
            account,
            engine,
            reporter,
            plan,
            recipients,
            slots: None,
            store: None,
        }
    }

    /// Caps how many account plans run at once.
    pub fn with_slots(mut self, slots: Arc<Semaphore>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Deployments recorded by earlier runs become interaction targets too.
    pub fn with_store(mut self, store: Arc<DeploymentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Appends stored deployments for this account, skipping known addresses.
    async fn add_stored(&self, deployed: &mut Vec<(String, Address)>) {
        let Some(store) = &self.store else {
            return;
        };
        for record in store.deployments_for(self.account.address()).await {
            let Ok(address) = record.address.parse::<Address>() else {
                warn!("Skipping stored {} with bad address {}", record.name, record.address);
                continue;
            };
            if deployed.iter().all(|(_, known)| *known != address) {
                deployed.push((record.name, address));
            }
        }
    }

    async fn execute(&self, intent: TxIntent, token: &CancellationToken) -> Step {
        let started = Instant::now();
        let result = self.engine.submit(&self.account, &intent, token).await;
        self.reporter.report(&intent, &result, started.elapsed()).await;

        if result.classification == Some(FailureClass::Cancelled) {
            return Step::Stop;
        }
        Step::Continue(result)
    }

    /// Pauses between actions, runs one and records it. `None` means stop.
    async fn step(
        &self,
        intent: TxIntent,
        token: &CancellationToken,
        first: &mut bool,
        stats: &mut WorkerStats,
    ) -> Option<TxResult> {
        if !std::mem::take(first) && !self.pause(token).await {
            return None;
        }
        match self.execute(intent, token).await {
            Step::Stop => None,
            Step::Continue(result) => {
                stats.record(result.success);
                Some(result)
            }
        }
    }

    /// False when cancelled during the pause.
    async fn pause(&self, token: &CancellationToken) -> bool {
        let delay = random_delay(self.plan.min_delay_ms, self.plan.max_delay_ms);
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn pick_recipient(&self) -> Address {
        self.recipients
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_else(random_address)
    }

    /// Registered interactions that the deployed artifact actually exposes.
    fn callable_functions(&self, contract: &str) -> Vec<String> {
        let builder = self.engine.builder();
        let Ok(artifact) = builder.catalog().get(contract) else {
            return Vec::new();
        };
        builder
            .registry()
            .functions_for(&artifact.kind())
            .into_iter()
            .filter(|f| artifact.abi.function(f).is_some())
            .collect()
    }
}

#[async_trait]
impl Worker for AccountWorker {
    fn label(&self) -> String {
        self.account.short()
    }

    async fn start(&self, token: CancellationToken) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        let _permit = match &self.slots {
            Some(slots) => tokio::select! {
                _ = token.cancelled() => return Ok(stats),
                permit = slots.clone().acquire_owned() => Some(permit?),
            },
            None => None,
        };
        let from = self.account.address();
        let mut deployed: Vec<(String, Address)> = Vec::new();
        let mut first = true;

        // Deployments
        if self.plan.contracts.is_empty() && self.plan.deployments > 0 {
            warn!("No deployable contracts in the catalog, skipping deployments");
        } else {
            for i in 0..self.plan.deployments as usize {
                let name = self.plan.contracts[(self.index + i) % self.plan.contracts.len()].clone();
                let Some(result) = self
                    .step(TxIntent::deploy(from, name.clone()), &token, &mut first, &mut stats)
                    .await
                else {
                    return Ok(stats);
                };
                if let Some(address) = result.contract_address.filter(|_| result.success) {
                    deployed.push((name, address));
                }
            }
        }

        // Interactions: this run's deployments first, then stored ones
        self.add_stored(&mut deployed).await;
        for (name, address) in &deployed {
            let functions = self.callable_functions(name);
            if functions.is_empty() {
                debug!("{} has no registered interactions", name);
                continue;
            }
            for round in 0..self.plan.interactions_per_contract {
                let function = &functions[round as usize % functions.len()];
                let intent = TxIntent::call(from, name.clone(), *address, function.clone(), round);
                if self.step(intent, &token, &mut first, &mut stats).await.is_none() {
                    return Ok(stats);
                }
            }
        }

        // Transfers
        for _ in 0..self.plan.transfers {
            let amount = self.plan.transfer_amount();
            let value = match to_wei(amount) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping transfer: {}", e);
                    stats.record(false);
                    continue;
                }
            };
            let recipient = self.pick_recipient();
            let intent = TxIntent::transfer(from, recipient, value.max(U256::from(1)));
            if self.step(intent, &token, &mut first, &mut stats).await.is_none() {
                return Ok(stats);
            }
        }

        info!(
            "Plan finished for {}: {} ok, {} failed",
            self.account.short(),
            stats.success,
            stats.failed
        );
        Ok(stats)
    }
}
