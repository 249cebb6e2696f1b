#![allow(dead_code)]

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{address, keccak256, Address, Bytes, TxHash, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use core_logic::{LinearBackoff, ProxyConfig};
use martius_bot::{
    Account, ConnectionProvider, ContractArtifact, ContractCatalog, GasLimits, InteractionRegistry,
    NonceGate, ProxyProbe, ProxySource, ReceiptSummary, RetryMode, RpcTransport, SharedRuntime,
    SubmissionConfig, SubmissionEngine, TransportFactory, TxBuilder,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const CHAIN_ID: u64 = 121214;
pub const START_NONCE: u64 = 5;
/// Address the mock node reports for every contract creation
pub const CREATED: Address = address!("c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0");

pub fn account() -> Account {
    Account::from_private_key(KEY).unwrap()
}

pub fn ether(amount: &str) -> U256 {
    parse_ether(amount).unwrap()
}

/// A transaction as the node saw it.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub raw: Vec<u8>,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_price: u128,
    /// Balance at the moment the node received it
    pub balance: U256,
    pub accepted: bool,
}

struct Rejection {
    message: String,
    advance_nonce: u64,
    reprice: Option<u64>,
}

/// Shared in-memory node behind every mock connection.
pub struct MockChain {
    pub chain_id: AtomicU64,
    pub balance: Mutex<U256>,
    pub pending: AtomicU64,
    pub gas_price: AtomicU64,
    /// Health checks (block number calls) that fail before the node answers
    pub health_failures: AtomicU32,
    /// Broadcasts that fail as transport errors
    pub transport_failures: AtomicU32,
    /// Receipts for the first N accepted transactions never show up
    pub withheld_receipts: AtomicU32,
    pub revert: AtomicBool,
    rejections: Mutex<VecDeque<Rejection>>,
    receipts: Mutex<HashMap<TxHash, ReceiptSummary>>,
    sent: Mutex<Vec<SentTx>>,
    pub connects: AtomicU32,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            chain_id: AtomicU64::new(CHAIN_ID),
            balance: Mutex::new(ether("100")),
            pending: AtomicU64::new(START_NONCE),
            gas_price: AtomicU64::new(1_000_000_000),
            health_failures: AtomicU32::new(0),
            transport_failures: AtomicU32::new(0),
            withheld_receipts: AtomicU32::new(0),
            revert: AtomicBool::new(false),
            rejections: Mutex::new(VecDeque::new()),
            receipts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
        }
    }
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    /// The next broadcast is refused with `message`.
    pub fn reject_next(&self, message: &str) {
        self.reject_next_and_advance(message, 0);
    }

    /// Refuses the next broadcast and bumps the pending count, as when
    /// another sender raced us to the nonce.
    pub fn reject_next_and_advance(&self, message: &str, advance_nonce: u64) {
        self.rejections.lock().unwrap().push_back(Rejection {
            message: message.to_string(),
            advance_nonce,
            reprice: None,
        });
    }

    /// Refuses the next broadcast and moves the node's gas price to `gas_price`.
    pub fn reject_next_and_reprice(&self, message: &str, gas_price: u64) {
        self.rejections.lock().unwrap().push_back(Rejection {
            message: message.to_string(),
            advance_nonce: 0,
            reprice: Some(gas_price),
        });
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.sent.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> Vec<SentTx> {
        self.sent().into_iter().filter(|t| t.accepted).collect()
    }

    fn record(&self, raw: &[u8], accepted: bool) -> SentTx {
        let envelope = TxEnvelope::decode_2718(&mut &raw[..]).unwrap();
        let tx = SentTx {
            raw: raw.to_vec(),
            nonce: envelope.nonce(),
            to: envelope.to(),
            value: envelope.value(),
            input: envelope.input().clone(),
            gas_price: envelope.gas_price().unwrap_or_default(),
            balance: *self.balance.lock().unwrap(),
            accepted,
        };
        self.sent.lock().unwrap().push(tx.clone());
        tx
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct MockTransport {
    chain: Arc<MockChain>,
    route: String,
}

#[async_trait]
impl RpcTransport for MockTransport {
    fn route(&self) -> String {
        self.route.clone()
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain.chain_id.load(Ordering::SeqCst))
    }

    async fn block_number(&self) -> Result<u64> {
        if MockChain::take(&self.chain.health_failures) {
            return Err(anyhow!("error sending request: connection reset"));
        }
        Ok(1_000)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        Ok(self.chain.pending.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        Ok(*self.chain.balance.lock().unwrap())
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.chain.gas_price.load(Ordering::SeqCst) as u128)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash> {
        if MockChain::take(&self.chain.transport_failures) {
            self.chain.record(raw, false);
            return Err(anyhow!(
                "error sending request for url (http://mock/): connection refused"
            ));
        }
        let rejection = self.chain.rejections.lock().unwrap().pop_front();
        if let Some(rejection) = rejection {
            self.chain.record(raw, false);
            self.chain
                .pending
                .fetch_add(rejection.advance_nonce, Ordering::SeqCst);
            if let Some(price) = rejection.reprice {
                self.chain.gas_price.store(price, Ordering::SeqCst);
            }
            return Err(anyhow!("server returned an error response: {}", rejection.message));
        }

        let tx = self.chain.record(raw, true);
        let hash = keccak256(raw);
        self.chain
            .pending
            .fetch_max(tx.nonce + 1, Ordering::SeqCst);

        if !MockChain::take(&self.chain.withheld_receipts) {
            let receipt = ReceiptSummary {
                status: !self.chain.revert.load(Ordering::SeqCst),
                block_number: Some(1_001),
                gas_used: 21_000,
                contract_address: tx.to.is_none().then_some(CREATED),
            };
            self.chain.receipts.lock().unwrap().insert(hash, receipt);
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptSummary>> {
        Ok(self.chain.receipts.lock().unwrap().get(&hash).cloned())
    }
}

pub struct MockFactory {
    pub chain: Arc<MockChain>,
}

impl TransportFactory for MockFactory {
    fn connect(&self, proxy: Option<&ProxyConfig>) -> Arc<dyn RpcTransport> {
        self.chain.connects.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockTransport {
            chain: self.chain.clone(),
            route: proxy
                .map(|p| p.display_url())
                .unwrap_or_else(|| "direct".to_string()),
        })
    }
}

pub fn connection(chain: &Arc<MockChain>) -> Arc<ConnectionProvider> {
    Arc::new(ConnectionProvider::new(
        Arc::new(MockFactory {
            chain: chain.clone(),
        }),
        CHAIN_ID,
        None,
    ))
}

/// Millisecond-scale timings so retries finish quickly.
pub fn fast_config(mode: RetryMode) -> SubmissionConfig {
    SubmissionConfig {
        mode,
        receipt_timeout: Duration::from_millis(60),
        receipt_poll: Duration::from_millis(5),
        backoff: LinearBackoff::new(5, 20),
        nonce_race_delay: Duration::from_millis(5),
        transport_delay: Duration::from_millis(1),
        gas_buffer: ether("0.005"),
    }
}

pub fn catalog() -> ContractCatalog {
    ContractCatalog::from_json_str(
        r#"{
            "Counter": {
                "abi": [
                    {"type": "function", "name": "increment", "inputs": [], "outputs": [], "stateMutability": "nonpayable"},
                    {"type": "function", "name": "count", "inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}
                ],
                "bytecode": "0x6080604052348015600f57600080fd5b50"
            },
            "Greeter": {
                "abi": [
                    {"type": "constructor", "inputs": [{"name": "greeting", "type": "string"}], "stateMutability": "nonpayable"},
                    {"type": "function", "name": "setGreeting", "inputs": [{"name": "greeting", "type": "string"}], "outputs": [], "stateMutability": "nonpayable"}
                ],
                "bytecode": "0x6080604052"
            }
        }"#,
    )
    .unwrap()
}

/// Artifact whose constructor takes two arguments while the stock generator supplies one.
pub fn mismatched_greeter() -> ContractArtifact {
    let abi = serde_json::from_str(
        r#"[{"type": "constructor", "inputs": [{"name": "greeting", "type": "string"}, {"name": "count", "type": "uint256"}], "stateMutability": "nonpayable"}]"#,
    )
    .unwrap();
    ContractArtifact::new("Greeter", abi, Bytes::from_static(&[0x60, 0x80]))
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub connection: Arc<ConnectionProvider>,
    pub runtime: Arc<SharedRuntime>,
    pub nonce_gate: Arc<NonceGate>,
    pub builder: Arc<TxBuilder>,
}

impl Harness {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self::with_catalog(chain, catalog())
    }

    pub fn with_catalog(chain: Arc<MockChain>, catalog: ContractCatalog) -> Self {
        let connection = connection(&chain);
        let runtime = Arc::new(SharedRuntime::new(connection.clone(), None));
        let nonce_gate = Arc::new(NonceGate::new(
            connection.clone(),
            Duration::from_millis(5),
        ));
        let builder = Arc::new(TxBuilder::new(
            CHAIN_ID,
            Arc::new(catalog),
            Arc::new(InteractionRegistry::stock()),
            GasLimits::default(),
        ));
        Self {
            chain,
            connection,
            runtime,
            nonce_gate,
            builder,
        }
    }

    pub fn engine(&self, mode: RetryMode) -> SubmissionEngine {
        SubmissionEngine::new(
            self.runtime.clone(),
            self.nonce_gate.clone(),
            self.builder.clone(),
            fast_config(mode),
        )
    }
}

/// Passes every proxy whose URL is in `working`; counts probes.
#[derive(Default)]
pub struct MockProbe {
    pub working: Mutex<HashSet<String>>,
    pub probes: AtomicUsize,
}

impl MockProbe {
    pub fn working(urls: &[&str]) -> Arc<Self> {
        let probe = Self::default();
        {
            let mut set = probe.working.lock().unwrap();
            for url in urls {
                set.insert(url.to_string());
            }
        }
        Arc::new(probe)
    }
}

#[async_trait]
impl ProxyProbe for MockProbe {
    async fn probe(&self, proxy: &ProxyConfig) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.working.lock().unwrap().contains(&proxy.url)
    }
}

/// Serves queued lists in order, repeating the last one.
pub struct MockSource {
    lists: Mutex<VecDeque<Vec<ProxyConfig>>>,
    last: Mutex<Vec<ProxyConfig>>,
    pub fetches: AtomicUsize,
}

impl MockSource {
    pub fn new(lists: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            lists: Mutex::new(
                lists
                    .into_iter()
                    .map(|l| l.into_iter().map(ProxyConfig::new).collect())
                    .collect(),
            ),
            last: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProxySource for MockSource {
    fn name(&self) -> String {
        "mock".to_string()
    }

    async fn fetch(&self) -> Result<Vec<ProxyConfig>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.lists.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(list) = next {
            *last = list;
        }
        Ok(last.clone())
    }
}

pub fn proxies(urls: &[&str]) -> Vec<ProxyConfig> {
    urls.iter().map(|u| ProxyConfig::new(*u)).collect()
}
