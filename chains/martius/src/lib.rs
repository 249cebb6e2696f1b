//! # Martius Bot
//!
//! Resilient transaction execution against the Rome Martius EVM testnet:
//! contract deployments, contract interactions and native transfers across
//! many accounts, optionally through rotating HTTP/SOCKS proxies.
//!
//! ## Modules
//!
//! - [`connection`] - The shared RPC session and its atomic replacement
//! - [`proxy_rotator`] - Local/online proxy pools with probing and refetch
//! - [`nonce_gate`] - Per-address nonce issuance and the balance wait
//! - [`builder`] - Intents to signed-ready transaction requests
//! - [`submission`] - The retry state machine
//! - [`reporter`] - Result logging, tally and deployment records
//! - [`worker`] - Per-account action plans

pub mod account;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod interactions;
pub mod nonce_gate;
pub mod proxy_rotator;
pub mod reporter;
pub mod rpc;
pub mod runtime;
pub mod submission;
pub mod worker;

pub use account::Account;
pub use builder::{parse_recipient, to_wei, GasLimits, IntentTarget, PreparedTx, TxBuilder, TxIntent};
pub use catalog::{ContractArtifact, ContractCatalog};
pub use config::MartiusConfig;
pub use connection::{Connection, ConnectionProvider};
pub use interactions::{InteractionContext, InteractionRegistry, InteractionStrategy};
pub use nonce_gate::NonceGate;
pub use proxy_rotator::{HttpListSource, HttpProbe, PoolKind, ProxyProbe, ProxyRotator, ProxySource};
pub use reporter::{DeploymentRecord, DeploymentStore, ResultReporter, ResultSink};
pub use rpc::{AlloyTransportFactory, ReceiptSummary, RpcTransport, TransportFactory};
pub use runtime::SharedRuntime;
pub use submission::{
    RetryMode, SubmissionConfig, SubmissionEngine, SubmissionEvent, SubmissionObserver, TxResult,
};
pub use worker::{AccountWorker, ActionPlan};
