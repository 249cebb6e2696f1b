//! JSON-RPC transport seam.
//!
//! The engine only needs a handful of `eth_*` calls, so it talks to the node
//! through [`RpcTransport`] instead of a concrete provider. The production
//! implementation wraps an Alloy provider over a reqwest client that may be
//! routed through a proxy; tests plug in scripted transports.

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::client::ClientBuilder;
use alloy::transports::http::Http;
use anyhow::{Context, Result};
use async_trait::async_trait;
use core_logic::ProxyConfig;
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// The parts of a receipt the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub status: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// Set by the node for contract-creation transactions
    pub contract_address: Option<Address>,
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Where requests go, safe to log (`direct` or the proxy host:port)
    fn route(&self) -> String;

    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    /// Transaction count including the pending block
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Legacy single-value gas price in wei
    async fn gas_price(&self) -> Result<u128>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptSummary>>;
}

/// Builds a fresh transport, either direct or through `proxy`.
///
/// Never fails: when a transport cannot be built the factory hands back one
/// whose calls all fail as transport errors, so the caller's retry policy
/// decides what happens next.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, proxy: Option<&ProxyConfig>) -> Arc<dyn RpcTransport>;
}

/// Alloy provider over reqwest.
pub struct AlloyTransport {
    provider: Arc<dyn Provider + Send + Sync>,
    route: String,
}

impl AlloyTransport {
    pub fn connect(rpc_url: &str, proxy: Option<&ProxyConfig>, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(proxy) = proxy {
            let reqwest_proxy = if proxy.scheme().starts_with("socks") {
                // SOCKS auth only travels inside the URL
                Proxy::all(proxy.proxy_url()).context("Invalid proxy URL")?
            } else {
                let mut p = Proxy::all(&proxy.url).context("Invalid proxy URL")?;
                if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                    p = p.basic_auth(user, pass);
                }
                p
            };
            builder = builder.proxy(reqwest_proxy);
        }

        let reqwest_client = builder.build().context("Failed to build HTTP client")?;
        let http_transport = Http::with_client(
            reqwest_client,
            rpc_url.parse::<Url>().context("Invalid RPC URL")?,
        );
        let client = ClientBuilder::default().transport(http_transport, false);

        // Nonce, gas and chain id are filled by the engine itself
        let provider: Arc<dyn Provider + Send + Sync> = Arc::new(
            ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_client(client),
        );

        Ok(Self {
            provider,
            route: proxy
                .map(|p| p.display_url())
                .unwrap_or_else(|| "direct".to_string()),
        })
    }
}

#[async_trait]
impl RpcTransport for AlloyTransport {
    fn route(&self) -> String {
        self.route.clone()
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        Ok(self
            .provider
            .get_transaction_count(address)
            .pending()
            .await?)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptSummary>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| ReceiptSummary {
            status: r.status(),
            block_number: r.block_number(),
            gas_used: r.gas_used(),
            contract_address: r.contract_address(),
        }))
    }
}

/// Stand-in returned when a transport could not be built at all.
pub struct UnavailableTransport {
    reason: String,
    route: String,
}

impl UnavailableTransport {
    pub fn new(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            route: route.into(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(anyhow::anyhow!("connection unavailable: {}", self.reason))
    }
}

#[async_trait]
impl RpcTransport for UnavailableTransport {
    fn route(&self) -> String {
        self.route.clone()
    }

    async fn chain_id(&self) -> Result<u64> {
        self.fail()
    }

    async fn block_number(&self) -> Result<u64> {
        self.fail()
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        self.fail()
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        self.fail()
    }

    async fn gas_price(&self) -> Result<u128> {
        self.fail()
    }

    async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<TxHash> {
        self.fail()
    }

    async fn transaction_receipt(&self, _hash: TxHash) -> Result<Option<ReceiptSummary>> {
        self.fail()
    }
}

pub struct AlloyTransportFactory {
    rpc_url: String,
    timeout: Duration,
}

impl AlloyTransportFactory {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            timeout,
        }
    }
}

impl TransportFactory for AlloyTransportFactory {
    fn connect(&self, proxy: Option<&ProxyConfig>) -> Arc<dyn RpcTransport> {
        match AlloyTransport::connect(&self.rpc_url, proxy, self.timeout) {
            Ok(transport) => Arc::new(transport),
            Err(e) if proxy.is_some() => {
                warn!("Proxy transport setup failed ({:#}), falling back to direct", e);
                self.connect(None)
            }
            Err(e) => Arc::new(UnavailableTransport::new("direct", format!("{:#}", e))),
        }
    }
}
