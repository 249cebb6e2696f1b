//! Connection Provider
//!
//! Holds the one live [`Connection`] shared by every worker. A connection is
//! never mutated: rotation builds a new one and swaps the `Arc` under a write
//! lock, so readers see either the old or the new connection, never a mix.
//! In-flight requests on the old connection finish (or time out) on their own.

use crate::rpc::{RpcTransport, TransportFactory};
use core_logic::{NetworkError, ProxyConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One RPC session, direct or through a proxy.
pub struct Connection {
    pub id: u64,
    pub proxy: Option<ProxyConfig>,
    pub transport: Arc<dyn RpcTransport>,
}

impl Connection {
    pub fn route(&self) -> String {
        self.transport.route()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("route", &self.route())
            .finish()
    }
}

pub struct ConnectionProvider {
    factory: Arc<dyn TransportFactory>,
    chain_id: u64,
    current: RwLock<Arc<Connection>>,
    next_id: AtomicU64,
    rotations: AtomicU64,
}

impl ConnectionProvider {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        chain_id: u64,
        initial: Option<ProxyConfig>,
    ) -> Self {
        let transport = factory.connect(initial.as_ref());
        let connection = Arc::new(Connection {
            id: 0,
            proxy: initial,
            transport,
        });
        Self {
            factory,
            chain_id,
            current: RwLock::new(connection),
            next_id: AtomicU64::new(1),
            rotations: AtomicU64::new(0),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn current(&self) -> Arc<Connection> {
        self.current.read().await.clone()
    }

    /// Builds a new connection for `endpoint` (or direct) and makes it current.
    pub async fn replace(&self, endpoint: Option<ProxyConfig>) -> Arc<Connection> {
        let transport = self.factory.connect(endpoint.as_ref());
        let connection = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            proxy: endpoint,
            transport,
        });

        let previous = {
            let mut guard = self.current.write().await;
            std::mem::replace(&mut *guard, connection.clone())
        };
        self.rotations.fetch_add(1, Ordering::SeqCst);

        info!(
            "🔄 Connection #{} -> #{} via {}",
            previous.id,
            connection.id,
            connection.route()
        );
        connection
    }

    /// True only if the latest block is fetchable and the chain id matches.
    pub async fn health_check(&self) -> bool {
        let connection = self.current().await;
        self.verify(&connection).await.is_ok()
    }

    /// Health check of one specific connection. Returns the latest block.
    pub async fn verify(&self, connection: &Connection) -> Result<u64, NetworkError> {
        let unreachable = |e: anyhow::Error| {
            warn!("Health check #{} failed: {:#}", connection.id, e);
            NetworkError::Unreachable {
                endpoint: connection.route(),
                reason: format!("{:#}", e),
            }
        };

        let block = connection.transport.block_number().await.map_err(unreachable)?;
        debug!("Health check #{}: block {}", connection.id, block);

        let actual = connection.transport.chain_id().await.map_err(unreachable)?;
        if actual != self.chain_id {
            warn!(
                "Health check #{}: chain id {} does not match configured {}",
                connection.id, actual, self.chain_id
            );
            return Err(NetworkError::ChainIdMismatch {
                expected: self.chain_id,
                actual,
            });
        }
        Ok(block)
    }

    /// Number of `replace` calls so far.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }
}
