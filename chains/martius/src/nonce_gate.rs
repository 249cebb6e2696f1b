//! Nonce & Balance Gate
//!
//! Issues nonces per address from a local cursor seeded with the chain's
//! pending transaction count, serialized by one mutex per address so two
//! workers can never be handed the same nonce. Also the place where a flow
//! stalls until an account is funded.

use crate::connection::ConnectionProvider;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct NonceCursor {
    /// Next never-issued nonce; `None` until first use
    next: Option<u64>,
    /// Nonces handed back as never broadcast, reissued lowest first
    released: BTreeSet<u64>,
}

pub struct NonceGate {
    connection: Arc<ConnectionProvider>,
    cursors: RwLock<HashMap<Address, Arc<Mutex<NonceCursor>>>>,
    balance_poll: Duration,
}

impl NonceGate {
    pub fn new(connection: Arc<ConnectionProvider>, balance_poll: Duration) -> Self {
        Self {
            connection,
            cursors: RwLock::new(HashMap::new()),
            balance_poll,
        }
    }

    async fn cursor(&self, address: Address) -> Arc<Mutex<NonceCursor>> {
        if let Some(cursor) = self.cursors.read().await.get(&address) {
            return cursor.clone();
        }
        self.cursors
            .write()
            .await
            .entry(address)
            .or_default()
            .clone()
    }

    async fn chain_count(&self, address: Address) -> Result<u64> {
        let connection = self.connection.current().await;
        connection
            .transport
            .transaction_count(address)
            .await
            .with_context(|| format!("Failed to fetch transaction count for {}", address))
    }

    /// Hands out the next nonce for `address`.
    pub async fn next_nonce(&self, address: Address) -> Result<u64> {
        let cursor = self.cursor(address).await;
        let mut cursor = cursor.lock().await;

        if let Some(nonce) = cursor.released.pop_first() {
            debug!("Reissuing released nonce {} for {}", nonce, address);
            return Ok(nonce);
        }

        let next = match cursor.next {
            Some(n) => n,
            None => self.chain_count(address).await?,
        };
        cursor.next = Some(next + 1);
        Ok(next)
    }

    /// Gives back a nonce that was never broadcast so it can be issued again.
    pub async fn release(&self, address: Address, nonce: u64) {
        let cursor = self.cursor(address).await;
        let mut cursor = cursor.lock().await;

        match cursor.next {
            Some(next) if nonce + 1 == next => {
                let mut next = nonce;
                // Collapse any released run sitting right below the cursor
                while next > 0 && cursor.released.remove(&(next - 1)) {
                    next -= 1;
                }
                cursor.next = Some(next);
            }
            Some(next) if nonce < next => {
                cursor.released.insert(nonce);
            }
            _ => warn!("Ignoring release of nonce {} never issued to {}", nonce, address),
        }
    }

    /// Re-reads the chain's pending count.
    ///
    /// Normally the cursor only moves forward (`max(local, chain)`); with
    /// `rewind` it is set to the chain value, which is what a
    /// "nonce too high" rejection needs.
    pub async fn resync(&self, address: Address, rewind: bool) -> Result<u64> {
        let cursor = self.cursor(address).await;
        let mut cursor = cursor.lock().await;
        let chain = self.chain_count(address).await?;

        let next = if rewind {
            cursor.released.clear();
            chain
        } else {
            cursor.released.retain(|n| *n >= chain);
            cursor.next.map_or(chain, |local| local.max(chain))
        };
        cursor.next = Some(next);
        debug!(
            "Nonce cursor for {} resynced to {} (chain {}, rewind {})",
            address, next, chain, rewind
        );
        Ok(next)
    }

    /// Next nonce that would be issued, without issuing it.
    pub async fn peek(&self, address: Address) -> Option<u64> {
        let cursor = self.cursor(address).await;
        let cursor = cursor.lock().await;
        cursor
            .released
            .first()
            .copied()
            .or(cursor.next)
    }

    /// Polls the balance until it is at least `min`.
    ///
    /// Returns `None` only when `cancel` fires; poll errors are logged and
    /// polled through.
    pub async fn wait_for_balance(
        &self,
        address: Address,
        min: U256,
        cancel: &CancellationToken,
    ) -> Option<U256> {
        let mut polls = 0u64;
        loop {
            let connection = self.connection.current().await;
            match connection.transport.balance(address).await {
                Ok(balance) if balance >= min => {
                    if polls > 0 {
                        info!(
                            "💰 {} funded: {} (needed {})",
                            address,
                            format_ether(balance),
                            format_ether(min)
                        );
                    }
                    return Some(balance);
                }
                Ok(balance) => {
                    // First poll and then every ~20th to keep long waits readable
                    if polls % 20 == 0 {
                        warn!(
                            "⏳ Waiting for funds on {}: have {}, need {}",
                            address,
                            format_ether(balance),
                            format_ether(min)
                        );
                    }
                }
                Err(e) => warn!("Balance poll for {} failed: {:#}", address, e),
            }
            polls += 1;

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.balance_poll) => {}
            }
        }
    }
}
