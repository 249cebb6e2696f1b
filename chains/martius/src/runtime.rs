//! Shared runtime state: the live connection and the proxy pools.
//!
//! Built once by the session and handed to every worker behind an `Arc`.
//! All mutation goes through [`SharedRuntime::rotate`], which retires the
//! failed proxy and swaps in a fresh connection. Rotations are serialized,
//! and a rotation requested for a connection that is no longer current is a
//! no-op, so one bad route costs one swap no matter how many workers saw it.

use crate::connection::{Connection, ConnectionProvider};
use crate::proxy_rotator::{PoolKind, ProxyRotator};
use core_logic::NetworkError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct SharedRuntime {
    connection: Arc<ConnectionProvider>,
    rotator: Option<Arc<ProxyRotator>>,
    rotation_lock: Mutex<()>,
}

impl SharedRuntime {
    /// `rotator = None` runs direct; rotation then just rebuilds the direct session.
    pub fn new(connection: Arc<ConnectionProvider>, rotator: Option<Arc<ProxyRotator>>) -> Self {
        Self {
            connection,
            rotator,
            rotation_lock: Mutex::new(()),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionProvider> {
        &self.connection
    }

    pub fn rotator(&self) -> Option<&Arc<ProxyRotator>> {
        self.rotator.as_ref()
    }

    /// Retires `failed` and makes a fresh connection current. If another
    /// worker already replaced `failed`, returns the current connection as is.
    pub async fn rotate(&self, failed: &Connection) -> Arc<Connection> {
        let _guard = self.rotation_lock.lock().await;

        let current = self.connection.current().await;
        if current.id != failed.id {
            debug!(
                "Connection #{} already replaced by #{}",
                failed.id, current.id
            );
            return current;
        }

        let next = match &self.rotator {
            Some(rotator) => {
                if let Some(proxy) = &failed.proxy {
                    rotator.mark_failed(proxy).await;
                }
                let next = rotator.next(PoolKind::Local).await;
                if next.is_none() {
                    warn!("No working proxy available, continuing direct");
                }
                next
            }
            None => None,
        };

        self.connection.replace(next).await
    }

    /// Health-checks the current connection, rotating up to `max_rotations`
    /// times until one passes. Returns the last failure otherwise.
    pub async fn ensure_healthy(
        &self,
        max_rotations: u32,
    ) -> Result<Arc<Connection>, NetworkError> {
        let mut connection = self.connection.current().await;
        let mut rotation = 0;
        loop {
            let error = match self.connection.verify(&connection).await {
                Ok(_) => return Ok(connection),
                Err(e) => e,
            };
            if rotation >= max_rotations {
                return Err(error);
            }
            rotation += 1;
            info!(
                "Connection unhealthy, rotating ({}/{})",
                rotation, max_rotations
            );
            connection = self.rotate(&connection).await;
        }
    }
}
