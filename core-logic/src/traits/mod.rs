use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub success: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn record(&mut self, success: bool) {
        if success {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// Label used in the worker span and shutdown summary
    fn label(&self) -> String;

    /// Run until the plan is finished or the token is cancelled
    async fn start(&self, cancellation_token: CancellationToken) -> Result<WorkerStats>;
}
