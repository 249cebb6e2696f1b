use crate::traits::{Worker, WorkerStats};
use anyhow::Result;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

pub struct WorkerRunner;

impl WorkerRunner {
    /// Spawns the workers concurrently, wires Ctrl+C to a shared cancellation
    /// token and waits for all of them.
    pub async fn run_workers(workers: Vec<Box<dyn Worker>>) -> Result<WorkerStats> {
        let token = CancellationToken::new();
        let cloned_token = token.clone();

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("🛑 Received Ctrl+C. Finishing in-flight transactions...");
                    cloned_token.cancel();
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            }
        });

        Self::run_with_token(workers, token).await
    }

    /// Same as [`run_workers`](Self::run_workers) with a caller-owned token.
    pub async fn run_with_token(
        workers: Vec<Box<dyn Worker>>,
        token: CancellationToken,
    ) -> Result<WorkerStats> {
        let mut set = JoinSet::new();

        let start_time = std::time::Instant::now();
        info!("Starting {} workers...", workers.len());

        for (i, worker) in workers.into_iter().enumerate() {
            let id = i + 1;
            let span = tracing::info_span!(
                "worker",
                worker_id = format!("{:03}", id),
                account = %worker.label()
            );
            let child_token = token.child_token();

            set.spawn(
                async move {
                    match worker.start(child_token).await {
                        Ok(stats) => Ok(stats),
                        Err(e) => {
                            error!("Worker {} failed: {:?}", id, e);
                            Err(e)
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut totals = WorkerStats::default();

        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(stats)) => {
                    totals.success += stats.success;
                    totals.failed += stats.failed;
                }
                Ok(Err(_)) => {
                    // Already logged inside the span
                }
                Err(e) => {
                    error!("A worker task panicked or failed to join: {:?}", e);
                }
            }
        }

        let total_duration = start_time.elapsed();
        let total = totals.success + totals.failed;
        let rate = if total > 0 {
            (totals.success as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        info!("🛑 All workers finished.");
        info!(
            "Total Time: {:.1}s | Total Success: {} | Total Fail: {} | Success Rate: {:.2}%",
            total_duration.as_secs_f64(),
            totals.success,
            totals.failed,
            rate
        );

        Ok(totals)
    }
}
