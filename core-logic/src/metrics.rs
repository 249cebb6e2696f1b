use crate::utils::retry::FailureClass;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// The three kinds of logical action a worker performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Deploy,
    Interact,
    Transfer,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Deploy => "deploy",
            ActionKind::Interact => "interact",
            ActionKind::Transfer => "transfer",
        }
    }

    fn index(&self) -> usize {
        match self {
            ActionKind::Deploy => 0,
            ActionKind::Interact => 1,
            ActionKind::Transfer => 2,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionCounts {
    pub attempted: u64,
    pub succeeded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TallySnapshot {
    pub timestamp: String,
    pub uptime_secs: u64,
    pub deployments: ActionCounts,
    pub interactions: ActionCounts,
    pub transfers: ActionCounts,
    pub broadcasts: u64,
    pub rotations: u64,
    pub failures: BTreeMap<String, u64>,
    pub avg_action_duration_ms: f64,
    pub max_action_duration_ms: u64,
}

impl TallySnapshot {
    pub fn total_attempted(&self) -> u64 {
        self.deployments.attempted + self.interactions.attempted + self.transfers.attempted
    }

    pub fn total_succeeded(&self) -> u64 {
        self.deployments.succeeded + self.interactions.succeeded + self.transfers.succeeded
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempted();
        if total > 0 {
            self.total_succeeded() as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Running totals for one session, shared by every worker.
#[derive(Debug)]
pub struct RunTally {
    attempted: [AtomicU64; 3],
    succeeded: [AtomicU64; 3],
    failures: [AtomicU64; FailureClass::ALL.len()],
    broadcasts: AtomicU64,
    rotations: AtomicU64,
    duration_sum_ms: AtomicU64,
    duration_max_ms: AtomicU64,
    start_time: Instant,
}

impl Default for RunTally {
    fn default() -> Self {
        Self {
            attempted: Default::default(),
            succeeded: Default::default(),
            failures: Default::default(),
            broadcasts: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            duration_sum_ms: AtomicU64::new(0),
            duration_max_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl RunTally {
    pub fn record_action(
        &self,
        kind: ActionKind,
        duration: Duration,
        success: bool,
        failure: Option<FailureClass>,
    ) {
        self.attempted[kind.index()].fetch_add(1, Ordering::SeqCst);
        if success {
            self.succeeded[kind.index()].fetch_add(1, Ordering::SeqCst);
        }
        if let Some(class) = failure {
            self.failures[class.index()].fetch_add(1, Ordering::SeqCst);
        }

        let duration_ms = duration.as_millis() as u64;
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::SeqCst);
        self.duration_max_ms.fetch_max(duration_ms, Ordering::SeqCst);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_rotations(&self, rotations: u64) {
        self.rotations.store(rotations, Ordering::SeqCst);
    }

    pub fn counts(&self, kind: ActionKind) -> ActionCounts {
        ActionCounts {
            attempted: self.attempted[kind.index()].load(Ordering::SeqCst),
            succeeded: self.succeeded[kind.index()].load(Ordering::SeqCst),
        }
    }

    pub fn failures(&self, class: FailureClass) -> u64 {
        self.failures[class.index()].load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TallySnapshot {
        let failures = FailureClass::ALL
            .iter()
            .map(|class| (class.to_string(), self.failures(*class)))
            .filter(|(_, n)| *n > 0)
            .collect();

        let deployments = self.counts(ActionKind::Deploy);
        let interactions = self.counts(ActionKind::Interact);
        let transfers = self.counts(ActionKind::Transfer);
        let total = deployments.attempted + interactions.attempted + transfers.attempted;
        let duration_sum = self.duration_sum_ms.load(Ordering::SeqCst);

        TallySnapshot {
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            deployments,
            interactions,
            transfers,
            broadcasts: self.broadcasts.load(Ordering::SeqCst),
            rotations: self.rotations.load(Ordering::SeqCst),
            failures,
            avg_action_duration_ms: if total > 0 {
                duration_sum as f64 / total as f64
            } else {
                0.0
            },
            max_action_duration_ms: self.duration_max_ms.load(Ordering::SeqCst),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    pub async fn export_to_file(&self, path: &str) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_json()).await
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_tally() {
        let tally = RunTally::default();

        tally.record_action(ActionKind::Deploy, Duration::from_millis(100), true, None);
        tally.record_action(ActionKind::Deploy, Duration::from_millis(300), true, None);
        tally.record_action(
            ActionKind::Transfer,
            Duration::from_millis(50),
            false,
            Some(FailureClass::TransportFailure),
        );

        let snapshot = tally.snapshot();
        assert_eq!(snapshot.deployments.attempted, 2);
        assert_eq!(snapshot.deployments.succeeded, 2);
        assert_eq!(snapshot.transfers.attempted, 1);
        assert_eq!(snapshot.transfers.succeeded, 0);
        assert_eq!(snapshot.failures.get("TransportFailure"), Some(&1));
        assert_eq!(snapshot.max_action_duration_ms, 300);
        assert!((snapshot.success_rate() - 66.67).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_json_export() {
        let tally = RunTally::default();
        tally.record_broadcast();

        let json = tally.to_json();
        assert!(json.contains("deployments"));
        assert!(json.contains("\"broadcasts\": 1"));
    }
}
