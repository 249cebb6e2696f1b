use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why an attempt (or a whole logical action) did not confirm.
///
/// Everything except `BuildError`, `Reverted` and `Cancelled` is recoverable
/// inside the submission loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    BuildError,
    InsufficientFunds,
    NonceConflict,
    GasPriceStale,
    TransportFailure,
    ReceiptTimeout,
    NodeRejected,
    Reverted,
    Cancelled,
}

impl FailureClass {
    pub const ALL: [FailureClass; 9] = [
        FailureClass::BuildError,
        FailureClass::InsufficientFunds,
        FailureClass::NonceConflict,
        FailureClass::GasPriceStale,
        FailureClass::TransportFailure,
        FailureClass::ReceiptTimeout,
        FailureClass::NodeRejected,
        FailureClass::Reverted,
        FailureClass::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::BuildError => "BuildError",
            FailureClass::InsufficientFunds => "InsufficientFunds",
            FailureClass::NonceConflict => "NonceConflict",
            FailureClass::GasPriceStale => "GasPriceStale",
            FailureClass::TransportFailure => "TransportFailure",
            FailureClass::ReceiptTimeout => "ReceiptTimeout",
            FailureClass::NodeRejected => "NodeRejected",
            FailureClass::Reverted => "Reverted",
            FailureClass::Cancelled => "Cancelled",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            FailureClass::BuildError | FailureClass::Reverted | FailureClass::Cancelled
        )
    }

    pub(crate) fn index(&self) -> usize {
        FailureClass::ALL
            .iter()
            .position(|c| c == self)
            .unwrap_or(0)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Order matters: first match wins.
const CLASS_PATTERNS: &[(&str, FailureClass)] = &[
    ("insufficient funds", FailureClass::InsufficientFunds),
    ("nonce too low", FailureClass::NonceConflict),
    ("already known", FailureClass::NonceConflict),
    ("nonce too high", FailureClass::NonceConflict),
    ("replacement transaction underpriced", FailureClass::GasPriceStale),
    ("gas price too low", FailureClass::GasPriceStale),
    ("underpriced", FailureClass::GasPriceStale),
    ("timeout", FailureClass::TransportFailure),
    ("timed out", FailureClass::TransportFailure),
    ("connection", FailureClass::TransportFailure),
    ("error sending request", FailureClass::TransportFailure),
    ("network error", FailureClass::TransportFailure),
    ("dns error", FailureClass::TransportFailure),
    ("proxy", FailureClass::TransportFailure),
    ("tunnel", FailureClass::TransportFailure),
    ("service unavailable", FailureClass::TransportFailure),
    ("bad gateway", FailureClass::TransportFailure),
    ("too many requests", FailureClass::TransportFailure),
    ("rate limited", FailureClass::TransportFailure),
];

/// Maps node/transport error text onto a [`FailureClass`] with an ordered,
/// case-insensitive substring match. Unknown text is `NodeRejected`.
pub fn classify_error(message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    CLASS_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, class)| *class)
        .unwrap_or(FailureClass::NodeRejected)
}

/// `nonce too high` needs the local cursor rewound, not just advanced.
pub fn is_nonce_too_high(message: &str) -> bool {
    message.to_lowercase().contains("nonce too high")
}

/// Linear capped backoff: `min(cap, attempt * step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearBackoff {
    pub step_ms: u64,
    pub cap_ms: u64,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            step_ms: 2_000,
            cap_ms: 30_000,
        }
    }
}

impl LinearBackoff {
    pub fn new(step_ms: u64, cap_ms: u64) -> Self {
        Self { step_ms, cap_ms }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = (attempt as u64).saturating_mul(self.step_ms).min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

/// Uniform pause in `[min_ms, max_ms]`, used between planned actions.
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
