//! Submission Engine
//!
//! Signs, broadcasts and confirms one [`TxIntent`], retrying through failure
//! classes until it confirms, the attempt budget runs out (bounded mode) or
//! the caller cancels (persistent mode).
//!
//! # Attempt lifecycle
//!
//! ```text
//! Built -> Signed -> Broadcast -> AwaitingReceipt -> Confirmed | Reverted | Timeout
//!                 \-> TransportFailure | RejectedByNode
//! ```
//!
//! Every attempt runs a health check, fetches a fresh gas price and checks
//! the balance before signing. A nonce is held across attempts until it has
//! been broadcast; once broadcast it is consumed even if the attempt fails.
//!
//! # Recovery per failure class
//!
//! | Class               | Action                                              |
//! |---------------------|-----------------------------------------------------|
//! | `InsufficientFunds` | wait for balance, same nonce                        |
//! | `NonceConflict`     | linear backoff, resync cursor, fresh nonce          |
//! | `GasPriceStale`     | retry at once (price is refetched every attempt)    |
//! | `TransportFailure`  | rotate proxy + connection, short delay, same nonce  |
//! | `ReceiptTimeout`    | new attempt with a fresh nonce                      |
//! | `NodeRejected`      | linear backoff, same nonce                          |

use crate::account::Account;
use crate::builder::{PreparedTx, TxBuilder, TxIntent};
use crate::config::{ModeSetting, SubmissionSection};
use crate::connection::Connection;
use crate::nonce_gate::NonceGate;
use crate::rpc::ReceiptSummary;
use crate::runtime::SharedRuntime;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::{Address, TxHash, U256};
use core_logic::{classify_error, is_nonce_too_high, FailureClass, LinearBackoff, SUBMISSION_TARGET};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Stop after this many attempts and surface the last classification
    Bounded { max_attempts: u32 },
    /// Retry until cancelled
    Persistent,
}

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    pub mode: RetryMode,
    pub receipt_timeout: Duration,
    pub receipt_poll: Duration,
    pub backoff: LinearBackoff,
    pub nonce_race_delay: Duration,
    pub transport_delay: Duration,
    /// Minimum wei kept aside for gas in the pre-broadcast balance check
    pub gas_buffer: U256,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self::from_section(&SubmissionSection::default())
    }
}

impl SubmissionConfig {
    pub fn from_section(section: &SubmissionSection) -> Self {
        let mode = match section.mode {
            ModeSetting::Bounded => RetryMode::Bounded {
                max_attempts: section.max_attempts.max(1),
            },
            ModeSetting::Persistent => RetryMode::Persistent,
        };
        Self {
            mode,
            receipt_timeout: Duration::from_secs(section.receipt_timeout_secs),
            receipt_poll: Duration::from_millis(section.receipt_poll_ms),
            backoff: LinearBackoff::new(section.backoff_step_ms, section.backoff_cap_ms),
            nonce_race_delay: Duration::from_millis(section.nonce_race_delay_ms),
            transport_delay: Duration::from_millis(section.transport_delay_ms),
            gas_buffer: parse_ether(&format!("{:.18}", section.gas_buffer.max(0.0)))
                .unwrap_or(U256::ZERO),
        }
    }

    fn budget_exhausted(&self, attempts: u32) -> bool {
        match self.mode {
            RetryMode::Bounded { max_attempts } => attempts >= max_attempts,
            RetryMode::Persistent => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Built,
    Signed,
    Broadcast,
    AwaitingReceipt,
    Confirmed,
    Reverted,
    Timeout,
    TransportFailure,
    RejectedByNode,
}

/// One concrete try. Discarded once the next attempt starts.
#[derive(Debug, Clone)]
pub struct TxAttempt {
    pub number: u32,
    pub nonce: Option<u64>,
    pub gas_price: Option<u128>,
    pub tx_hash: Option<TxHash>,
    pub state: AttemptState,
}

impl TxAttempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            nonce: None,
            gas_price: None,
            tx_hash: None,
            state: AttemptState::Built,
        }
    }
}

/// Terminal outcome of one logical action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub success: bool,
    /// Last hash the node accepted, if any
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// From the receipt of a contract creation
    pub contract_address: Option<Address>,
    pub classification: Option<FailureClass>,
    pub message: String,
    pub attempts: u32,
    pub broadcasts: u32,
}

impl TxResult {
    fn failure(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            block_number: None,
            gas_used: None,
            contract_address: None,
            classification: Some(class),
            message: message.into(),
            attempts: 0,
            broadcasts: 0,
        }
    }

    fn from_receipt(hash: TxHash, receipt: &ReceiptSummary) -> Self {
        Self {
            success: receipt.status,
            tx_hash: Some(hash),
            block_number: receipt.block_number,
            gas_used: Some(receipt.gas_used),
            contract_address: receipt.contract_address,
            classification: (!receipt.status).then_some(FailureClass::Reverted),
            message: if receipt.status {
                "confirmed".to_string()
            } else {
                "reverted on-chain".to_string()
            },
            attempts: 0,
            broadcasts: 0,
        }
    }

    /// Short operator-facing label
    pub fn classification_label(&self) -> &'static str {
        match self.classification {
            None => "Confirmed",
            Some(class) => class.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    /// The node accepted a signed transaction
    Broadcast {
        from: Address,
        attempt: u32,
        nonce: u64,
        tx_hash: TxHash,
    },
    Finished(TxResult),
}

pub trait SubmissionObserver: Send + Sync {
    fn on_event(&self, event: &SubmissionEvent);
}

enum AttemptOutcome {
    Confirmed(TxHash, ReceiptSummary),
    Reverted(TxHash, ReceiptSummary),
    Failed {
        class: FailureClass,
        message: String,
        /// Balance to wait for when `class` is `InsufficientFunds`
        required: Option<U256>,
    },
    /// Cannot succeed on retry (signing failed)
    Fatal(String),
    Cancelled,
}

impl AttemptOutcome {
    fn from_error(context: &str, error: &anyhow::Error) -> Self {
        let message = format!("{}: {:#}", context, error);
        AttemptOutcome::Failed {
            class: classify_error(&message),
            message,
            required: None,
        }
    }
}

pub struct SubmissionEngine {
    runtime: Arc<SharedRuntime>,
    nonce_gate: Arc<NonceGate>,
    builder: Arc<TxBuilder>,
    config: SubmissionConfig,
    observer: Option<Arc<dyn SubmissionObserver>>,
}

impl SubmissionEngine {
    pub fn new(
        runtime: Arc<SharedRuntime>,
        nonce_gate: Arc<NonceGate>,
        builder: Arc<TxBuilder>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            runtime,
            nonce_gate,
            builder,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubmissionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub fn builder(&self) -> &Arc<TxBuilder> {
        &self.builder
    }

    fn emit(&self, event: SubmissionEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    fn finish(&self, result: TxResult) -> TxResult {
        self.emit(SubmissionEvent::Finished(result.clone()));
        result
    }

    /// Drives `intent` to a terminal [`TxResult`].
    pub async fn submit(
        &self,
        account: &Account,
        intent: &TxIntent,
        cancel: &CancellationToken,
    ) -> TxResult {
        let prepared = match self.builder.prepare(intent) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: SUBMISSION_TARGET, "Build failed for {}: {}", intent, e);
                return self.finish(TxResult::failure(FailureClass::BuildError, e.to_string()));
            }
        };

        let address = account.address();
        let mut attempts = 0u32;
        let mut broadcasts = 0u32;
        let mut held_nonce: Option<u64> = None;
        let mut last_hash: Option<TxHash> = None;

        loop {
            if cancel.is_cancelled() {
                return self
                    .stop(
                        address,
                        &mut held_nonce,
                        FailureClass::Cancelled,
                        "cancelled before confirmation".to_string(),
                        last_hash,
                        attempts,
                        broadcasts,
                    )
                    .await;
            }

            attempts += 1;
            let mut attempt = TxAttempt::new(attempts);
            let connection = self.runtime.connection().current().await;
            let outcome = self
                .run_attempt(
                    account,
                    &prepared,
                    &connection,
                    &mut held_nonce,
                    &mut attempt,
                    cancel,
                )
                .await;
            if attempt.tx_hash.is_some() {
                broadcasts += 1;
                last_hash = attempt.tx_hash;
            }

            let (class, message, required) = match outcome {
                AttemptOutcome::Confirmed(hash, receipt) => {
                    attempt.state = AttemptState::Confirmed;
                    debug!(target: SUBMISSION_TARGET, "{:?}", attempt);
                    let mut result = TxResult::from_receipt(hash, &receipt);
                    result.attempts = attempts;
                    result.broadcasts = broadcasts;
                    return self.finish(result);
                }
                AttemptOutcome::Reverted(hash, receipt) => {
                    attempt.state = AttemptState::Reverted;
                    debug!(target: SUBMISSION_TARGET, "{:?}", attempt);
                    let mut result = TxResult::from_receipt(hash, &receipt);
                    result.attempts = attempts;
                    result.broadcasts = broadcasts;
                    return self.finish(result);
                }
                AttemptOutcome::Cancelled => {
                    return self
                        .stop(
                            address,
                            &mut held_nonce,
                            FailureClass::Cancelled,
                            "cancelled while waiting for funds".to_string(),
                            last_hash,
                            attempts,
                            broadcasts,
                        )
                        .await;
                }
                AttemptOutcome::Fatal(message) => {
                    return self
                        .stop(
                            address,
                            &mut held_nonce,
                            FailureClass::BuildError,
                            message,
                            last_hash,
                            attempts,
                            broadcasts,
                        )
                        .await;
                }
                AttemptOutcome::Failed {
                    class,
                    message,
                    required,
                } => (class, message, required),
            };

            attempt.state = match class {
                FailureClass::TransportFailure => AttemptState::TransportFailure,
                FailureClass::ReceiptTimeout => AttemptState::Timeout,
                _ => AttemptState::RejectedByNode,
            };
            warn!(
                target: SUBMISSION_TARGET,
                "Attempt {} for {} failed [{}]: {}", attempts, intent, class, message
            );
            debug!(target: SUBMISSION_TARGET, "{:?}", attempt);

            // Rotation happens even on the last attempt so the next intent
            // starts on a fresh route
            if class == FailureClass::TransportFailure {
                self.runtime.rotate(&connection).await;
            }

            if self.config.budget_exhausted(attempts) {
                return self
                    .stop(
                        address,
                        &mut held_nonce,
                        class,
                        message,
                        last_hash,
                        attempts,
                        broadcasts,
                    )
                    .await;
            }

            let proceed = match class {
                FailureClass::InsufficientFunds => {
                    let min = required.unwrap_or_else(|| prepared.max_cost(0) + self.config.gas_buffer);
                    self.nonce_gate
                        .wait_for_balance(address, min, cancel)
                        .await
                        .is_some()
                }
                FailureClass::NonceConflict => {
                    // The held nonce is burnt either way
                    held_nonce = None;
                    let delay = self
                        .config
                        .nonce_race_delay
                        .max(self.config.backoff.delay(attempts));
                    let slept = self.pause(delay, cancel).await;
                    if let Err(e) = self
                        .nonce_gate
                        .resync(address, is_nonce_too_high(&message))
                        .await
                    {
                        warn!(target: SUBMISSION_TARGET, "Nonce resync failed: {:#}", e);
                    }
                    slept
                }
                FailureClass::GasPriceStale => true,
                FailureClass::TransportFailure => {
                    self.pause(self.config.transport_delay, cancel).await
                }
                FailureClass::ReceiptTimeout => {
                    // Broadcast nonce stays consumed; the next attempt takes a fresh one
                    true
                }
                _ => self.pause(self.config.backoff.delay(attempts), cancel).await,
            };

            if !proceed {
                return self
                    .stop(
                        address,
                        &mut held_nonce,
                        FailureClass::Cancelled,
                        format!("cancelled after {}: {}", class, message),
                        last_hash,
                        attempts,
                        broadcasts,
                    )
                    .await;
            }
        }
    }

    async fn run_attempt(
        &self,
        account: &Account,
        prepared: &PreparedTx,
        connection: &Connection,
        held_nonce: &mut Option<u64>,
        attempt: &mut TxAttempt,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let address = account.address();

        if let Err(e) = self.runtime.connection().verify(connection).await {
            return AttemptOutcome::Failed {
                class: FailureClass::TransportFailure,
                message: format!("connection health check failed: {}", e),
                required: None,
            };
        }

        let gas_price = match connection.transport.gas_price().await {
            Ok(p) => p,
            Err(e) => return AttemptOutcome::from_error("gas price", &e),
        };
        attempt.gas_price = Some(gas_price);

        let nonce = match *held_nonce {
            Some(n) => n,
            None => match self.nonce_gate.next_nonce(address).await {
                Ok(n) => {
                    *held_nonce = Some(n);
                    n
                }
                Err(e) => return AttemptOutcome::from_error("nonce", &e),
            },
        };
        attempt.nonce = Some(nonce);

        let gas_cost = U256::from(prepared.gas_limit) * U256::from(gas_price);
        let required = prepared.value + gas_cost.max(self.config.gas_buffer);
        match connection.transport.balance(address).await {
            Ok(balance) if balance >= required => {}
            Ok(balance) => {
                info!(
                    target: SUBMISSION_TARGET,
                    "Balance {} below {} for {}, waiting for funds",
                    format_ether(balance),
                    format_ether(required),
                    account.short()
                );
                if self
                    .nonce_gate
                    .wait_for_balance(address, required, cancel)
                    .await
                    .is_none()
                {
                    return AttemptOutcome::Cancelled;
                }
            }
            Err(e) => return AttemptOutcome::from_error("balance", &e),
        }

        let request = prepared.request(nonce, gas_price);
        let envelope = match request.build(account.wallet()).await {
            Ok(envelope) => envelope,
            Err(e) => return AttemptOutcome::Fatal(format!("signing failed: {}", e)),
        };
        attempt.state = AttemptState::Signed;
        let raw = envelope.encoded_2718();

        let tx_hash = match connection.transport.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(e) => return AttemptOutcome::from_error("broadcast", &e),
        };
        *held_nonce = None;
        attempt.state = AttemptState::Broadcast;
        attempt.tx_hash = Some(tx_hash);

        info!(
            target: SUBMISSION_TARGET,
            "📤 {} nonce {} broadcast: {}", account.short(), nonce, tx_hash
        );
        self.emit(SubmissionEvent::Broadcast {
            from: address,
            attempt: attempt.number,
            nonce,
            tx_hash,
        });

        attempt.state = AttemptState::AwaitingReceipt;
        match self.await_receipt(tx_hash).await {
            Some(receipt) if receipt.status => AttemptOutcome::Confirmed(tx_hash, receipt),
            Some(receipt) => AttemptOutcome::Reverted(tx_hash, receipt),
            None => AttemptOutcome::Failed {
                class: FailureClass::ReceiptTimeout,
                message: format!(
                    "no receipt for {} after {}s",
                    tx_hash,
                    self.config.receipt_timeout.as_secs()
                ),
                required: None,
            },
        }
    }

    /// Polls for the receipt until the receipt timeout. Not cancellable: a
    /// broadcast nonce is always followed through.
    async fn await_receipt(&self, tx_hash: TxHash) -> Option<ReceiptSummary> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            let connection = self.runtime.connection().current().await;
            match connection.transport.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => debug!(target: SUBMISSION_TARGET, "Receipt poll for {} failed: {:#}", tx_hash, e),
            }
            if Instant::now() + self.config.receipt_poll > deadline {
                return None;
            }
            tokio::time::sleep(self.config.receipt_poll).await;
        }
    }

    /// Sleeps unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stop(
        &self,
        address: Address,
        held_nonce: &mut Option<u64>,
        class: FailureClass,
        message: String,
        last_hash: Option<TxHash>,
        attempts: u32,
        broadcasts: u32,
    ) -> TxResult {
        if let Some(nonce) = held_nonce.take() {
            self.nonce_gate.release(address, nonce).await;
        }
        let mut result = TxResult::failure(class, message);
        result.tx_hash = last_hash;
        result.attempts = attempts;
        result.broadcasts = broadcasts;
        self.finish(result)
    }
}
