mod common;

use common::*;
use core_logic::FailureClass;
use martius_bot::{to_wei, RetryMode, SubmissionEvent, SubmissionObserver, TxIntent};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const BOUNDED: RetryMode = RetryMode::Bounded { max_attempts: 3 };

#[derive(Default)]
struct EventLog(Mutex<Vec<SubmissionEvent>>);

impl SubmissionObserver for EventLog {
    fn on_event(&self, event: &SubmissionEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn test_transfer_confirms_with_exact_payload() {
    let harness = Harness::new(MockChain::new());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let recipient = martius_bot::parse_recipient("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
    let amount = to_wei(0.0025).unwrap();
    let intent = TxIntent::transfer(account.address(), recipient, amount);

    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.broadcasts, 1);
    assert_eq!(result.block_number, Some(1_001));
    assert!(result.classification.is_none());

    let sent = harness.chain.accepted();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].to.map(|a| a.to_checksum(None)).as_deref(),
        Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed")
    );
    assert_eq!(sent[0].value, ether("0.0025"));
    assert_eq!(sent[0].nonce, START_NONCE);
    assert!(sent[0].input.is_empty());
}

#[tokio::test]
async fn test_zero_balance_blocks_until_funded() {
    let chain = MockChain::new();
    chain.set_balance(ether("0"));
    chain.gas_price.store(1, Ordering::SeqCst);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.01"),
    );

    let funder = {
        let chain = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            chain.set_balance(ether("0.0149"));
            assert!(chain.sent().is_empty());
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(chain.sent().is_empty());
            chain.set_balance(ether("0.015"));
        })
    };

    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;
    funder.await.unwrap();

    assert!(result.success, "{:?}", result);
    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].balance >= ether("0.015"));
}

#[tokio::test]
async fn test_nonce_too_low_takes_fresh_nonce() {
    let chain = MockChain::new();
    chain.reject_next_and_advance("nonce too low", 1);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.attempts, 2);

    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert!(!sent[0].accepted);
    assert!(sent[1].accepted);
    assert_ne!(sent[0].nonce, sent[1].nonce);
    assert_ne!(sent[0].raw, sent[1].raw);
    assert_eq!(sent[1].nonce, START_NONCE + 1);
}

#[tokio::test]
async fn test_insufficient_funds_reuses_nonce() {
    let chain = MockChain::new();
    chain.reject_next("insufficient funds for gas * price + value");
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE);
}

#[tokio::test]
async fn test_transport_failures_rotate_each_attempt() {
    let chain = MockChain::new();
    chain.transport_failures.store(10, Ordering::SeqCst);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.classification, Some(FailureClass::TransportFailure));
    assert_eq!(result.attempts, 3);
    assert_eq!(result.broadcasts, 0);
    assert!(result.tx_hash.is_none());
    assert_eq!(harness.connection.rotations(), 3);

    // every retry re-signed the same nonce, which is handed back at the end
    assert!(chain.sent().iter().all(|t| t.nonce == START_NONCE));
    assert_eq!(
        harness.nonce_gate.peek(account.address()).await,
        Some(START_NONCE)
    );
}

#[tokio::test]
async fn test_unhealthy_connection_rotates_until_healthy() {
    let chain = MockChain::new();
    chain.health_failures.store(2, Ordering::SeqCst);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(RetryMode::Bounded { max_attempts: 5 });
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.attempts, 3);
    assert_eq!(harness.connection.rotations(), 2);
}

#[tokio::test]
async fn test_receipt_timeout_retries_with_fresh_nonce() {
    let chain = MockChain::new();
    chain.withheld_receipts.store(1, Ordering::SeqCst);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.broadcasts, 2);

    let sent = chain.accepted();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE + 1);
}

#[tokio::test]
async fn test_reverted_is_terminal() {
    let chain = MockChain::new();
    chain.revert.store(true, Ordering::SeqCst);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::deploy(account.address(), "Counter");
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.classification, Some(FailureClass::Reverted));
    assert_eq!(result.attempts, 1);
    assert!(result.tx_hash.is_some());
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_deploy_takes_address_from_receipt() {
    let chain = MockChain::new();
    let harness = Harness::new(chain.clone());
    let events = Arc::new(EventLog::default());
    let engine = harness.engine(BOUNDED).with_observer(events.clone());
    let account = account();

    let intent = TxIntent::deploy(account.address(), "Greeter");
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.contract_address, Some(CREATED));

    let sent = chain.accepted();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].to.is_none());
    // bytecode followed by the ABI-encoded "Hello Rome" constructor argument
    assert!(sent[0].input.starts_with(&[0x60, 0x80, 0x60, 0x40, 0x52]));
    assert!(sent[0].input.len() > 5 + 64);

    let events = events.0.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        SubmissionEvent::Broadcast { nonce: START_NONCE, .. }
    ));
    assert!(matches!(&events[1], SubmissionEvent::Finished(r) if r.success));
}

#[tokio::test]
async fn test_build_error_never_broadcasts() {
    let chain = MockChain::new();
    let mut catalog = catalog();
    catalog.insert(mismatched_greeter());
    let harness = Harness::with_catalog(chain.clone(), catalog);
    let engine = harness.engine(RetryMode::Persistent);
    let account = account();

    let intent = TxIntent::deploy(account.address(), "Greeter");
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.classification, Some(FailureClass::BuildError));
    assert_eq!(result.broadcasts, 0);
    assert!(chain.sent().is_empty());
    assert_eq!(harness.nonce_gate.peek(account.address()).await, None);
}

#[tokio::test]
async fn test_persistent_mode_stops_on_cancel() {
    let chain = MockChain::new();
    for _ in 0..1_000 {
        chain.reject_next("execution rejected by policy");
    }
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(RetryMode::Persistent);
    let account = account();

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            token.cancel();
        })
    };

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine.submit(&account, &intent, &token).await;
    canceller.await.unwrap();

    assert!(!result.success);
    assert_eq!(result.classification, Some(FailureClass::Cancelled));
    assert!(result.attempts > 1);
    assert_eq!(result.broadcasts, 0);
    // the never-broadcast nonce goes back to the gate
    assert_eq!(
        harness.nonce_gate.peek(account.address()).await,
        Some(START_NONCE)
    );
}

#[tokio::test]
async fn test_underpriced_retries_same_nonce() {
    let chain = MockChain::new();
    chain.reject_next("replacement transaction underpriced");
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.attempts, 2);
    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE);
}

#[tokio::test]
async fn test_gas_price_too_low_refetches_price() {
    let chain = MockChain::new();
    chain.reject_next_and_reprice("transaction gas price too low", 3_000_000_000);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].gas_price, 1_000_000_000);
    assert_eq!(sent[1].gas_price, 3_000_000_000);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE);
}

#[tokio::test]
async fn test_already_known_takes_fresh_nonce() {
    let chain = MockChain::new();
    chain.reject_next_and_advance("already known", 1);
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE);
    assert_eq!(sent[1].nonce, START_NONCE + 1);
    assert_ne!(sent[0].raw, sent[1].raw);
}

#[tokio::test]
async fn test_nonce_too_high_rewinds_to_chain_count() {
    let chain = MockChain::new();
    let harness = Harness::new(chain.clone());
    let engine = harness.engine(BOUNDED);
    let account = account();

    // the local cursor has drifted two ahead of the node
    harness.nonce_gate.next_nonce(account.address()).await.unwrap();
    harness.nonce_gate.next_nonce(account.address()).await.unwrap();
    chain.reject_next("nonce too high: next nonce 5, tx nonce 7");

    let intent = TxIntent::transfer(
        account.address(),
        martius_bot::interactions::random_address(),
        ether("0.001"),
    );
    let result = engine
        .submit(&account, &intent, &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.attempts, 2);
    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].nonce, START_NONCE + 2);
    assert!(!sent[0].accepted);
    assert_eq!(sent[1].nonce, START_NONCE);
    assert!(sent[1].accepted);
}
