mod common;

use common::*;
use martius_bot::NonceGate;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn gate(chain: &Arc<MockChain>) -> Arc<NonceGate> {
    Arc::new(NonceGate::new(connection(chain), Duration::from_millis(5)))
}

#[tokio::test]
async fn test_nonces_start_at_chain_count_and_increase() {
    let chain = MockChain::new();
    let gate = gate(&chain);
    let addr = account().address();

    assert_eq!(gate.next_nonce(addr).await.unwrap(), START_NONCE);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), START_NONCE + 1);

    // the chain is only read once; later counts do not move the cursor back
    chain.pending.store(0, Ordering::SeqCst);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), START_NONCE + 2);
}

#[tokio::test]
async fn test_concurrent_issuance_never_repeats() {
    let chain = MockChain::new();
    let gate = gate(&chain);
    let addr = account().address();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.next_nonce(addr).await.unwrap() })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap()));
    }
    let expected: HashSet<u64> = (START_NONCE..START_NONCE + 32).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_release_reissues_lowest_first() {
    let chain = MockChain::new();
    let gate = gate(&chain);
    let addr = account().address();

    let a = gate.next_nonce(addr).await.unwrap();
    let b = gate.next_nonce(addr).await.unwrap();
    let c = gate.next_nonce(addr).await.unwrap();

    // releasing the newest just rolls the cursor back
    gate.release(addr, c).await;
    assert_eq!(gate.peek(addr).await, Some(c));

    gate.release(addr, a).await;
    assert_eq!(gate.next_nonce(addr).await.unwrap(), a);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), c);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), c + 1);
    assert!(b > a);
}

#[tokio::test]
async fn test_release_collapses_trailing_run() {
    let chain = MockChain::new();
    let gate = gate(&chain);
    let addr = account().address();

    let a = gate.next_nonce(addr).await.unwrap();
    let b = gate.next_nonce(addr).await.unwrap();
    gate.release(addr, a).await;
    gate.release(addr, b).await;

    assert_eq!(gate.peek(addr).await, Some(a));
    assert_eq!(gate.next_nonce(addr).await.unwrap(), a);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), b);
}

#[tokio::test]
async fn test_resync_forward_and_rewind() {
    let chain = MockChain::new();
    let gate = gate(&chain);
    let addr = account().address();

    gate.next_nonce(addr).await.unwrap();
    chain.pending.store(20, Ordering::SeqCst);
    assert_eq!(gate.resync(addr, false).await.unwrap(), 20);

    // forward-only unless asked to rewind
    chain.pending.store(8, Ordering::SeqCst);
    assert_eq!(gate.resync(addr, false).await.unwrap(), 20);
    assert_eq!(gate.resync(addr, true).await.unwrap(), 8);
    assert_eq!(gate.next_nonce(addr).await.unwrap(), 8);
}

#[tokio::test]
async fn test_wait_for_balance_returns_at_threshold() {
    let chain = MockChain::new();
    chain.set_balance(ether("0"));
    let gate = gate(&chain);
    let addr = account().address();

    let funder = {
        let chain = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            chain.set_balance(ether("0.5"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            chain.set_balance(ether("1"));
        })
    };

    let balance = gate
        .wait_for_balance(addr, ether("1"), &CancellationToken::new())
        .await
        .unwrap();
    funder.await.unwrap();
    assert!(balance >= ether("1"));
}

#[tokio::test]
async fn test_wait_for_balance_cancelled() {
    let chain = MockChain::new();
    chain.set_balance(ether("0"));
    let gate = gate(&chain);

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        })
    };

    let result = gate
        .wait_for_balance(account().address(), ether("1"), &token)
        .await;
    canceller.await.unwrap();
    assert!(result.is_none());
}
