//! Wallet tracker lifecycle against a scripted chain source
//!
//! Polls are driven explicitly with `poll_once`; the engine is never
//! started, so no background polling task competes with the test.

mod common;

use common::{build_engine, build_engine_with_chain, test_config, tx, ScriptedChain};
use regwatch::connectors::chain::ChainConnector;
use regwatch::connectors::denylist::StaticDenylist;
use regwatch::connectors::rate_budget::RateBudget;
use regwatch::connectors::transport::ScriptedTransport;
use regwatch::connectors::ConnectorError;
use regwatch::pipeline::health::ConnectorStatus;
use regwatch::pipeline::types::StreamName;
use regwatch::pipeline::EngineContext;
use regwatch::wallet::{WalletError, WalletState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const WALLET: &str = "0x7777777777777777777777777777777777777777";
const PEER: &str = "0x8888888888888888888888888888888888888888";

#[tokio::test]
async fn test_connect_is_idempotent_and_failures_degrade_then_stop() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("wallets.db");
    let config = test_config(&db_path, &[("ENGINE_BACKEND", "fallback")]);
    let chain = Arc::new(ScriptedChain::new());
    chain.push_ok(vec![tx("0xc1", WALLET, PEER, 1.0, 1_700_000_000, 100)], Some(100));

    let ctx = build_engine(config.clone(), chain.clone(), Vec::new()).await;
    let tracker = ctx.tracker().clone();

    let sub = tracker.connect(WALLET).await.unwrap();
    assert_eq!(sub.state, WalletState::Active);
    assert_eq!(sub.tx_cursor, Some(100));
    assert_eq!(chain.calls(), vec![(WALLET.to_string(), None)]);

    // Already active: same snapshot, no extra poll
    let again = tracker.connect(&WALLET.to_uppercase().replacen("0X", "0x", 1)).await.unwrap();
    assert_eq!(again, sub);
    assert_eq!(chain.calls().len(), 1);

    chain.push_transient(5);
    for _ in 0..4 {
        assert_eq!(tracker.poll_once(WALLET).await.unwrap().state, WalletState::Active);
    }
    let degraded = tracker.poll_once(WALLET).await.unwrap();
    assert_eq!(degraded.state, WalletState::Degraded);
    assert_eq!(degraded.consecutive_failures, 5);
    assert_eq!(ctx.health().unwrap().wallets.degraded, 1);

    // Recovery, then a stale cursor from the explorer must not move it back
    chain.push_ok(Vec::new(), Some(90));
    let recovered = tracker.poll_once(WALLET).await.unwrap();
    assert_eq!(recovered.state, WalletState::Active);
    assert_eq!(recovered.consecutive_failures, 0);
    assert_eq!(recovered.tx_cursor, Some(100));

    chain.push_ok(vec![tx("0xc2", WALLET, PEER, 2.0, 1_700_000_100, 120)], Some(120));
    assert_eq!(tracker.poll_once(WALLET).await.unwrap().tx_cursor, Some(120));

    chain.push_transient(10);
    let mut last = None;
    for _ in 0..10 {
        last = Some(tracker.poll_once(WALLET).await.unwrap());
    }
    let stopped = last.unwrap();
    assert_eq!(stopped.state, WalletState::Stopped);
    assert_eq!(stopped.tx_cursor, Some(120));
    assert!(stopped.last_error.is_some());

    // Stopped wallets are not polled
    let calls = chain.calls().len();
    tracker.poll_once(WALLET).await.unwrap();
    assert_eq!(chain.calls().len(), calls);

    let txs = ctx
        .store()
        .read_stream(StreamName::WalletTransactions, None, Some(WALLET), 10)
        .unwrap();
    assert_eq!(txs.len(), 2);
    drop(ctx);

    // Restart on the same database: state and cursor survive
    let restarted = build_engine(config, chain.clone(), Vec::new()).await;
    let tracker = restarted.tracker().clone();
    let persisted = tracker.status(WALLET).unwrap();
    assert_eq!(persisted.state, WalletState::Stopped);
    assert_eq!(persisted.tx_cursor, Some(120));

    // Explicit reconnect resumes from the persisted cursor
    let resumed = tracker.connect(WALLET).await.unwrap();
    assert_eq!(resumed.state, WalletState::Active);
    assert_eq!(chain.calls().last().unwrap(), &(WALLET.to_string(), Some(120)));
}

#[tokio::test]
async fn test_fatal_error_stops_and_stop_is_explicit() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("fatal.db"), &[("ENGINE_BACKEND", "fallback")]);
    let chain = Arc::new(ScriptedChain::new());
    chain.push(Err(ConnectorError::Fatal("Invalid API Key".to_string())));

    let ctx = build_engine(config, chain.clone(), Vec::new()).await;
    let tracker = ctx.tracker().clone();

    let sub = tracker.connect(WALLET).await.unwrap();
    assert_eq!(sub.state, WalletState::Stopped);
    assert_eq!(sub.last_error.as_deref(), Some("Invalid API Key"));

    let sub = tracker.connect(WALLET).await.unwrap();
    assert_eq!(sub.state, WalletState::Active);
    let stopped = tracker.stop(WALLET).unwrap();
    assert_eq!(stopped.state, WalletState::Stopped);

    assert!(matches!(tracker.stop(PEER), Err(WalletError::NotFound(_))));
    assert!(matches!(tracker.connect("not-an-address").await, Err(WalletError::InvalidAddress(_))));
    assert_eq!(tracker.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_started_engine_resumes_and_joins_wallet_tasks() {
    let dir = tempdir().unwrap();
    let config = test_config(
        &dir.path().join("resume.db"),
        &[("ENGINE_BACKEND", "fallback"), ("WALLET_POLL_INTERVAL_SECS", "3600")],
    );
    let chain = Arc::new(ScriptedChain::new());
    chain.push_ok(Vec::new(), Some(5));

    let ctx = build_engine(config, chain.clone(), Vec::new()).await;
    ctx.tracker().connect(WALLET).await.unwrap();
    assert_eq!(ctx.tracker().active_tasks(), 0);

    ctx.start().await.unwrap();
    assert_eq!(ctx.tracker().active_tasks(), 1);

    ctx.stop().await;
    assert_eq!(ctx.tracker().active_tasks(), 0);
    assert_eq!(chain.calls().len(), 1);
}

#[tokio::test]
async fn test_spent_chain_budget_skips_polls_without_counting_failures() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("budget.db"), &[("ENGINE_BACKEND", "fallback")]);
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(
        r#"{"status":"0","message":"No transactions found","result":[]}"#.to_string(),
    )]));
    let chain = Arc::new(ChainConnector::new(
        transport.clone(),
        Arc::new(StaticDenylist::default()),
        "https://explorer.test/api",
        Some("key".to_string()),
        1,
        10.0,
        RateBudget::new(1, Duration::from_secs(3_600)),
    ));

    let ctx = build_engine_with_chain(config, chain, Vec::new()).await;
    let tracker = ctx.tracker().clone();
    assert_eq!(tracker.connect(WALLET).await.unwrap().state, WalletState::Active);

    for _ in 0..10 {
        let sub = tracker.poll_once(WALLET).await.unwrap();
        assert_eq!(sub.state, WalletState::Active);
        assert_eq!(sub.consecutive_failures, 0);
        assert!(sub.last_error.is_none());
    }
    assert_eq!(transport.requests().len(), 1);

    let chain_health = ctx.health_registry().get("chain").unwrap();
    assert_eq!(chain_health.status, ConnectorStatus::RateLimited);
    assert_eq!(chain_health.consecutive_failures, 0);
    assert!(ctx.health().unwrap().healthy);
}

#[tokio::test]
async fn test_wallet_polls_are_reported_as_chain_health() {
    let dir = tempdir().unwrap();
    let config = test_config(
        &dir.path().join("chain_health.db"),
        &[("ENGINE_BACKEND", "fallback"), ("CONNECTOR_DEGRADE_AFTER_FAILURES", "2")],
    );
    let chain = Arc::new(ScriptedChain::new());
    let ctx = build_engine(config, chain.clone(), Vec::new()).await;
    let tracker = ctx.tracker().clone();
    assert_eq!(ctx.health_registry().get("chain").unwrap().status, ConnectorStatus::Idle);

    chain.push_ok(vec![tx("0xd1", WALLET, PEER, 1.0, 1_700_000_000, 10)], Some(10));
    tracker.connect(WALLET).await.unwrap();
    let healthy = ctx.health_registry().get("chain").unwrap();
    assert_eq!(healthy.status, ConnectorStatus::Healthy);
    assert_eq!(healthy.documents_processed, 1);

    chain.push_transient(2);
    tracker.poll_once(WALLET).await.unwrap();
    tracker.poll_once(WALLET).await.unwrap();
    let degraded = ctx.health_registry().get("chain").unwrap();
    assert_eq!(degraded.status, ConnectorStatus::Degraded);
    assert_eq!(degraded.last_error.as_deref(), Some("Transient source error: timeout #2"));
    assert!(!ctx.health().unwrap().healthy);

    tracker.poll_once(WALLET).await.unwrap();
    assert_eq!(ctx.health_registry().get("chain").unwrap().status, ConnectorStatus::Healthy);
}

#[tokio::test]
async fn test_missing_explorer_key_disables_chain_source() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("no_key.db"), &[("ENGINE_BACKEND", "fallback")]);
    let ctx = EngineContext::from_config(config).await.unwrap();

    let chain_health = ctx.health_registry().get("chain").unwrap();
    assert_eq!(chain_health.status, ConnectorStatus::Disabled);
    assert_eq!(
        chain_health.last_error.as_deref(),
        Some("Fatal source error: ETHERSCAN_API_KEY not configured")
    );
    for feed in ["rss_sec", "rss_cftc", "rss_finra"] {
        assert_eq!(ctx.health_registry().get(feed).unwrap().status, ConnectorStatus::Idle);
    }

    let sub = ctx.tracker().connect(WALLET).await.unwrap();
    assert_eq!(sub.state, WalletState::Stopped);
    assert_eq!(ctx.health_registry().get("chain").unwrap().status, ConnectorStatus::Disabled);
}
