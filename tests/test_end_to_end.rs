//! End-to-end scenarios through the public engine API
//!
//! - Sanctions ingestion moves a wallet from low to high risk and raises
//!   exactly one critical alert, even when the entry is ingested again
//! - Two rapid high-value transactions raise one velocity alert
//! - A batch that fails after the item was stored still raises its alerts
//!   when it is processed again, without publishing the item twice

mod common;

use common::{build_engine, test_config, tx, ScriptedChain};
use regwatch::pipeline::types::{AlertType, Document, Ingested, RiskLevel, Severity, SourceKind, StreamName};
use regwatch::query::QueryFacade;
use regwatch::risk::Verdict;
use std::sync::Arc;
use tempfile::tempdir;

fn demo_sanctions_doc() -> Document {
    Document::new(
        "ofac_sdn_9001",
        SourceKind::Sanctions,
        "OFAC SDN Entry: DEMO SANCTIONED ENTITY; Digital Currency Address - ETH 0xDEMO0001",
        1_700_000_000,
    )
    .with_risk(RiskLevel::Critical)
    .with_metadata("program", "CYBER2")
}

#[tokio::test]
async fn test_sanctions_ingestion_raises_risk_and_one_critical_alert() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("e2e.db"), &[("ENGINE_BACKEND", "fallback")]);
    let ctx = Arc::new(build_engine(config, Arc::new(ScriptedChain::new()), Vec::new()).await);
    let facade = QueryFacade::new(ctx.clone());

    let before = facade.wallet_risk("0xDEMO0001").await.unwrap();
    assert!(before.score < 40, "score before ingestion: {}", before.score);
    assert_eq!(before.verdict, Verdict::Low);

    let summary = facade.ingest(vec![demo_sanctions_doc()]).await.unwrap();
    assert_eq!(summary.published, 1);

    // Not tracked: the sanctions alert is raised by this first risk query
    let after = facade.wallet_risk("0xDEMO0001").await.unwrap();
    assert!(after.score >= 70, "score after ingestion: {}", after.score);
    assert_eq!(after.verdict, Verdict::High);
    assert!(after.reasons[0].starts_with("sanctions_match"));

    // Same entry again: nothing new published, no second alert
    let again = facade.ingest(vec![demo_sanctions_doc()]).await.unwrap();
    assert_eq!(again.published, 0);
    facade.wallet_risk("0xdemo0001").await.unwrap();
    facade.wallet_compliance("0xDEMO0001").await.unwrap();

    let alerts = ctx.store().alerts(Some("0xdemo0001")).unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(ctx.store().get_wallet("0xdemo0001").unwrap().is_none());
    assert_eq!(alerts[0].alert_type, AlertType::SanctionsMatch);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].evidence_refs, vec!["ofac_sdn_9001".to_string()]);

    let critical = ctx.store().read_stream(StreamName::CriticalAlerts, None, None, 10).unwrap();
    assert_eq!(critical.len(), 1);

    assert_eq!(ctx.store().count_documents().unwrap(), 1);
    assert_eq!(ctx.pipeline().index().len(), 1);
}

#[tokio::test]
async fn test_sanctions_alert_for_tracked_wallet_on_ingestion() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("tracked.db"), &[("ENGINE_BACKEND", "fallback")]);
    let chain = Arc::new(ScriptedChain::new());
    chain.push_ok(Vec::new(), Some(1));
    let ctx = Arc::new(build_engine(config, chain, Vec::new()).await);
    let facade = QueryFacade::new(ctx.clone());

    facade.connect_wallet("0xDEMO0001").await.unwrap();
    let summary = facade.ingest(vec![demo_sanctions_doc()]).await.unwrap();
    assert_eq!(summary.alerts, 1);

    let wallet_alerts = ctx
        .store()
        .read_stream(StreamName::WalletAlerts, None, Some("0xdemo0001"), 10)
        .unwrap();
    assert_eq!(wallet_alerts.len(), 1);

    let compliance = facade.wallet_compliance("0xDEMO0001").await.unwrap();
    assert_eq!(compliance.regulatory_flags, vec!["OFAC_SANCTIONS_MATCH".to_string()]);
    assert!(compliance.recommendations[0].starts_with("IMMEDIATE"));
    assert_eq!(ctx.store().alerts(Some("0xdemo0001")).unwrap().len(), 1);
}

#[tokio::test]
async fn test_two_rapid_high_value_transfers_raise_one_velocity_alert() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("velocity.db"), &[("ENGINE_BACKEND", "fallback")]);
    let ctx = build_engine(config, Arc::new(ScriptedChain::new()), Vec::new()).await;

    let wallet = "0x1111111111111111111111111111111111111111";
    let now = chrono::Utc::now().timestamp();
    let first = tx("0xaa01", wallet, "0x2222222222222222222222222222222222222222", 25.0, now - 60, 100);
    let second = tx("0xaa02", wallet, "0x3333333333333333333333333333333333333333", 30.0, now - 30, 101);

    ctx.pipeline()
        .process(StreamName::WalletTransactions, vec![Ingested::Transaction(first)])
        .await
        .unwrap();
    ctx.pipeline()
        .process(StreamName::WalletTransactions, vec![Ingested::Transaction(second)])
        .await
        .unwrap();

    let alerts = ctx.store().alerts(Some(wallet)).unwrap();
    let velocity: Vec<_> = alerts.iter().filter(|a| a.alert_type == AlertType::Velocity).collect();
    assert_eq!(velocity.len(), 1);
    assert_eq!(velocity[0].severity, Severity::Medium);
    assert!(alerts.iter().all(|a| a.alert_type != AlertType::HighValueTx));

    let processed = ctx
        .store()
        .read_stream(StreamName::WalletTransactionsProcessed, None, Some(wallet), 10)
        .unwrap();
    assert_eq!(processed.len(), 2);
}

fn hide_alerts_table(db_path: &std::path::Path, hidden: bool) {
    let conn = rusqlite::Connection::open(db_path).unwrap();
    let sql = if hidden {
        "ALTER TABLE alerts RENAME TO alerts_hidden"
    } else {
        "ALTER TABLE alerts_hidden RENAME TO alerts"
    };
    conn.execute_batch(sql).unwrap();
}

#[tokio::test]
async fn test_failed_alert_stage_is_completed_on_retry() {
    for overrides in [
        vec![("ENGINE_BACKEND", "fallback")],
        vec![("ENGINE_BACKEND", "incremental"), ("ENGINE_LICENSE_KEY", "test-key")],
    ] {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("retry.db");
        let chain = Arc::new(ScriptedChain::new());
        let ctx = Arc::new(build_engine(test_config(&db_path, &overrides), chain, Vec::new()).await);
        let facade = QueryFacade::new(ctx.clone());
        facade.connect_wallet("0xDEMO0001").await.unwrap();

        let wallet = "0x1111111111111111111111111111111111111111";
        let big = tx(
            "0xbb01",
            wallet,
            "0x2222222222222222222222222222222222222222",
            150.0,
            chrono::Utc::now().timestamp() - 10,
            7,
        );

        hide_alerts_table(&db_path, true);
        assert!(facade.ingest(vec![demo_sanctions_doc()]).await.is_err());
        assert!(ctx
            .pipeline()
            .process(StreamName::WalletTransactions, vec![Ingested::Transaction(big.clone())])
            .await
            .is_err());
        hide_alerts_table(&db_path, false);

        let retry = facade.ingest(vec![demo_sanctions_doc()]).await.unwrap();
        assert_eq!(retry.alerts, 1, "backend {:?}", overrides);
        assert_eq!(retry.published, 0);
        let retry = ctx
            .pipeline()
            .process(StreamName::WalletTransactions, vec![Ingested::Transaction(big)])
            .await
            .unwrap();
        assert_eq!(retry.alerts, 1);

        let store = ctx.store();
        assert_eq!(store.alerts(Some("0xdemo0001")).unwrap().len(), 1);
        let high_value = store.alerts(Some(wallet)).unwrap();
        assert_eq!(high_value.len(), 1);
        assert_eq!(high_value[0].alert_type, AlertType::HighValueTx);
        assert_eq!(store.read_stream(StreamName::Sanctions, None, None, 10).unwrap().len(), 1);
        assert_eq!(
            store
                .read_stream(StreamName::WalletTransactions, None, Some(wallet), 10)
                .unwrap()
                .len(),
            1
        );

        // Committed now: a third pass is a no-op
        let again = facade.ingest(vec![demo_sanctions_doc()]).await.unwrap();
        assert_eq!(again.added, 0);
    }
}
