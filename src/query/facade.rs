//! Read surface over streams, the vector index and wallet history
//!
//! Every projection is computed from stored documents, transactions and
//! alerts. A stream whose source connector is degraded or disabled is
//! reported with `available: false`; stored records are still returned but
//! nothing is ever synthesised in place of the missing feed.

use crate::connectors::ConnectorError;
use crate::index::IndexError;
use crate::pipeline::config::ComplianceRules;
use crate::pipeline::context::EngineContext;
use crate::pipeline::db::StoreError;
use crate::pipeline::engine::{BatchSummary, EngineError};
use crate::pipeline::health::HealthReport;
use crate::pipeline::types::{normalize_address, Alert, Document, StreamName, StreamRecord, Transaction};
use crate::pipeline::windows::{RollingWindow, TxWindow};
use crate::risk::{RiskAssessment, Verdict};
use crate::wallet::tracker::{validate_address, CHAIN_CONNECTOR};
use crate::wallet::{WalletError, WalletSubscription};
use chrono::{TimeZone, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_STREAM_LIMIT: usize = 50;
pub const MAX_STREAM_LIMIT: usize = 500;
pub const MAX_SEARCH_K: usize = 50;

#[derive(Debug)]
pub enum QueryError {
    NotFound(String),
    BadRequest(String),
    /// Source or engine cannot serve the request right now
    Unavailable(String),
    Internal(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::NotFound(msg) => write!(f, "Not found: {}", msg),
            QueryError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            QueryError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            QueryError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        QueryError::Internal(err.to_string())
    }
}

impl From<IndexError> for QueryError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Provider(e) => QueryError::Unavailable(e.to_string()),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for QueryError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Index(e) => e.into(),
            EngineError::Source(ConnectorError::Transient(msg)) => QueryError::Unavailable(msg),
            EngineError::Source(e @ ConnectorError::RateLimited(_)) => QueryError::Unavailable(e.to_string()),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

impl From<WalletError> for QueryError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAddress(a) => QueryError::BadRequest(format!("invalid wallet address: {}", a)),
            WalletError::NotFound(a) => QueryError::NotFound(format!("wallet not tracked: {}", a)),
            WalletError::Store(e) => e.into(),
            WalletError::Engine(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamQuery {
    pub limit: Option<usize>,
    pub wallet_address: Option<String>,
    pub after_seq: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamPage {
    pub stream: StreamName,
    pub available: bool,
    /// Set when `available` is false
    pub status: Option<String>,
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document: Document,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionsCheck {
    Clear,
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceStatus {
    pub wallet_address: String,
    pub tracking: Option<WalletSubscription>,
    pub risk: RiskAssessment,
    pub sanctions_check: SanctionsCheck,
    pub regulatory_flags: Vec<String>,
    pub high_risk_counterparties: Vec<String>,
    pub risk_indicators: Vec<String>,
    pub recommendations: Vec<String>,
    pub checked_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub total_transactions: usize,
    pub recent_transactions: usize,
    pub total_volume: f64,
    pub high_value_transactions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegulatoryRequirements {
    pub kyc_required: bool,
    pub reporting_required: bool,
    pub enhanced_monitoring: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    pub report_id: String,
    pub generated_at: i64,
    pub wallet_address: String,
    pub compliance: ComplianceStatus,
    pub transaction_summary: TransactionSummary,
    pub alert_history: Vec<Alert>,
    pub regulatory_requirements: RegulatoryRequirements,
}

/// Which connector feeds a stream, for availability reporting
fn source_for(stream: StreamName) -> Option<&'static str> {
    match stream {
        StreamName::Sanctions => Some("ofac_sdn"),
        StreamName::RealtimeNews | StreamName::ProcessedNews | StreamName::HighPriorityNews => Some("news"),
        StreamName::WalletTransactions | StreamName::WalletTransactionsProcessed => Some(CHAIN_CONNECTOR),
        _ => None,
    }
}

const DAY_SECS: i64 = 86_400;
const HOUR_SECS: i64 = 3_600;

/// Pattern indicators over a wallet's transactions as of `now`
pub fn risk_indicators(transactions: &[Transaction], rules: &ComplianceRules, now: i64) -> Vec<String> {
    let mut indicators = Vec::new();
    if transactions.is_empty() {
        return indicators;
    }

    if TxWindow::ending_at(HOUR_SECS, now, transactions).len() > rules.suspicious_frequency_per_hour {
        indicators.push("high_transaction_frequency".to_string());
    }

    if TxWindow::ending_at(DAY_SECS, now, transactions).total_value() > rules.daily_velocity_eth {
        indicators.push("high_transaction_velocity".to_string());
    }

    // More than half of the last ten between 22:00 and 06:00 UTC
    let mut latest: Vec<&Transaction> = transactions.iter().collect();
    latest.sort_by_key(|t| std::cmp::Reverse(t.timestamp));
    let night = latest
        .iter()
        .take(10)
        .filter_map(|t| Utc.timestamp_opt(t.timestamp, 0).single())
        .filter(|dt| dt.hour() < 6 || dt.hour() >= 22)
        .count();
    if night > 5 {
        indicators.push("unusual_timing_pattern".to_string());
    }

    indicators
}

pub fn recommendations(sanctions: SanctionsCheck, verdict: Verdict, indicators: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    if sanctions == SanctionsCheck::Flagged {
        out.push("IMMEDIATE: Freeze all transactions and report to authorities".to_string());
    }
    if verdict == Verdict::High && sanctions == SanctionsCheck::Clear {
        out.push("Escalate for manual compliance review".to_string());
    }
    if indicators.iter().any(|i| i == "high_transaction_frequency") {
        out.push("Enhanced monitoring recommended".to_string());
    }
    if indicators.iter().any(|i| i == "high_transaction_velocity") {
        out.push("Consider filing Suspicious Activity Report (SAR)".to_string());
    }
    if out.is_empty() {
        out.push("Continue standard monitoring".to_string());
    }
    out
}

pub fn regulatory_requirements(transactions: &[Transaction], rules: &ComplianceRules) -> RegulatoryRequirements {
    let volume: f64 = transactions.iter().map(|t| t.value).sum();
    RegulatoryRequirements {
        kyc_required: volume > rules.kyc_threshold_eth,
        reporting_required: transactions.iter().any(|t| t.value > rules.reporting_threshold_eth),
        enhanced_monitoring: volume > rules.enhanced_monitoring_eth,
    }
}

pub struct QueryFacade {
    ctx: Arc<EngineContext>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl QueryFacade {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self::new_with_timestamp_fn(ctx, Box::new(|| chrono::Utc::now().timestamp()))
    }

    pub fn new_with_timestamp_fn(ctx: Arc<EngineContext>, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self { ctx, now_fn }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Records of one stream in ascending `seq` order
    pub fn stream(&self, name: &str, query: StreamQuery) -> Result<StreamPage, QueryError> {
        let stream: StreamName = name.parse().map_err(QueryError::NotFound)?;
        let limit = query.limit.unwrap_or(DEFAULT_STREAM_LIMIT).clamp(1, MAX_STREAM_LIMIT);
        let wallet = query.wallet_address.as_deref().map(normalize_address);

        let records = self
            .ctx
            .store()
            .read_stream(stream, query.after_seq, wallet.as_deref(), limit)?;

        let unavailable = source_for(stream)
            .and_then(|source| self.ctx.health_registry().get(source))
            .filter(|h| !h.status.is_available());

        Ok(match unavailable {
            Some(h) => StreamPage {
                stream,
                available: false,
                status: Some(match h.last_error {
                    Some(e) => format!("source unavailable: {}", e),
                    None => "source unavailable".to_string(),
                }),
                records,
            },
            None => StreamPage {
                stream,
                available: true,
                status: None,
                records,
            },
        })
    }

    pub async fn connect_wallet(&self, address: &str) -> Result<WalletSubscription, QueryError> {
        Ok(self.ctx.tracker().connect(address).await?)
    }

    pub fn wallet_status(&self, address: &str) -> Result<WalletSubscription, QueryError> {
        Ok(self.ctx.tracker().status(address)?)
    }

    pub fn stop_wallet(&self, address: &str) -> Result<WalletSubscription, QueryError> {
        Ok(self.ctx.tracker().stop(address)?)
    }

    pub fn wallets(&self) -> Result<Vec<WalletSubscription>, QueryError> {
        Ok(self.ctx.tracker().list()?)
    }

    /// Score an address; raises any sanctions alert not yet recorded for it
    pub async fn wallet_risk(&self, address: &str) -> Result<RiskAssessment, QueryError> {
        let address = validate_address(address)?;
        self.ctx.pipeline().alerts().check_wallet_sanctions(&address)?;
        Ok(self.ctx.scorer().assess(&address, (self.now_fn)()).await?)
    }

    pub async fn wallet_compliance(&self, address: &str) -> Result<ComplianceStatus, QueryError> {
        let address = validate_address(address)?;
        let now = (self.now_fn)();
        self.ctx.pipeline().alerts().check_wallet_sanctions(&address)?;

        let context = self.ctx.scorer().context(&address, now).await?;
        let risk = crate::risk::score(&context, self.ctx.scorer().weights());

        let sanctions_check = if context.sanctions_matches.is_empty() {
            SanctionsCheck::Clear
        } else {
            SanctionsCheck::Flagged
        };
        let regulatory_flags = match sanctions_check {
            SanctionsCheck::Flagged => vec!["OFAC_SANCTIONS_MATCH".to_string()],
            SanctionsCheck::Clear => Vec::new(),
        };
        let indicators = risk_indicators(&context.transactions, &self.ctx.config().compliance_rules, now);

        Ok(ComplianceStatus {
            tracking: self.ctx.store().get_wallet(&address)?,
            recommendations: recommendations(sanctions_check, risk.verdict, &indicators),
            wallet_address: address,
            risk,
            sanctions_check,
            regulatory_flags,
            high_risk_counterparties: context.high_risk_counterparties,
            risk_indicators: indicators,
            checked_at: now,
        })
    }

    pub async fn wallet_report(&self, address: &str) -> Result<ComplianceReport, QueryError> {
        let compliance = self.wallet_compliance(address).await?;
        let address = compliance.wallet_address.clone();
        let now = compliance.checked_at;
        let rules = &self.ctx.config().compliance_rules;
        let high_value_eth = self.ctx.config().alert_thresholds.high_value_eth;

        let transactions = self.ctx.store().transactions_for_wallet(&address)?;
        let transaction_summary = TransactionSummary {
            total_transactions: transactions.len(),
            recent_transactions: transactions.iter().filter(|t| now - t.timestamp < DAY_SECS).count(),
            total_volume: transactions.iter().map(|t| t.value).sum(),
            high_value_transactions: transactions
                .iter()
                .filter(|t| t.is_high_value() || t.value >= high_value_eth)
                .count(),
        };

        Ok(ComplianceReport {
            report_id: format!("compliance_{}_{}", address, now),
            generated_at: now,
            regulatory_requirements: regulatory_requirements(&transactions, rules),
            alert_history: self.ctx.store().alerts(Some(&address))?,
            wallet_address: address,
            compliance,
            transaction_summary,
        })
    }

    pub fn health(&self) -> Result<HealthReport, QueryError> {
        Ok(self.ctx.health()?)
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::BadRequest("query text must not be empty".to_string()));
        }
        let hits = self
            .ctx
            .pipeline()
            .index()
            .search(query, k.clamp(1, MAX_SEARCH_K))
            .await?;
        Ok(hits
            .into_iter()
            .map(|(document, similarity)| SearchHit { document, similarity })
            .collect())
    }

    /// Push documents through the engine as if a connector produced them
    pub async fn ingest(&self, docs: Vec<Document>) -> Result<BatchSummary, QueryError> {
        if docs.is_empty() {
            return Err(QueryError::BadRequest("no documents supplied".to_string()));
        }
        if let Some(doc) = docs.iter().find(|d| d.id.trim().is_empty()) {
            return Err(QueryError::BadRequest(format!("document without id: {}", doc.text)));
        }

        let mut summary = BatchSummary::default();
        // Each source lands on its own raw stream
        let mut by_stream: Vec<(StreamName, Vec<Document>)> = Vec::new();
        for doc in docs {
            let stream = StreamName::for_source(doc.source);
            match by_stream.iter_mut().find(|(s, _)| *s == stream) {
                Some((_, bucket)) => bucket.push(doc),
                None => by_stream.push((stream, vec![doc])),
            }
        }
        for (stream, bucket) in by_stream {
            let part = self.ctx.ingest_documents(stream, bucket).await?;
            summary.received += part.received;
            summary.added += part.added;
            summary.changed += part.changed;
            summary.published += part.published;
            summary.alerts += part.alerts;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TxDirection;
    use std::collections::BTreeSet;

    fn tx(hash: &str, value: f64, timestamp: i64) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            wallet_address: "0xw".to_string(),
            counterparty: "0xc".to_string(),
            value,
            timestamp,
            block_number: 1,
            direction: TxDirection::Outgoing,
            risk_flags: BTreeSet::new(),
        }
    }

    #[test]
    fn test_indicators_frequency_and_velocity() {
        // 2023-11-14 12:00:00 UTC
        let now = 1_699_963_200;
        let rules = ComplianceRules {
            suspicious_frequency_per_hour: 2,
            daily_velocity_eth: 5.0,
            ..ComplianceRules::default()
        };

        let quiet = vec![tx("a", 1.0, now - 10)];
        assert!(risk_indicators(&quiet, &rules, now).is_empty());

        let busy = vec![tx("a", 2.0, now - 10), tx("b", 2.0, now - 20), tx("c", 2.0, now - 30)];
        let indicators = risk_indicators(&busy, &rules, now);
        assert_eq!(indicators, vec!["high_transaction_frequency", "high_transaction_velocity"]);
    }

    #[test]
    fn test_indicators_night_activity() {
        // 2023-11-14 02:00:00 UTC
        let night = 1_699_927_200;
        let txs: Vec<Transaction> = (0..6).map(|i| tx(&format!("n{}", i), 0.1, night + i)).collect();
        let indicators = risk_indicators(&txs, &ComplianceRules::default(), night + 10 * DAY_SECS);
        assert_eq!(indicators, vec!["unusual_timing_pattern"]);
    }

    #[test]
    fn test_recommendations() {
        assert_eq!(
            recommendations(SanctionsCheck::Clear, Verdict::Low, &[]),
            vec!["Continue standard monitoring"]
        );
        let flagged = recommendations(SanctionsCheck::Flagged, Verdict::High, &["high_transaction_velocity".to_string()]);
        assert_eq!(flagged.len(), 2);
        assert!(flagged[0].starts_with("IMMEDIATE"));
    }

    #[test]
    fn test_regulatory_requirements() {
        let rules = ComplianceRules::default();
        let txs = vec![tx("a", 0.6, 0), tx("b", 0.6, 0)];
        let req = regulatory_requirements(&txs, &rules);
        assert!(req.kyc_required);
        assert!(!req.reporting_required);
        assert!(!req.enhanced_monitoring);

        let big = vec![tx("a", 60.0, 0)];
        let req = regulatory_requirements(&big, &rules);
        assert!(req.reporting_required && req.enhanced_monitoring);
    }

    #[test]
    fn test_stream_sources() {
        assert_eq!(source_for(StreamName::Sanctions), Some("ofac_sdn"));
        assert_eq!(source_for(StreamName::HighPriorityNews), Some("news"));
        assert_eq!(source_for(StreamName::WalletTransactions), Some("chain"));
        assert_eq!(source_for(StreamName::WalletAlerts), None);
    }
}
