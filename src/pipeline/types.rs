//! Core data types flowing through the engine
//!
//! - `Document` - sanctions entries, news and regulatory notices
//! - `Transaction` - chain transactions for tracked wallets
//! - `Alert` - deduplicated compliance alerts
//! - `StreamRecord` - envelope for every published stream item

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Origin of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sanctions,
    News,
    Regulatory,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sanctions => "sanctions",
            SourceKind::News => "news",
            SourceKind::Regulatory => "regulatory",
            SourceKind::Manual => "manual",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sanctions" => Ok(SourceKind::Sanctions),
            "news" => Ok(SourceKind::News),
            "regulatory" => Ok(SourceKind::Regulatory),
            "manual" => Ok(SourceKind::Manual),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

/// Document risk level. Ordered so that upgrades compare with `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RiskLevel::None),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source-specific deterministic key, e.g. `ofac_sdn_<ent_num>`
    pub id: String,
    pub source: SourceKind,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub risk_level: RiskLevel,
    pub timestamp: i64,
    #[serde(default)]
    pub origin_link: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, source: SourceKind, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            source,
            text: text.into(),
            metadata: BTreeMap::new(),
            risk_level: RiskLevel::None,
            timestamp,
            origin_link: None,
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.origin_link = Some(link.into());
        self
    }
}

/// Direction relative to the tracked wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    Incoming,
    Outgoing,
    SelfTransfer,
}

impl TxDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxDirection::Incoming => "incoming",
            TxDirection::Outgoing => "outgoing",
            TxDirection::SelfTransfer => "self_transfer",
        }
    }
}

impl FromStr for TxDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(TxDirection::Incoming),
            "outgoing" => Ok(TxDirection::Outgoing),
            "self_transfer" => Ok(TxDirection::SelfTransfer),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    HighValue,
    DenylistedCounterparty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    /// Tracked wallet this transaction was observed for (lowercase)
    pub wallet_address: String,
    pub counterparty: String,
    /// Value in ETH
    pub value: f64,
    pub timestamp: i64,
    pub block_number: u64,
    pub direction: TxDirection,
    #[serde(default)]
    pub risk_flags: BTreeSet<RiskFlag>,
}

impl Transaction {
    pub fn is_high_value(&self) -> bool {
        self.risk_flags.contains(&RiskFlag::HighValue)
    }
}

/// One item produced by a source connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ingested {
    Document(Document),
    Transaction(Transaction),
}

impl Ingested {
    /// Identity within its stream
    pub fn key(&self) -> &str {
        match self {
            Ingested::Document(doc) => &doc.id,
            Ingested::Transaction(tx) => &tx.hash,
        }
    }

    /// Rank used for change detection. Transactions are append-only.
    pub fn risk_rank(&self) -> u8 {
        match self {
            Ingested::Document(doc) => doc.risk_level.rank(),
            Ingested::Transaction(_) => 0,
        }
    }

    pub fn wallet_address(&self) -> Option<&str> {
        match self {
            Ingested::Document(_) => None,
            Ingested::Transaction(tx) => Some(&tx.wallet_address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SanctionsMatch,
    HighValueTx,
    Velocity,
    RegulatoryUpdate,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::SanctionsMatch => "sanctions_match",
            AlertType::HighValueTx => "high_value_tx",
            AlertType::Velocity => "velocity",
            AlertType::RegulatoryUpdate => "regulatory_update",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sanctions_match" => Ok(AlertType::SanctionsMatch),
            "high_value_tx" => Ok(AlertType::HighValueTx),
            "velocity" => Ok(AlertType::Velocity),
            "regulatory_update" => Ok(AlertType::RegulatoryUpdate),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub dedup_key: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub wallet_address: Option<String>,
    /// Document ids and transaction hashes that triggered the alert (sorted)
    pub evidence_refs: Vec<String>,
    pub description: String,
    pub timestamp: i64,
}

impl Alert {
    /// Build an alert with its identity derived from type, wallet and evidence
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        wallet_address: Option<&str>,
        evidence: &[String],
        description: String,
        timestamp: i64,
    ) -> Self {
        let wallet = wallet_address.map(|w| w.to_lowercase());
        let mut evidence_refs = evidence.to_vec();
        evidence_refs.sort();
        evidence_refs.dedup();

        let dedup_key = dedup_key(alert_type, wallet.as_deref(), &evidence_refs);
        Self {
            id: format!("alert_{}", &dedup_key[..16]),
            dedup_key,
            alert_type,
            severity,
            wallet_address: wallet,
            evidence_refs,
            description,
            timestamp,
        }
    }
}

/// Stable hash of `type|wallet|sorted evidence ids`
pub fn dedup_key(alert_type: AlertType, wallet_address: Option<&str>, evidence_refs: &[String]) -> String {
    let mut sorted: Vec<&str> = evidence_refs.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(alert_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(wallet_address.unwrap_or("").to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(sorted.join(",").as_bytes());
    hex::encode(hasher.finalize())
}

/// Named logical output streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Sanctions,
    RealtimeNews,
    ProcessedNews,
    HighPriorityNews,
    Alerts,
    CriticalAlerts,
    WalletTransactions,
    WalletTransactionsProcessed,
    WalletAlerts,
}

impl StreamName {
    pub const ALL: [StreamName; 9] = [
        StreamName::Sanctions,
        StreamName::RealtimeNews,
        StreamName::ProcessedNews,
        StreamName::HighPriorityNews,
        StreamName::Alerts,
        StreamName::CriticalAlerts,
        StreamName::WalletTransactions,
        StreamName::WalletTransactionsProcessed,
        StreamName::WalletAlerts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Sanctions => "sanctions",
            StreamName::RealtimeNews => "realtime_news",
            StreamName::ProcessedNews => "processed_news",
            StreamName::HighPriorityNews => "high_priority_news",
            StreamName::Alerts => "alerts",
            StreamName::CriticalAlerts => "critical_alerts",
            StreamName::WalletTransactions => "wallet_transactions",
            StreamName::WalletTransactionsProcessed => "wallet_transactions_processed",
            StreamName::WalletAlerts => "wallet_alerts",
        }
    }

    /// Raw stream a document from this source is published on
    pub fn for_source(source: SourceKind) -> Self {
        match source {
            SourceKind::Sanctions => StreamName::Sanctions,
            SourceKind::News | SourceKind::Regulatory | SourceKind::Manual => StreamName::RealtimeNews,
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown stream: {}", s))
    }
}

/// Envelope for every published stream item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub stream_name: StreamName,
    /// Strictly increasing, gap-free per stream
    pub seq: i64,
    pub wallet_address: Option<String>,
    pub payload: Value,
    pub created_at: i64,
}

/// Lowercase and trim an address for storage and comparison
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::None);
        assert_eq!(RiskLevel::Critical.rank(), 3);
    }

    #[test]
    fn test_dedup_key_ignores_evidence_order_and_wallet_case() {
        let a = dedup_key(
            AlertType::Velocity,
            Some("0xABC"),
            &["tx2".to_string(), "tx1".to_string()],
        );
        let b = dedup_key(
            AlertType::Velocity,
            Some("0xabc"),
            &["tx1".to_string(), "tx2".to_string()],
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_type = dedup_key(
            AlertType::HighValueTx,
            Some("0xabc"),
            &["tx1".to_string(), "tx2".to_string()],
        );
        assert_ne!(a, other_type);
    }

    #[test]
    fn test_alert_new_sorts_evidence() {
        let alert = Alert::new(
            AlertType::SanctionsMatch,
            Severity::Critical,
            Some("0xDEMO0001"),
            &["ofac_sdn_2".to_string(), "ofac_sdn_1".to_string()],
            "match".to_string(),
            1_700_000_000,
        );
        assert_eq!(alert.wallet_address.as_deref(), Some("0xdemo0001"));
        assert_eq!(alert.evidence_refs, vec!["ofac_sdn_1", "ofac_sdn_2"]);
        assert!(alert.id.starts_with("alert_"));
    }

    #[test]
    fn test_stream_name_round_trip() {
        for name in StreamName::ALL {
            assert_eq!(name.as_str().parse::<StreamName>().unwrap(), name);
        }
        assert!("nope".parse::<StreamName>().is_err());
    }

    #[test]
    fn test_ingested_serializes_with_kind_tag() {
        let doc = Document::new("d1", SourceKind::News, "text", 1).with_risk(RiskLevel::High);
        let json = serde_json::to_value(Ingested::Document(doc)).unwrap();
        assert_eq!(json["kind"], "document");
        assert_eq!(json["risk_level"], "high");
    }
}
