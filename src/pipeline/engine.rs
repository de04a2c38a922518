//! Stream engine seam and the shared downstream path
//!
//! ## Architecture
//!
//! ```text
//! PollBatch (connector)
//!     ↓
//! StreamEngine::delta()      incremental | fallback
//!     ↓
//! Pipeline::process()
//!     ├─ SqliteStore (documents / transactions, atomic per id)
//!     ├─ raw stream record (once per item revision)
//!     ├─ VectorIndex::upsert_many (documents)
//!     ├─ TextClassifier → processed_news / high_priority_news
//!     └─ AlertGenerator → alerts / critical_alerts / wallet_alerts
//!     ↓
//! StreamEngine::commit()
//! ```
//!
//! Both backends only decide *which* items are new or changed. Everything
//! downstream of the delta is shared, so identical connector output yields
//! identical documents, transactions and alerts regardless of backend.
//!
//! Downstream stages run for every delta, whatever the store already holds,
//! and each of them is idempotent. The engine records an item as emitted
//! only in `commit()`, after all stages succeeded, so a batch that fails
//! midway is replayed in full on the next poll.

use super::db::{SqliteStore, StoreError};
use super::types::{Document, Ingested, SourceKind, StreamName, Transaction};
use crate::alerts::AlertGenerator;
use crate::connectors::ConnectorError;
use crate::index::{IndexError, VectorIndex};
use crate::providers::{priority, TextClassifier};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Priority above which processed news is also published as high priority
pub const HIGH_PRIORITY_THRESHOLD: f64 = 0.7;

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    Source(ConnectorError),
    Index(IndexError),
    /// Provider could not be constructed at startup
    Provider(String),
}

impl From<IndexError> for EngineError {
    fn from(err: IndexError) -> Self {
        EngineError::Index(err)
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}

impl From<ConnectorError> for EngineError {
    fn from(err: ConnectorError) -> Self {
        EngineError::Source(err)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Store(e) => write!(f, "Engine store error: {}", e),
            EngineError::Source(e) => write!(f, "Engine source error: {}", e),
            EngineError::Index(e) => write!(f, "Engine index error: {}", e),
            EngineError::Provider(msg) => write!(f, "Engine provider error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Which backend computed the deltas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    Incremental,
    Fallback,
}

impl EngineBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineBackend::Incremental => "incremental",
            EngineBackend::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// Id never emitted on this stream
    Added,
    /// Known document whose risk level went up
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub kind: DeltaKind,
    pub item: Ingested,
}

#[async_trait]
pub trait StreamEngine: Send + Sync {
    fn backend(&self) -> EngineBackend;

    /// Compute the delta of `items` against what was already emitted on `stream`.
    /// Must not mutate backend state.
    async fn delta(&self, stream: StreamName, items: &[Ingested]) -> Result<Vec<Delta>, EngineError>;

    /// Record that `deltas` were published downstream
    async fn commit(&self, stream: StreamName, deltas: &[Delta]) -> Result<(), EngineError>;
}

/// Collapse duplicate keys inside one batch
///
/// The first occurrence keeps its position; a later copy with a higher risk
/// rank replaces its content.
pub fn collapse_batch(items: &[Ingested]) -> Vec<Ingested> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<Ingested> = Vec::with_capacity(items.len());

    for item in items {
        match positions.get(item.key()) {
            Some(&pos) => {
                if item.risk_rank() > out[pos].risk_rank() {
                    out[pos] = item.clone();
                }
            }
            None => {
                positions.insert(item.key(), out.len());
                out.push(item.clone());
            }
        }
    }
    out
}

/// Per-batch processing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub received: usize,
    pub added: usize,
    pub changed: usize,
    pub published: usize,
    pub alerts: usize,
}

/// Shared downstream path fed by whichever backend is active
pub struct Pipeline {
    engine: Arc<dyn StreamEngine>,
    store: SqliteStore,
    index: Arc<VectorIndex>,
    classifier: Arc<dyn TextClassifier>,
    alerts: Arc<AlertGenerator>,
    /// Serializes delta → publish → commit so two tasks never race on the same ids
    gate: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        engine: Arc<dyn StreamEngine>,
        store: SqliteStore,
        index: Arc<VectorIndex>,
        classifier: Arc<dyn TextClassifier>,
        alerts: Arc<AlertGenerator>,
    ) -> Self {
        Self {
            engine,
            store,
            index,
            classifier,
            alerts,
            gate: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> EngineBackend {
        self.engine.backend()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn alerts(&self) -> &Arc<AlertGenerator> {
        &self.alerts
    }

    /// Run one connector batch through delta detection and all downstream stages
    pub async fn process(&self, stream: StreamName, items: Vec<Ingested>) -> Result<BatchSummary, EngineError> {
        let _gate = self.gate.lock().await;

        let mut summary = BatchSummary {
            received: items.len(),
            ..Default::default()
        };
        let deltas = self.engine.delta(stream, &items).await?;
        if deltas.is_empty() {
            log::debug!("📭 {}: no new items in batch of {}", stream, items.len());
            return Ok(summary);
        }

        let mut documents: Vec<Document> = Vec::new();
        let mut transactions: Vec<Transaction> = Vec::new();

        for delta in &deltas {
            match delta.kind {
                DeltaKind::Added => summary.added += 1,
                DeltaKind::Changed => summary.changed += 1,
            }

            match &delta.item {
                Ingested::Document(doc) => {
                    let (stored, fresh) = self.publish_document(stream, doc).await?;
                    if fresh {
                        summary.published += 1;
                    }
                    documents.push(stored);
                }
                Ingested::Transaction(tx) => {
                    if self.publish_transaction(tx)? {
                        summary.published += 1;
                    }
                    transactions.push(tx.clone());
                }
            }
        }

        if let Err(e) = self.index.upsert_many(&documents).await {
            log::warn!("⚠️  Failed to index {} documents: {}", documents.len(), e);
        }

        let mut alerts = self.alerts.on_documents(&documents)?;
        alerts.extend(self.alerts.on_transactions(&transactions)?);
        summary.alerts = alerts.len();

        self.engine.commit(stream, &deltas).await?;

        log::info!(
            "📦 {} [{}]: {} received, {} added, {} changed, {} alerts",
            stream,
            self.engine.backend().as_str(),
            summary.received,
            summary.added,
            summary.changed,
            summary.alerts
        );
        Ok(summary)
    }

    /// Persist and publish one document
    ///
    /// Every write is keyed by the document revision, so a batch retried
    /// after a failed stage repeats only what is missing. Returns the stored
    /// version and whether its raw record was newly published.
    async fn publish_document(&self, stream: StreamName, doc: &Document) -> Result<(Document, bool), EngineError> {
        self.store.upsert_document(doc)?;
        let stored = self.store.get_document(&doc.id)?.unwrap_or_else(|| doc.clone());
        let revision = revision_key(&stored);

        let payload = serde_json::to_value(&stored).map_err(StoreError::from)?;
        let fresh = self
            .store
            .append_record_once(stream, None, &revision, &payload)?
            .is_some();

        if matches!(stored.source, SourceKind::News | SourceKind::Regulatory | SourceKind::Manual) {
            self.publish_analysis(&stored, &revision).await?;
        }

        Ok((stored, fresh))
    }

    async fn publish_analysis(&self, doc: &Document, revision: &str) -> Result<(), EngineError> {
        let analysis = match self.classifier.classify(&doc.text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                log::warn!("⚠️  Classifier unavailable for {}: {}", doc.id, e);
                return Ok(());
            }
        };

        let priority = priority(&analysis, doc.risk_level);
        let high_priority = priority > HIGH_PRIORITY_THRESHOLD;
        let payload = serde_json::json!({
            "document": doc,
            "analysis": analysis,
            "priority": priority,
            "high_priority": high_priority,
        });

        self.store
            .append_record_once(StreamName::ProcessedNews, None, revision, &payload)?;
        if high_priority
            && self
                .store
                .append_record_once(StreamName::HighPriorityNews, None, revision, &payload)?
                .is_some()
        {
            log::info!("📰 High priority: {} ({:.2})", doc.id, priority);
        }
        Ok(())
    }

    /// Returns true when the raw transaction record was newly published
    fn publish_transaction(&self, tx: &Transaction) -> Result<bool, EngineError> {
        self.store.insert_transaction(tx)?;

        let wallet = Some(tx.wallet_address.as_str());
        let raw = serde_json::to_value(tx).map_err(StoreError::from)?;
        let fresh = self
            .store
            .append_record_once(StreamName::WalletTransactions, wallet, &tx.hash, &raw)?
            .is_some();

        let processed = serde_json::json!({
            "transaction": tx,
            "analysis": {
                "high_value": tx.is_high_value(),
                "denylisted_counterparty": tx
                    .risk_flags
                    .contains(&super::types::RiskFlag::DenylistedCounterparty),
            },
        });
        self.store
            .append_record_once(StreamName::WalletTransactionsProcessed, wallet, &tx.hash, &processed)?;
        Ok(fresh)
    }
}

/// Stream record key for one revision of a document
fn revision_key(doc: &Document) -> String {
    format!("{}@{}", doc.id, doc.risk_level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RiskLevel;

    fn doc(id: &str, level: RiskLevel) -> Ingested {
        Ingested::Document(Document::new(id, SourceKind::News, id, 1).with_risk(level))
    }

    #[test]
    fn test_collapse_batch_keeps_order_and_highest_rank() {
        let batch = vec![
            doc("a", RiskLevel::Medium),
            doc("b", RiskLevel::None),
            doc("a", RiskLevel::Critical),
            doc("a", RiskLevel::High),
        ];
        let collapsed = collapse_batch(&batch);

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].key(), "a");
        assert_eq!(collapsed[0].risk_rank(), RiskLevel::Critical.rank());
        assert_eq!(collapsed[1].key(), "b");
    }
}
