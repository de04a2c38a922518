//! Alert generation
//!
//! | Type | Trigger | Severity |
//! |---|---|---|
//! | `sanctions_match` | sanctions document names a wallet | critical |
//! | `high_value_tx` | single transaction above the top threshold | high |
//! | `velocity` | N high-value transactions inside the window | medium |
//! | `regulatory_update` | news / regulatory document at or above the rank threshold | low |
//!
//! Every alert is keyed by `dedup_key(type, wallet, sorted evidence)`; the
//! `alerts` table holds at most one row per key, so re-processing the same
//! event never publishes a second alert.

use crate::pipeline::config::AlertThresholds;
use crate::pipeline::db::{SqliteStore, StoreError};
use crate::pipeline::types::{Alert, AlertType, Document, Severity, SourceKind, StreamName, Transaction};
use crate::pipeline::windows::{RollingWindow, TxWindow};
use regex::Regex;
use std::sync::OnceLock;

const ADDRESS_PATTERN: &str = r"\b0x[0-9a-fA-F]{40}\b";

fn address_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(ADDRESS_PATTERN).ok()).as_ref()
}

/// All `0x…` 20-byte addresses in `text`, lowercased, sorted and deduplicated
pub fn extract_addresses(text: &str) -> Vec<String> {
    let Some(re) = address_regex() else {
        return Vec::new();
    };
    let mut found: Vec<String> = re.find_iter(text).map(|m| m.as_str().to_lowercase()).collect();
    found.sort();
    found.dedup();
    found
}

fn is_full_address(address: &str) -> bool {
    address.len() == 42 && address_regex().is_some_and(|re| re.is_match(address))
}

/// Whether `text` names `address`
///
/// Full 20-byte addresses must match an extracted address exactly; other
/// identifiers match as a case-insensitive substring.
pub fn mentions(text: &str, address: &str) -> bool {
    let address = address.to_lowercase();
    if is_full_address(&address) {
        extract_addresses(text).contains(&address)
    } else {
        !address.is_empty() && text.to_lowercase().contains(&address)
    }
}

pub struct AlertGenerator {
    store: SqliteStore,
    thresholds: AlertThresholds,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AlertGenerator {
    pub fn new(store: SqliteStore, thresholds: AlertThresholds) -> Self {
        Self::new_with_timestamp_fn(store, thresholds, Box::new(|| chrono::Utc::now().timestamp()))
    }

    pub fn new_with_timestamp_fn(
        store: SqliteStore,
        thresholds: AlertThresholds,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            store,
            thresholds,
            now_fn,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alerts for newly published or upgraded documents
    pub fn on_documents(&self, docs: &[Document]) -> Result<Vec<Alert>, StoreError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let wallets: Vec<String> = self
            .store
            .list_wallets()?
            .into_iter()
            .map(|w| w.address)
            .collect();

        let mut emitted = Vec::new();
        for doc in docs {
            match doc.source {
                SourceKind::Sanctions => {
                    for wallet in wallets.iter().filter(|w| mentions(&doc.text, w)) {
                        emitted.extend(self.emit(self.sanctions_alert(wallet, doc))?);
                    }
                }
                SourceKind::News | SourceKind::Regulatory | SourceKind::Manual => {
                    if doc.risk_level.rank() >= self.thresholds.regulatory_min_rank {
                        let alert = Alert::new(
                            AlertType::RegulatoryUpdate,
                            Severity::Low,
                            None,
                            &[doc.id.clone()],
                            format!("Regulatory update ({}): {}", doc.risk_level.as_str(), preview(&doc.text)),
                            (self.now_fn)(),
                        );
                        emitted.extend(self.emit(alert)?);
                    }
                }
            }
        }
        Ok(emitted)
    }

    /// Alerts for newly stored transactions
    ///
    /// Velocity is evaluated against the store, so transactions from earlier
    /// batches count toward the window.
    pub fn on_transactions(&self, txs: &[Transaction]) -> Result<Vec<Alert>, StoreError> {
        let mut emitted = Vec::new();
        let window_secs = self.thresholds.velocity_window_secs;

        for tx in txs {
            if tx.value > self.thresholds.top_value_eth {
                let alert = Alert::new(
                    AlertType::HighValueTx,
                    Severity::High,
                    Some(&tx.wallet_address),
                    &[tx.hash.clone()],
                    format!("High value transaction: {:.4} ETH ({})", tx.value, tx.direction.as_str()),
                    (self.now_fn)(),
                );
                emitted.extend(self.emit(alert)?);
            }

            if !self.is_high_value(tx) {
                continue;
            }

            let recent = self.store.transactions_between(
                &tx.wallet_address,
                tx.timestamp - window_secs,
                tx.timestamp,
            )?;
            let window = TxWindow::ending_at(window_secs, tx.timestamp, &recent);
            let burst: Vec<&Transaction> = window
                .transactions()
                .iter()
                .filter(|t| self.is_high_value(t))
                .collect();

            if burst.len() >= self.thresholds.velocity_count {
                let evidence: Vec<String> = burst
                    .iter()
                    .take(self.thresholds.velocity_count)
                    .map(|t| t.hash.clone())
                    .collect();
                let alert = Alert::new(
                    AlertType::Velocity,
                    Severity::Medium,
                    Some(&tx.wallet_address),
                    &evidence,
                    format!(
                        "{} high-value transactions within {}s (window holds {})",
                        burst.len(),
                        window_secs,
                        window.len()
                    ),
                    (self.now_fn)(),
                );
                emitted.extend(self.emit(alert)?);
            }
        }
        Ok(emitted)
    }

    /// Match one wallet against every stored sanctions document
    pub fn check_wallet_sanctions(&self, address: &str) -> Result<Vec<Alert>, StoreError> {
        let mut emitted = Vec::new();
        for doc in self.store.documents_mentioning(address, &[SourceKind::Sanctions])? {
            if mentions(&doc.text, address) {
                emitted.extend(self.emit(self.sanctions_alert(address, &doc))?);
            }
        }
        Ok(emitted)
    }

    fn is_high_value(&self, tx: &Transaction) -> bool {
        tx.is_high_value() || tx.value >= self.thresholds.high_value_eth
    }

    fn sanctions_alert(&self, wallet: &str, doc: &Document) -> Alert {
        Alert::new(
            AlertType::SanctionsMatch,
            Severity::Critical,
            Some(wallet),
            &[doc.id.clone()],
            format!("Sanctions match: {} named in {}", wallet, preview(&doc.text)),
            (self.now_fn)(),
        )
    }

    /// Persist and publish an alert unless its dedup key already exists
    fn emit(&self, alert: Alert) -> Result<Option<Alert>, StoreError> {
        let mut streams = vec![StreamName::Alerts];
        if alert.severity == Severity::Critical {
            streams.push(StreamName::CriticalAlerts);
        }
        if alert.wallet_address.is_some() {
            streams.push(StreamName::WalletAlerts);
        }

        if !self.store.publish_alert(&alert, &streams)? {
            log::debug!("🔁 Duplicate alert suppressed: {}", alert.id);
            return Ok(None);
        }

        log::info!(
            "🚨 {} alert [{}] {}",
            alert.alert_type.as_str(),
            alert.severity.as_str(),
            alert.description
        );
        Ok(Some(alert))
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::test_support::create_test_store;
    use crate::pipeline::types::{RiskFlag, RiskLevel, TxDirection};
    use crate::wallet::state::{WalletState, WalletSubscription};
    use std::collections::BTreeSet;

    const WALLET: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";

    fn generator(store: SqliteStore) -> AlertGenerator {
        AlertGenerator::new_with_timestamp_fn(store, AlertThresholds::default(), Box::new(|| 1_700_000_000))
    }

    fn track(store: &SqliteStore, address: &str) {
        let mut sub = WalletSubscription::unregistered(address);
        sub.state = WalletState::Active;
        store.save_wallet(&sub).unwrap();
    }

    fn tx(hash: &str, ts: i64, value: f64, counterparty: &str) -> Transaction {
        let mut risk_flags = BTreeSet::new();
        if value >= 10.0 {
            risk_flags.insert(RiskFlag::HighValue);
        }
        Transaction {
            hash: hash.to_string(),
            wallet_address: WALLET.to_string(),
            counterparty: counterparty.to_string(),
            value,
            timestamp: ts,
            block_number: ts as u64,
            direction: TxDirection::Outgoing,
            risk_flags,
        }
    }

    #[test]
    fn test_extract_addresses() {
        let text = format!("ETH {} and {} and 0x123", WALLET.to_uppercase().replacen("0X", "0x", 1), WALLET);
        assert_eq!(extract_addresses(&text), vec![WALLET.to_string()]);
    }

    #[test]
    fn test_full_addresses_do_not_match_prefixes() {
        let longer = format!("{}ff", WALLET);
        assert!(!mentions(&format!("see {}", longer), WALLET));
        assert!(mentions(&format!("see {}", WALLET), WALLET));
        assert!(mentions("Entity 0xDEMO0001 sanctioned", "0xdemo0001"));
    }

    #[test]
    fn test_sanctions_alert_is_deduplicated() {
        let (_temp, store) = create_test_store();
        track(&store, WALLET);
        let gen = generator(store.clone());

        let doc = Document::new("ofac_sdn_9", SourceKind::Sanctions, format!("OFAC SDN Entry: X | {}", WALLET), 1)
            .with_risk(RiskLevel::Critical);

        let first = gen.on_documents(&[doc.clone()]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].severity, Severity::Critical);

        assert!(gen.on_documents(&[doc]).unwrap().is_empty());
        assert!(gen.check_wallet_sanctions(WALLET).unwrap().is_empty());

        assert_eq!(store.alerts(Some(WALLET)).unwrap().len(), 1);
        assert_eq!(store.read_stream(StreamName::CriticalAlerts, None, None, 10).unwrap().len(), 1);
        assert_eq!(store.read_stream(StreamName::WalletAlerts, None, Some(WALLET), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_regulatory_update_is_low_and_unbound() {
        let (_temp, store) = create_test_store();
        let gen = generator(store.clone());

        let high = Document::new("news_1", SourceKind::Regulatory, "New AML rule", 1).with_risk(RiskLevel::High);
        let quiet = Document::new("news_2", SourceKind::News, "Market update", 1).with_risk(RiskLevel::Medium);

        let alerts = gen.on_documents(&[high, quiet]).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::RegulatoryUpdate);
        assert_eq!(alerts[0].severity, Severity::Low);
        assert!(alerts[0].wallet_address.is_none());
        assert!(store.read_stream(StreamName::CriticalAlerts, None, None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_velocity_alert_fires_once() {
        let (_temp, store) = create_test_store();
        let gen = generator(store.clone());

        let a = tx("0xa", 1_000, 12.0, "0xc1");
        let b = tx("0xb", 1_060, 15.0, "0xc2");
        let c = tx("0xc", 1_120, 20.0, "0xc3");
        for t in [&a, &b] {
            store.insert_transaction(t).unwrap();
        }

        let alerts = gen.on_transactions(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Velocity);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].evidence_refs, vec!["0xa", "0xb"]);

        store.insert_transaction(&c).unwrap();
        assert!(gen.on_transactions(&[c]).unwrap().is_empty());
    }

    #[test]
    fn test_transactions_outside_window_do_not_trigger_velocity() {
        let (_temp, store) = create_test_store();
        let gen = generator(store.clone());

        let a = tx("0xa", 1_000, 12.0, "0xc1");
        let b = tx("0xb", 5_000, 15.0, "0xc2");
        store.insert_transaction(&a).unwrap();
        store.insert_transaction(&b).unwrap();

        assert!(gen.on_transactions(&[a, b]).unwrap().is_empty());
    }

    #[test]
    fn test_high_value_tx_alert() {
        let (_temp, store) = create_test_store();
        let gen = generator(store.clone());

        let big = tx("0xbig", 1_000, 250.0, "0xc1");
        store.insert_transaction(&big).unwrap();

        let alerts = gen.on_transactions(&[big]).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::HighValueTx);
        assert_eq!(alerts[0].severity, Severity::High);
    }
}
