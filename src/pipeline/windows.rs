//! Rolling transaction windows
//!
//! Used for velocity detection and compliance frequency indicators.

use super::types::Transaction;

/// A single time window over transactions
pub trait RollingWindow {
    fn add_transaction(&mut self, tx: Transaction);

    /// Remove transactions older than the cutoff timestamp
    fn evict_before(&mut self, cutoff_timestamp: i64);

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

/// Transactions with `timestamp >= now - duration`, kept in (timestamp, hash) order
#[derive(Debug, Clone)]
pub struct TxWindow {
    transactions: Vec<Transaction>,
    duration_secs: i64,
}

impl TxWindow {
    pub fn new(duration_secs: i64) -> Self {
        Self {
            transactions: Vec::new(),
            duration_secs,
        }
    }

    /// Window ending at `now`, filled from `txs`
    pub fn ending_at<'a, I>(duration_secs: i64, now: i64, txs: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut window = Self::new(duration_secs);
        for tx in txs {
            if tx.timestamp <= now {
                window.add_transaction(tx.clone());
            }
        }
        window.evict_before(now - duration_secs);
        window
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn total_value(&self) -> f64 {
        self.transactions.iter().map(|t| t.value).sum()
    }

    pub fn high_value(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|t| t.is_high_value())
    }
}

impl RollingWindow for TxWindow {
    fn add_transaction(&mut self, tx: Transaction) {
        let pos = self
            .transactions
            .partition_point(|t| (t.timestamp, t.hash.as_str()) <= (tx.timestamp, tx.hash.as_str()));
        self.transactions.insert(pos, tx);
    }

    fn evict_before(&mut self, cutoff_timestamp: i64) {
        self.transactions.retain(|t| t.timestamp >= cutoff_timestamp);
    }

    fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn len(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{RiskFlag, TxDirection};
    use std::collections::BTreeSet;

    fn tx(hash: &str, ts: i64, value: f64, high: bool) -> Transaction {
        let mut risk_flags = BTreeSet::new();
        if high {
            risk_flags.insert(RiskFlag::HighValue);
        }
        Transaction {
            hash: hash.to_string(),
            wallet_address: "0xw".to_string(),
            counterparty: "0xc".to_string(),
            value,
            timestamp: ts,
            block_number: ts as u64,
            direction: TxDirection::Outgoing,
            risk_flags,
        }
    }

    #[test]
    fn test_window_orders_and_evicts() {
        let mut window = TxWindow::new(600);
        window.add_transaction(tx("b", 1_000, 1.0, false));
        window.add_transaction(tx("a", 900, 2.0, true));
        window.add_transaction(tx("c", 1_000, 3.0, true));

        let hashes: Vec<&str> = window.transactions().iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b", "c"]);
        assert_eq!(window.high_value().count(), 2);

        window.evict_before(950);
        assert_eq!(window.len(), 2);
        assert_eq!(window.total_value(), 4.0);
    }

    #[test]
    fn test_ending_at_excludes_future_and_old() {
        let txs = vec![tx("old", 100, 1.0, true), tx("in", 700, 1.0, true), tx("future", 2_000, 1.0, true)];
        let window = TxWindow::ending_at(600, 1_000, &txs);
        assert_eq!(window.len(), 1);
        assert_eq!(window.transactions()[0].hash, "in");
    }
}
