//! Chain transaction connector (Etherscan `account/txlist`)
//!
//! Polled per tracked wallet by the wallet tracker. The cursor is the highest
//! block number already ingested; the next request starts at `cursor + 1`.
//! Values arrive in wei and are converted to ETH.

use super::denylist::DenylistProvider;
use super::rate_budget::RateBudget;
use super::transport::{FeedRequest, FeedTransport};
use super::{ConnectorError, RecordClassifier};
use crate::pipeline::types::{normalize_address, Ingested, RiskFlag, Transaction, TxDirection};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const WEI_PER_ETH: f64 = 1e18;

/// Transactions after a cursor for one address
#[derive(Debug, Clone, Default)]
pub struct ChainBatch {
    pub transactions: Vec<Transaction>,
    /// Highest block seen, or the input cursor when nothing new arrived
    pub next_cursor: Option<u64>,
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn poll_address(&self, address: &str, cursor: Option<u64>) -> Result<ChainBatch, ConnectorError>;
}

/// One entry of an Etherscan txlist result
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtherscanTx {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    pub time_stamp: String,
    pub block_number: String,
    #[serde(default)]
    pub is_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

pub struct ChainConnector {
    transport: Arc<dyn FeedTransport>,
    denylist: Arc<dyn DenylistProvider>,
    endpoint: String,
    api_key: Option<String>,
    chain_id: u64,
    high_value_eth: f64,
    budget: Mutex<RateBudget>,
}

impl ChainConnector {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        denylist: Arc<dyn DenylistProvider>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        chain_id: u64,
        high_value_eth: f64,
        budget: RateBudget,
    ) -> Self {
        Self {
            transport,
            denylist,
            endpoint: endpoint.into(),
            api_key,
            chain_id,
            high_value_eth,
            budget: Mutex::new(budget),
        }
    }

    /// Convert a wei amount string to ETH
    pub fn wei_to_eth(wei: &str) -> Option<f64> {
        wei.trim().parse::<u128>().ok().map(|w| w as f64 / WEI_PER_ETH)
    }

    fn parse_response(body: &str) -> Result<Vec<EtherscanTx>, ConnectorError> {
        let response: EtherscanResponse = serde_json::from_str(body)
            .map_err(|e| ConnectorError::Fatal(format!("malformed explorer response: {}", e)))?;

        if response.status == "1" {
            return serde_json::from_value(response.result)
                .map_err(|e| ConnectorError::Fatal(format!("unexpected txlist shape: {}", e)));
        }

        let detail = match &response.result {
            Value::String(s) => s.clone(),
            _ => String::new(),
        };
        let lowered = format!("{} {}", response.message, detail).to_lowercase();

        if lowered.contains("no transactions found") {
            Ok(Vec::new())
        } else if lowered.contains("rate limit") || lowered.contains("timeout") || lowered.contains("busy") {
            Err(ConnectorError::Transient(format!("explorer: {} {}", response.message, detail)))
        } else {
            Err(ConnectorError::Fatal(format!("explorer: {} {}", response.message, detail)))
        }
    }
}

impl RecordClassifier for ChainConnector {
    type Raw = (String, EtherscanTx);

    fn classify(&self, raw: &(String, EtherscanTx)) -> Option<Ingested> {
        let (address, tx) = raw;
        if tx.is_error.as_deref() == Some("1") {
            return None;
        }

        let from = normalize_address(&tx.from);
        let to = normalize_address(&tx.to);
        let (direction, counterparty) = match (from == *address, to == *address) {
            (true, true) => (TxDirection::SelfTransfer, to.clone()),
            (true, false) => (TxDirection::Outgoing, to.clone()),
            (false, true) => (TxDirection::Incoming, from.clone()),
            (false, false) => return None,
        };

        let value = Self::wei_to_eth(&tx.value)?;
        let mut risk_flags = BTreeSet::new();
        if value >= self.high_value_eth {
            risk_flags.insert(RiskFlag::HighValue);
        }

        Some(Ingested::Transaction(Transaction {
            hash: normalize_address(&tx.hash),
            wallet_address: address.clone(),
            counterparty,
            value,
            timestamp: tx.time_stamp.trim().parse().ok()?,
            block_number: tx.block_number.trim().parse().ok()?,
            direction,
            risk_flags,
        }))
    }
}

#[async_trait]
impl ChainSource for ChainConnector {
    async fn poll_address(&self, address: &str, cursor: Option<u64>) -> Result<ChainBatch, ConnectorError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ConnectorError::Fatal("ETHERSCAN_API_KEY not configured".to_string()));
        };

        {
            let mut budget = self
                .budget
                .lock()
                .map_err(|_| ConnectorError::Fatal("rate budget lock poisoned".to_string()))?;
            let now = Instant::now();
            if !budget.try_acquire(now) {
                return Err(ConnectorError::RateLimited(budget.resets_in(now)));
            }
        }

        let address = normalize_address(address);
        let start_block = cursor.map(|c| c + 1).unwrap_or(0);
        let request = FeedRequest::get(&self.endpoint)
            .param("chainid", self.chain_id)
            .param("module", "account")
            .param("action", "txlist")
            .param("address", &address)
            .param("startblock", start_block)
            .param("endblock", 99_999_999)
            .param("sort", "asc")
            .param("apikey", api_key);

        let body = self.transport.fetch(&request).await?;
        let rows = Self::parse_response(&body)?;

        let now = chrono::Utc::now().timestamp();
        let mut transactions = Vec::new();
        let mut next_cursor = cursor;
        for row in rows {
            let Some(Ingested::Transaction(mut tx)) = self.classify(&(address.clone(), row)) else {
                continue;
            };
            if cursor.is_some_and(|c| tx.block_number <= c) {
                continue;
            }
            next_cursor = Some(next_cursor.map_or(tx.block_number, |c| c.max(tx.block_number)));

            match self.denylist.is_denylisted(&tx.counterparty, now).await {
                Ok(true) => {
                    tx.risk_flags.insert(RiskFlag::DenylistedCounterparty);
                }
                Ok(false) => {}
                Err(e) => log::warn!("⚠️  Denylist check failed for {}: {}", tx.counterparty, e),
            }
            transactions.push(tx);
        }

        log::debug!(
            "⛓️  {}: {} new transactions (cursor {:?} -> {:?})",
            address,
            transactions.len(),
            cursor,
            next_cursor
        );

        Ok(ChainBatch {
            transactions,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::denylist::StaticDenylist;
    use crate::connectors::transport::ScriptedTransport;
    use std::time::Duration;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const MIXER: &str = "0x2222222222222222222222222222222222222222";

    fn txlist() -> String {
        serde_json::json!({
            "status": "1",
            "message": "OK",
            "result": [
                {
                    "blockNumber": "100",
                    "timeStamp": "1700000000",
                    "hash": "0xAAA",
                    "from": WALLET,
                    "to": MIXER,
                    "value": "25000000000000000000",
                    "isError": "0"
                },
                {
                    "blockNumber": "101",
                    "timeStamp": "1700000060",
                    "hash": "0xBBB",
                    "from": "0x3333333333333333333333333333333333333333",
                    "to": WALLET.to_uppercase().replace("0X", "0x"),
                    "value": "500000000000000000",
                    "isError": "0"
                },
                {
                    "blockNumber": "102",
                    "timeStamp": "1700000120",
                    "hash": "0xCCC",
                    "from": WALLET,
                    "to": MIXER,
                    "value": "1",
                    "isError": "1"
                }
            ]
        })
        .to_string()
    }

    fn connector(
        responses: Vec<Result<String, ConnectorError>>,
        api_key: Option<&str>,
    ) -> (Arc<ScriptedTransport>, ChainConnector) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let connector = ChainConnector::new(
            transport.clone(),
            Arc::new(StaticDenylist::new([MIXER])),
            "https://explorer.example/api",
            api_key.map(str::to_string),
            1,
            10.0,
            RateBudget::new(100, Duration::from_secs(1)),
        );
        (transport, connector)
    }

    #[test]
    fn test_wei_to_eth() {
        assert_eq!(ChainConnector::wei_to_eth("1000000000000000000"), Some(1.0));
        assert_eq!(ChainConnector::wei_to_eth("0"), Some(0.0));
        assert_eq!(ChainConnector::wei_to_eth("abc"), None);
    }

    #[tokio::test]
    async fn test_poll_tags_flags_and_direction() {
        let (transport, connector) = connector(vec![Ok(txlist())], Some("key"));
        let batch = connector.poll_address(WALLET, None).await.unwrap();

        assert_eq!(batch.transactions.len(), 2);
        assert_eq!(batch.next_cursor, Some(101));

        let out = &batch.transactions[0];
        assert_eq!(out.hash, "0xaaa");
        assert_eq!(out.direction, TxDirection::Outgoing);
        assert_eq!(out.counterparty, MIXER);
        assert_eq!(out.value, 25.0);
        assert!(out.risk_flags.contains(&RiskFlag::HighValue));
        assert!(out.risk_flags.contains(&RiskFlag::DenylistedCounterparty));

        let incoming = &batch.transactions[1];
        assert_eq!(incoming.direction, TxDirection::Incoming);
        assert!(incoming.risk_flags.is_empty());

        let request = &transport.requests()[0];
        assert!(request.query.contains(&("startblock".to_string(), "0".to_string())));
    }

    #[tokio::test]
    async fn test_cursor_skips_already_ingested_blocks() {
        let (transport, connector) = connector(vec![Ok(txlist())], Some("key"));
        let batch = connector.poll_address(WALLET, Some(101)).await.unwrap();

        assert!(batch.transactions.is_empty());
        assert_eq!(batch.next_cursor, Some(101));
        assert!(transport.requests()[0]
            .query
            .contains(&("startblock".to_string(), "102".to_string())));
    }

    #[tokio::test]
    async fn test_error_taxonomy() {
        let empty = r#"{"status":"0","message":"No transactions found","result":[]}"#;
        let (_t, c) = connector(vec![Ok(empty.to_string())], Some("key"));
        assert!(c.poll_address(WALLET, None).await.unwrap().transactions.is_empty());

        let bad_key = r#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#;
        let (_t, c) = connector(vec![Ok(bad_key.to_string())], Some("key"));
        assert!(matches!(c.poll_address(WALLET, None).await, Err(ConnectorError::Fatal(_))));

        let limited = r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#;
        let (_t, c) = connector(vec![Ok(limited.to_string())], Some("key"));
        assert!(matches!(c.poll_address(WALLET, None).await, Err(ConnectorError::Transient(_))));

        let (_t, c) = connector(vec![Ok(empty.to_string())], None);
        assert!(matches!(c.poll_address(WALLET, None).await, Err(ConnectorError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_without_a_request() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(txlist())]));
        let connector = ChainConnector::new(
            transport.clone(),
            Arc::new(StaticDenylist::default()),
            "https://explorer.example/api",
            Some("key".to_string()),
            1,
            10.0,
            RateBudget::new(1, Duration::from_secs(3_600)),
        );

        assert!(connector.poll_address(WALLET, None).await.is_ok());
        match connector.poll_address(WALLET, None).await {
            Err(ConnectorError::RateLimited(wait)) => assert!(wait > Duration::from_secs(3_500)),
            other => panic!("expected a skipped poll, got {:?}", other),
        }
        assert_eq!(transport.requests().len(), 1);
    }
}
