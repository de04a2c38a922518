//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use regwatch::connectors::chain::{ChainBatch, ChainSource};
use regwatch::connectors::denylist::StaticDenylist;
use regwatch::connectors::ConnectorError;
use regwatch::pipeline::types::{Transaction, TxDirection};
use regwatch::pipeline::{EngineConfig, EngineContext, EngineParts, ScheduledConnector, SqliteStore};
use regwatch::providers::ProviderSet;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const SCHEMA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/sql");

/// Chain source that replays scripted results and records every call
#[derive(Default)]
pub struct ScriptedChain {
    script: Mutex<VecDeque<Result<ChainBatch, ConnectorError>>>,
    calls: Mutex<Vec<(String, Option<u64>)>>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<ChainBatch, ConnectorError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_ok(&self, transactions: Vec<Transaction>, next_cursor: Option<u64>) {
        self.push(Ok(ChainBatch {
            transactions,
            next_cursor,
        }));
    }

    pub fn push_transient(&self, times: usize) {
        for i in 0..times {
            self.push(Err(ConnectorError::Transient(format!("timeout #{}", i + 1))));
        }
    }

    pub fn calls(&self) -> Vec<(String, Option<u64>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn poll_address(&self, address: &str, cursor: Option<u64>) -> Result<ChainBatch, ConnectorError> {
        self.calls.lock().unwrap().push((address.to_string(), cursor));
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(ChainBatch {
            transactions: Vec::new(),
            next_cursor: cursor,
        }))
    }
}

/// Config pointing at `db_path` with the given overrides
pub fn test_config(db_path: &Path, overrides: &[(&str, &str)]) -> EngineConfig {
    let db_path = db_path.to_string_lossy().to_string();
    let overrides: Vec<(String, String)> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EngineConfig::from_lookup(move |key| match key {
        "REGWATCH_DB_PATH" => Some(db_path.clone()),
        "REGWATCH_SCHEMA_DIR" => Some(SCHEMA_DIR.to_string()),
        "EMBEDDINGS_DIMENSION" => Some("64".to_string()),
        other => overrides.iter().find(|(k, _)| k == other).map(|(_, v)| v.clone()),
    })
    .unwrap()
}

/// Engine on a local store with deterministic providers and a scripted chain
pub async fn build_engine(
    config: EngineConfig,
    chain: Arc<ScriptedChain>,
    connectors: Vec<ScheduledConnector>,
) -> EngineContext {
    build_engine_with_chain(config, chain, connectors).await
}

/// Same as `build_engine` with any chain source
pub async fn build_engine_with_chain(
    config: EngineConfig,
    chain: Arc<dyn ChainSource>,
    connectors: Vec<ScheduledConnector>,
) -> EngineContext {
    let store = SqliteStore::open(&config.db_path, &config.schema_dir).unwrap();
    let parts = EngineParts {
        providers: ProviderSet::local(config.embeddings_dimension),
        chain,
        denylist: Arc::new(StaticDenylist::new(config.denylist_addresses.clone())),
        connectors,
    };
    EngineContext::new(config, store, parts).await.unwrap()
}

pub fn tx(hash: &str, wallet: &str, counterparty: &str, value: f64, timestamp: i64, block: u64) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        wallet_address: wallet.to_lowercase(),
        counterparty: counterparty.to_lowercase(),
        value,
        timestamp,
        block_number: block,
        direction: TxDirection::Outgoing,
        risk_flags: BTreeSet::new(),
    }
}
