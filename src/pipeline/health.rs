//! Connector health tracking for `/health`
//!
//! Status per connector:
//! - `idle` - registered, no poll finished yet
//! - `healthy` - last poll succeeded
//! - `degraded` - N consecutive transient failures (still retrying)
//! - `rate_limited` - budget exhausted, skipping until the window resets
//! - `disabled` - fatal error, no further polls

use super::engine::{BatchSummary, EngineBackend};
use crate::connectors::ConnectorError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Idle,
    Healthy,
    Degraded,
    RateLimited,
    Disabled,
}

impl ConnectorStatus {
    /// Whether readers of this connector's streams are seeing live data
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            ConnectorStatus::Idle | ConnectorStatus::Healthy | ConnectorStatus::RateLimited
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorHealth {
    pub name: String,
    pub status: ConnectorStatus,
    pub consecutive_failures: u32,
    pub polls: u64,
    pub documents_processed: u64,
    pub alerts_generated: u64,
    pub last_success: Option<i64>,
    pub last_error: Option<String>,
}

impl ConnectorHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ConnectorStatus::Idle,
            consecutive_failures: 0,
            polls: 0,
            documents_processed: 0,
            alerts_generated: 0,
            last_success: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub total: usize,
    pub connecting: usize,
    pub active: usize,
    pub degraded: usize,
    pub stopped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub backend: EngineBackend,
    pub running: bool,
    /// No connector degraded or disabled
    pub healthy: bool,
    pub connectors: Vec<ConnectorHealth>,
    pub wallets: WalletSummary,
    pub documents: usize,
    pub index_entries: usize,
    pub timestamp: i64,
}

pub struct HealthRegistry {
    connectors: RwLock<BTreeMap<String, ConnectorHealth>>,
    degrade_after: u32,
}

impl HealthRegistry {
    pub fn new(degrade_after: u32) -> Self {
        Self {
            connectors: RwLock::new(BTreeMap::new()),
            degrade_after: degrade_after.max(1),
        }
    }

    pub fn register(&self, name: &str) {
        self.update(name, |_| {});
    }

    pub fn record_success(&self, name: &str, summary: &BatchSummary, now: i64) {
        self.update(name, |h| {
            h.status = ConnectorStatus::Healthy;
            h.consecutive_failures = 0;
            h.polls += 1;
            h.documents_processed += summary.published as u64;
            h.alerts_generated += summary.alerts as u64;
            h.last_success = Some(now);
        });
    }

    /// Record a failed poll and return the resulting status
    pub fn record_failure(&self, name: &str, error: &ConnectorError) -> ConnectorStatus {
        let degrade_after = self.degrade_after;
        self.update(name, |h| {
            h.polls += 1;
            h.consecutive_failures += 1;
            h.last_error = Some(error.to_string());
            h.status = if error.is_fatal() {
                ConnectorStatus::Disabled
            } else if h.consecutive_failures >= degrade_after {
                ConnectorStatus::Degraded
            } else {
                h.status
            };
        })
    }

    pub fn record_rate_limited(&self, name: &str) {
        self.update(name, |h| {
            if h.status != ConnectorStatus::Disabled && h.status != ConnectorStatus::Degraded {
                h.status = ConnectorStatus::RateLimited;
            }
        });
    }

    pub fn get(&self, name: &str) -> Option<ConnectorHealth> {
        self.connectors.read().ok().and_then(|m| m.get(name).cloned())
    }

    pub fn snapshot(&self) -> Vec<ConnectorHealth> {
        self.connectors
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn update<F>(&self, name: &str, f: F) -> ConnectorStatus
    where
        F: FnOnce(&mut ConnectorHealth),
    {
        match self.connectors.write() {
            Ok(mut map) => {
                let entry = map
                    .entry(name.to_string())
                    .or_insert_with(|| ConnectorHealth::new(name));
                f(entry);
                entry.status
            }
            Err(_) => {
                log::error!("❌ Health registry lock poisoned; dropping update for {}", name);
                ConnectorStatus::Disabled
            }
        }
    }
}
