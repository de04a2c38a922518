//! Source connectors
//!
//! One connector per external feed. A connector pulls a page of items after
//! a cursor and maps raw rows to canonical `Document` / `Transaction` values.
//! Calling `poll` twice with the same cursor returns no new items.
//!
//! - `sanctions` - OFAC SDN list (CSV), one critical Document per row
//! - `news` - NewsAPI articles, keyword severity heuristics
//! - `regulatory` - SEC/CFTC/FINRA RSS and Atom feeds, one connector per feed
//! - `chain` - Etherscan txlist per tracked wallet
//! - `replay` - scripted batches for tests and backfills

pub mod backoff;
pub mod chain;
pub mod denylist;
pub mod news;
pub mod rate_budget;
pub mod regulatory;
pub mod replay;
pub mod sanctions;
pub mod transport;

use crate::pipeline::types::{Ingested, StreamName};
use async_trait::async_trait;
use std::time::Duration;

/// Transport or schema failure reported by a connector
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorError {
    /// Network timeout, rate limit, 5xx. Retry with backoff.
    Transient(String),
    /// Bad credentials, malformed schema. Disable this connector.
    Fatal(String),
    /// Local request budget spent; the poll was skipped, not attempted.
    /// Carries the time until the budget window resets.
    RateLimited(Duration),
}

impl ConnectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::Fatal(_))
    }
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::Transient(msg) => write!(f, "Transient source error: {}", msg),
            ConnectorError::Fatal(msg) => write!(f, "Fatal source error: {}", msg),
            ConnectorError::RateLimited(wait) => {
                write!(f, "Request budget exhausted, resets in {}s", wait.as_secs())
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Items pulled in one poll plus the cursor to resume from
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    pub items: Vec<Ingested>,
    pub next_cursor: Option<String>,
}

impl PollBatch {
    pub fn empty(cursor: Option<&str>) -> Self {
        Self {
            items: Vec::new(),
            next_cursor: cursor.map(str::to_string),
        }
    }
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Stable name used for cursors and health reporting
    fn name(&self) -> &str;

    /// Raw stream this connector's items are published on
    fn stream(&self) -> StreamName;

    async fn poll(&self, cursor: Option<&str>) -> Result<PollBatch, ConnectorError>;
}

/// Maps one raw source row to a canonical item
///
/// Returns `None` for rows that carry no usable record (headers, blanks).
pub trait RecordClassifier {
    type Raw;

    fn classify(&self, raw: &Self::Raw) -> Option<Ingested>;
}
