//! Regulator RSS/Atom feeds (SEC litigation releases, CFTC, FINRA news)
//!
//! One connector per configured feed, named `rss_<agency>`. Entries become
//! Regulatory Documents on `realtime_news`, so they share the news analysis
//! path. Ids are `<agency>_<sha256(link)[..16]>`. The cursor is the newest
//! entry date (unix seconds); dated entries at or before it are dropped,
//! undated ones are left to the engine's seen set.

use super::news::keyword_severity;
use super::transport::{FeedRequest, FeedTransport};
use super::{ConnectorError, PollBatch, RecordClassifier, SourceConnector};
use crate::pipeline::config::RegulatoryFeed;
use crate::pipeline::types::{Document, Ingested, SourceKind, StreamName};
use async_trait::async_trait;
use feed_rs::model::Entry;
use sha2::{Digest, Sha256};
use std::sync::Arc;

fn agency_name(agency: &str) -> &str {
    match agency {
        "SEC" => "Securities and Exchange Commission",
        "CFTC" => "Commodity Futures Trading Commission",
        "FINRA" => "Financial Industry Regulatory Authority",
        other => other,
    }
}

fn entry_ts(entry: &Entry) -> Option<i64> {
    entry.published.or(entry.updated).map(|dt| dt.timestamp())
}

pub struct RegulatoryFeedConnector {
    transport: Arc<dyn FeedTransport>,
    feed: RegulatoryFeed,
    name: String,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RegulatoryFeedConnector {
    pub fn new(transport: Arc<dyn FeedTransport>, feed: RegulatoryFeed) -> Self {
        Self::new_with_timestamp_fn(transport, feed, Box::new(|| chrono::Utc::now().timestamp()))
    }

    pub fn new_with_timestamp_fn(
        transport: Arc<dyn FeedTransport>,
        feed: RegulatoryFeed,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            transport,
            name: format!("rss_{}", feed.agency.to_lowercase()),
            feed,
            now_fn,
        }
    }

    fn parse_feed(&self, body: &str) -> Result<Vec<Entry>, ConnectorError> {
        feed_rs::parser::parse(body.as_bytes())
            .map(|feed| feed.entries)
            .map_err(|e| ConnectorError::Fatal(format!("{} feed is not RSS/Atom: {}", self.feed.agency, e)))
    }
}

impl RecordClassifier for RegulatoryFeedConnector {
    type Raw = Entry;

    fn classify(&self, entry: &Entry) -> Option<Ingested> {
        let title = entry.title.as_ref().map(|t| t.content.trim().to_string()).unwrap_or_default();
        let summary = entry.summary.as_ref().map(|t| t.content.trim().to_string()).unwrap_or_default();
        if title.is_empty() && summary.is_empty() {
            return None;
        }

        let link = entry.links.first().map(|l| l.href.clone());
        let identity = link.clone().unwrap_or_else(|| entry.id.clone());
        let digest = hex::encode(Sha256::digest(identity.as_bytes()));
        let agency = &self.feed.agency;
        let published = entry_ts(entry);

        let mut doc = Document::new(
            format!("{}_{}", agency.to_lowercase(), &digest[..16]),
            SourceKind::Regulatory,
            format!("{} Regulatory Update: {} - {}", agency, title, summary),
            published.unwrap_or_else(|| (self.now_fn)()),
        )
        .with_risk(keyword_severity(&format!("{} {}", title, summary)))
        .with_metadata("title", title)
        .with_metadata("summary", summary)
        .with_metadata("category", "regulatory_update")
        .with_metadata("source_agency", agency.clone())
        .with_metadata("agency_name", agency_name(agency));

        if let Some(ts) = published {
            doc = doc.with_metadata("published", ts);
        }
        if let Some(link) = link {
            doc = doc.with_link(link);
        }
        Some(Ingested::Document(doc))
    }
}

#[async_trait]
impl SourceConnector for RegulatoryFeedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self) -> StreamName {
        StreamName::RealtimeNews
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<PollBatch, ConnectorError> {
        let since: Option<i64> = cursor.and_then(|c| c.parse().ok());

        log::debug!("🔍 Fetching {} feed", self.feed.agency);
        let body = self.transport.fetch(&FeedRequest::get(&self.feed.url)).await?;
        let entries = self.parse_feed(&body)?;

        let mut newest = since;
        let mut items = Vec::new();
        for entry in &entries {
            let published = entry_ts(entry);
            if let (Some(ts), Some(since)) = (published, since) {
                if ts <= since {
                    continue;
                }
            }
            if let Some(ts) = published {
                newest = Some(newest.map_or(ts, |n| n.max(ts)));
            }
            if let Some(item) = self.classify(entry) {
                items.push(item);
            }
        }

        log::info!(
            "🏛️  {}: {} entries, {} after cursor",
            self.feed.agency,
            entries.len(),
            items.len()
        );

        Ok(PollBatch {
            items,
            next_cursor: newest.map(|ts| ts.to_string()).or_else(|| cursor.map(str::to_string)),
        })
    }
}
