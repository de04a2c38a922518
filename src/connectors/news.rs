//! News connector (NewsAPI `/v2/everything`, NewsData-style `results` also accepted)
//!
//! Each article becomes a Document tagged by keyword severity. The cursor is
//! the newest `publishedAt` (unix seconds) seen so far; articles at or before
//! it are dropped.

use super::transport::{FeedRequest, FeedTransport};
use super::{ConnectorError, PollBatch, RecordClassifier, SourceConnector};
use crate::pipeline::types::{Document, Ingested, RiskLevel, SourceKind, StreamName};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const CRITICAL_KEYWORDS: &[&str] = &[
    "enforcement action",
    "criminal charges",
    "fraud investigation",
    "sanctions imposed",
    "license revoked",
    "cease and desist",
    "cease operations",
];

const HIGH_KEYWORDS: &[&str] = &[
    "enforcement",
    "penalty",
    "fine",
    "violation",
    "sanctions",
    "fraud",
    "investigation",
    "lawsuit",
    "prosecution",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "regulation",
    "compliance",
    "guidance",
    "warning",
    "advisory",
    "requirement",
    "oversight",
    "rule",
];

/// Keyword severity heuristic over lowercased text
pub fn keyword_severity(text: &str) -> RiskLevel {
    let text = text.to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|k| text.contains(k)) {
        RiskLevel::Critical
    } else if HIGH_KEYWORDS.iter().any(|k| text.contains(k)) {
        RiskLevel::High
    } else if MEDIUM_KEYWORDS.iter().any(|k| text.contains(k)) {
        RiskLevel::Medium
    } else {
        RiskLevel::None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsArticle {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "link")]
    pub url: Option<String>,
    #[serde(default, rename = "publishedAt", alias = "pubDate")]
    pub published_at: Option<String>,
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub source_id: Option<String>,
}

impl NewsArticle {
    fn source_name(&self) -> Option<String> {
        match &self.source {
            Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).map(str::to_string),
            Some(Value::String(name)) => Some(name.clone()),
            _ => self.source_id.clone(),
        }
    }

    /// Publication time in unix seconds (RFC 3339 or `YYYY-MM-DD HH:MM:SS`)
    pub fn published_ts(&self) -> Option<i64> {
        let raw = self.published_at.as_deref()?.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.timestamp())
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc().timestamp())
            })
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Option<Vec<NewsArticle>>,
    #[serde(default)]
    results: Option<Vec<NewsArticle>>,
}

pub struct NewsConnector {
    transport: Arc<dyn FeedTransport>,
    endpoint: String,
    api_key: String,
    query: String,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl NewsConnector {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self::new_with_timestamp_fn(
            transport,
            endpoint,
            api_key,
            query,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    pub fn new_with_timestamp_fn(
        transport: Arc<dyn FeedTransport>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        query: impl Into<String>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            query: query.into(),
            now_fn,
        }
    }

    fn parse_response(body: &str) -> Result<Vec<NewsArticle>, ConnectorError> {
        let response: NewsResponse = serde_json::from_str(body)
            .map_err(|e| ConnectorError::Fatal(format!("malformed news response: {}", e)))?;

        if response.status.as_deref() == Some("error") {
            let code = response.code.unwrap_or_default();
            let message = response.message.unwrap_or_default();
            return Err(match code.as_str() {
                "rateLimited" | "maximumResultsReached" | "unexpectedError" => {
                    ConnectorError::Transient(format!("news API {}: {}", code, message))
                }
                _ => ConnectorError::Fatal(format!("news API {}: {}", code, message)),
            });
        }

        Ok(response.articles.or(response.results).unwrap_or_default())
    }
}

impl RecordClassifier for NewsConnector {
    type Raw = NewsArticle;

    fn classify(&self, article: &NewsArticle) -> Option<Ingested> {
        let title = article.title.clone().unwrap_or_default();
        let description = article.description.clone().unwrap_or_default();
        let content = article.content.clone().unwrap_or_default();
        let full = format!("{} {} {}", title, description, content).trim().to_string();
        if full.is_empty() {
            return None;
        }

        let identity = article.url.clone().unwrap_or_else(|| title.clone());
        let digest = hex::encode(Sha256::digest(identity.as_bytes()));
        let timestamp = article.published_ts().unwrap_or_else(|| (self.now_fn)());

        let is_regulator = article
            .url
            .as_deref()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(|h| h.ends_with(".gov")))
            .unwrap_or(false);

        let mut doc = Document::new(
            format!("news_{}", &digest[..16]),
            if is_regulator { SourceKind::Regulatory } else { SourceKind::News },
            format!("Regulatory News: {}", full),
            timestamp,
        )
        .with_risk(keyword_severity(&full))
        .with_metadata("title", title)
        .with_metadata("query", self.query.clone());

        if let Some(published) = &article.published_at {
            doc = doc.with_metadata("published", published.clone());
        }
        if let Some(source) = article.source_name() {
            doc = doc.with_metadata("news_source", source);
        }
        if let Some(url) = &article.url {
            doc = doc.with_link(url.clone());
        }

        Some(Ingested::Document(doc))
    }
}

#[async_trait]
impl SourceConnector for NewsConnector {
    fn name(&self) -> &str {
        "news"
    }

    fn stream(&self) -> StreamName {
        StreamName::RealtimeNews
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<PollBatch, ConnectorError> {
        let since: Option<i64> = cursor.and_then(|c| c.parse().ok());

        let request = FeedRequest::get(&self.endpoint)
            .param("q", &self.query)
            .param("sortBy", "publishedAt")
            .param("language", "en")
            .param("pageSize", 50)
            .header("X-Api-Key", &self.api_key);

        let body = self.transport.fetch(&request).await?;
        let articles = Self::parse_response(&body)?;

        let mut newest = since;
        let mut items = Vec::new();
        for article in &articles {
            let published = article.published_ts();
            if let (Some(ts), Some(since)) = (published, since) {
                if ts <= since {
                    continue;
                }
            }
            if let Some(ts) = published {
                newest = Some(newest.map_or(ts, |n| n.max(ts)));
            }
            if let Some(item) = self.classify(article) {
                items.push(item);
            }
        }

        log::info!(
            "📰 Fetched {} articles, {} after cursor",
            articles.len(),
            items.len()
        );

        Ok(PollBatch {
            items,
            next_cursor: newest.map(|ts| ts.to_string()).or_else(|| cursor.map(str::to_string)),
        })
    }
}
