//! OFAC SDN list connector
//!
//! Source: `sdn.csv` (headerless). Columns used:
//! `ent_num, SDN_Name, SDN_Type, Program, Title, ..., Remarks` (index 11).
//! Empty fields are encoded as `-0-`.
//!
//! The cursor is the sha256 of the last body processed, so re-polling an
//! unchanged list yields no items.

use super::transport::{FeedRequest, FeedTransport};
use super::{ConnectorError, PollBatch, RecordClassifier, SourceConnector};
use crate::pipeline::types::{Document, Ingested, RiskLevel, SourceKind, StreamName};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// One row of the SDN list
#[derive(Debug, Clone, PartialEq)]
pub struct SdnRow {
    pub ent_num: String,
    pub name: String,
    pub sdn_type: Option<String>,
    pub program: Option<String>,
    pub title: Option<String>,
    pub remarks: Option<String>,
}

pub struct SanctionsConnector {
    transport: Arc<dyn FeedTransport>,
    url: String,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl SanctionsConnector {
    pub fn new(transport: Arc<dyn FeedTransport>, url: impl Into<String>) -> Self {
        Self::new_with_timestamp_fn(transport, url, Box::new(|| chrono::Utc::now().timestamp()))
    }

    pub fn new_with_timestamp_fn(
        transport: Arc<dyn FeedTransport>,
        url: impl Into<String>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            now_fn,
        }
    }

    /// Parse the SDN CSV body into rows
    ///
    /// A leading header row (non-numeric `ent_num`) is skipped. Rows with
    /// fewer than two columns are ignored. Malformed CSV is a fatal error.
    pub fn parse_rows(body: &str) -> Result<Vec<SdnRow>, ConnectorError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| ConnectorError::Fatal(format!("malformed SDN CSV: {}", e)))?;

            let field = |i: usize| {
                record
                    .get(i)
                    .map(str::trim)
                    .filter(|v| !v.is_empty() && *v != "-0-")
                    .map(str::to_string)
            };

            let (Some(ent_num), Some(name)) = (field(0), field(1)) else {
                continue;
            };
            if !ent_num.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            rows.push(SdnRow {
                ent_num,
                name,
                sdn_type: field(2),
                program: field(3),
                title: field(4),
                remarks: field(11),
            });
        }
        Ok(rows)
    }

    pub fn body_digest(body: &str) -> String {
        hex::encode(Sha256::digest(body.as_bytes()))
    }
}

impl RecordClassifier for SanctionsConnector {
    type Raw = SdnRow;

    fn classify(&self, row: &SdnRow) -> Option<Ingested> {
        let mut text = format!("OFAC SDN Entry: {}", row.name);
        if let Some(title) = &row.title {
            text.push_str(" - ");
            text.push_str(title);
        }
        if let Some(program) = &row.program {
            text.push_str(&format!(" | Program: {}", program));
        }
        if let Some(remarks) = &row.remarks {
            text.push_str(&format!(" | {}", remarks));
        }

        let mut doc = Document::new(
            format!("ofac_sdn_{}", row.ent_num),
            SourceKind::Sanctions,
            text,
            (self.now_fn)(),
        )
        .with_risk(RiskLevel::Critical)
        .with_metadata("ent_num", row.ent_num.clone())
        .with_metadata("name", row.name.clone())
        .with_link(self.url.clone());

        if let Some(sdn_type) = &row.sdn_type {
            doc = doc.with_metadata("sdn_type", sdn_type.clone());
        }
        if let Some(program) = &row.program {
            doc = doc.with_metadata("program", program.clone());
        }

        Some(Ingested::Document(doc))
    }
}

#[async_trait]
impl SourceConnector for SanctionsConnector {
    fn name(&self) -> &str {
        "ofac_sdn"
    }

    fn stream(&self) -> StreamName {
        StreamName::Sanctions
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<PollBatch, ConnectorError> {
        let body = self.transport.fetch(&FeedRequest::get(&self.url)).await?;
        let digest = Self::body_digest(&body);

        if cursor == Some(digest.as_str()) {
            log::debug!("📋 SDN list unchanged ({}…)", &digest[..12]);
            return Ok(PollBatch::empty(cursor));
        }

        let rows = Self::parse_rows(&body)?;
        if rows.is_empty() && !body.trim().is_empty() {
            return Err(ConnectorError::Fatal(
                "SDN list contained no parseable rows".to_string(),
            ));
        }

        let items: Vec<Ingested> = rows.iter().filter_map(|row| self.classify(row)).collect();
        log::info!("📋 Parsed {} SDN entries", items.len());

        Ok(PollBatch {
            items,
            next_cursor: Some(digest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::transport::ScriptedTransport;

    const SDN: &str = r#"36,"AEROCARIBBEAN AIRLINES",-0- ,"CUBA",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0-
173,"ANGLO-CARIBBEAN CO., LTD.",-0- ,"CUBA",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,"Digital Currency Address - ETH 0x8576acc5c05d6ce88f4e49bf65bdf0c62f91353c"
306,"BANCO NACIONAL DE CUBA","individual","CUBA","Director",-0- ,-0- ,-0- ,-0- ,-0- ,-0- ,-0-
"#;

    fn connector(responses: Vec<Result<String, ConnectorError>>) -> SanctionsConnector {
        SanctionsConnector::new_with_timestamp_fn(
            Arc::new(ScriptedTransport::new(responses)),
            "https://example.test/sdn.csv",
            Box::new(|| 1_700_000_000),
        )
    }

    #[test]
    fn test_parse_rows_skips_header_and_placeholders() {
        let body = format!("ent_num,SDN_Name,SDN_Type,Program\n{}", SDN);
        let rows = SanctionsConnector::parse_rows(&body).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].ent_num, "36");
        assert_eq!(rows[0].sdn_type, None);
        assert_eq!(rows[0].program.as_deref(), Some("CUBA"));
        assert!(rows[1].remarks.as_deref().unwrap().contains("0x8576"));
        assert_eq!(rows[2].title.as_deref(), Some("Director"));
    }

    #[test]
    fn test_classify_builds_critical_document() {
        let connector = connector(vec![]);
        let row = SdnRow {
            ent_num: "306".to_string(),
            name: "BANCO NACIONAL DE CUBA".to_string(),
            sdn_type: None,
            program: Some("CUBA".to_string()),
            title: Some("Director".to_string()),
            remarks: None,
        };

        let Some(Ingested::Document(doc)) = connector.classify(&row) else {
            panic!("expected a document");
        };
        assert_eq!(doc.id, "ofac_sdn_306");
        assert_eq!(doc.risk_level, RiskLevel::Critical);
        assert_eq!(doc.source, SourceKind::Sanctions);
        assert!(doc.text.starts_with("OFAC SDN Entry: BANCO NACIONAL DE CUBA - Director"));
        assert_eq!(doc.metadata["program"], "CUBA");
        assert_eq!(doc.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_same_cursor_returns_no_items() {
        let connector = connector(vec![Ok(SDN.to_string())]);

        let first = connector.poll(None).await.unwrap();
        assert_eq!(first.items.len(), 3);
        let cursor = first.next_cursor.unwrap();

        let second = connector.poll(Some(&cursor)).await.unwrap();
        assert!(second.items.is_empty());
        assert_eq!(second.next_cursor.as_deref(), Some(cursor.as_str()));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let connector = connector(vec![Err(ConnectorError::Transient("timeout".to_string()))]);
        assert!(matches!(connector.poll(None).await, Err(ConnectorError::Transient(_))));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_fatal() {
        let connector = connector(vec![Ok("<html>maintenance</html>\n".to_string())]);
        assert!(matches!(connector.poll(None).await, Err(ConnectorError::Fatal(_))));
    }
}
