//! Replays scripted batches as if they came from a live source
//!
//! Each poll returns the next scripted batch. The cursor is the index of
//! the last batch delivered, so polling again with the same cursor yields
//! nothing new.

use super::{ConnectorError, PollBatch, SourceConnector};
use crate::pipeline::types::{Ingested, StreamName};
use async_trait::async_trait;

pub struct ReplayConnector {
    name: String,
    stream: StreamName,
    batches: Vec<Result<Vec<Ingested>, ConnectorError>>,
}

impl ReplayConnector {
    pub fn new(name: impl Into<String>, stream: StreamName, batches: Vec<Vec<Ingested>>) -> Self {
        Self {
            name: name.into(),
            stream,
            batches: batches.into_iter().map(Ok).collect(),
        }
    }

    /// Script that may include failures at specific positions
    pub fn with_results(
        name: impl Into<String>,
        stream: StreamName,
        batches: Vec<Result<Vec<Ingested>, ConnectorError>>,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            batches,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[async_trait]
impl SourceConnector for ReplayConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self) -> StreamName {
        self.stream
    }

    async fn poll(&self, cursor: Option<&str>) -> Result<PollBatch, ConnectorError> {
        let next = match cursor {
            Some(raw) => {
                let delivered: usize = raw
                    .parse()
                    .map_err(|_| ConnectorError::Fatal(format!("invalid replay cursor '{}'", raw)))?;
                delivered + 1
            }
            None => 0,
        };

        match self.batches.get(next) {
            None => Ok(PollBatch::empty(cursor)),
            Some(Err(e)) => Err(e.clone()),
            Some(Ok(items)) => Ok(PollBatch {
                items: items.clone(),
                next_cursor: Some(next.to_string()),
            }),
        }
    }
}
