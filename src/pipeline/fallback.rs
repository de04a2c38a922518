//! Polling fallback backend
//!
//! Keeps the ids already emitted per stream in `seen_ids` (on disk) with an
//! in-memory cache in front of it, and computes the delta by hand. A known
//! document comes back as `Changed` when its risk rank is above the rank
//! last emitted.

use super::db::SqliteStore;
use super::engine::{collapse_batch, Delta, DeltaKind, EngineBackend, EngineError, StreamEngine};
use super::types::{Ingested, StreamName};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct FallbackEngine {
    store: SqliteStore,
    seen: Mutex<HashMap<StreamName, HashMap<String, u8>>>,
}

impl FallbackEngine {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StreamEngine for FallbackEngine {
    fn backend(&self) -> EngineBackend {
        EngineBackend::Fallback
    }

    async fn delta(&self, stream: StreamName, items: &[Ingested]) -> Result<Vec<Delta>, EngineError> {
        let mut cache = self.seen.lock().await;
        let seen = match cache.entry(stream) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let loaded = self.store.seen_ids(stream)?;
                log::debug!("📂 Loaded {} seen ids for {}", loaded.len(), stream);
                e.insert(loaded)
            }
        };

        let mut deltas = Vec::new();
        for item in collapse_batch(items) {
            let kind = match seen.get(item.key()) {
                None => DeltaKind::Added,
                Some(&rank) if item.risk_rank() > rank => DeltaKind::Changed,
                Some(_) => continue,
            };
            deltas.push(Delta { kind, item });
        }
        Ok(deltas)
    }

    async fn commit(&self, stream: StreamName, deltas: &[Delta]) -> Result<(), EngineError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let ids: Vec<(String, u8)> = deltas
            .iter()
            .map(|d| (d.item.key().to_string(), d.item.risk_rank()))
            .collect();

        self.store.mark_seen(stream, &ids)?;
        let mut cache = self.seen.lock().await;
        let seen = cache.entry(stream).or_default();
        for (id, rank) in ids {
            seen.entry(id).and_modify(|r| *r = (*r).max(rank)).or_insert(rank);
        }
        Ok(())
    }
}
