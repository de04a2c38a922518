//! Persistent nearest-neighbour index over document embeddings
//!
//! The document store is the source of truth; vectors are a derived cache.
//!
//! - Writes go to the `vectors` table first, then a new in-memory snapshot is
//!   swapped in. Readers always see a complete snapshot.
//! - On load, rows are verified (dimension, byte length, sha256 checksum) and
//!   compared against the document count. Any mismatch rebuilds the index by
//!   re-embedding every stored document; searches during the rebuild use the
//!   last good snapshot.

use crate::pipeline::db::{SqliteStore, StoreError, VectorRow};
use crate::pipeline::types::Document;
use crate::providers::{Embedder, ProviderError};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum IndexError {
    Store(StoreError),
    Provider(ProviderError),
    Corrupt(String),
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        IndexError::Store(err)
    }
}

impl From<ProviderError> for IndexError {
    fn from(err: ProviderError) -> Self {
        IndexError::Provider(err)
    }
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Store(e) => write!(f, "Index store error: {}", e),
            IndexError::Provider(e) => write!(f, "Index embedding error: {}", e),
            IndexError::Corrupt(msg) => write!(f, "Index corrupt: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

type Snapshot = Arc<HashMap<String, Arc<[f32]>>>;

pub struct VectorIndex {
    store: SqliteStore,
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Snapshot>,
    /// One writer at a time
    write_gate: Mutex<()>,
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl VectorIndex {
    /// Empty index; call `load` to restore persisted vectors
    pub fn new(store: SqliteStore, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            write_gate: Mutex::new(()),
        }
    }

    /// Load persisted vectors, rebuilding from the document store if they are
    /// missing or corrupt
    pub async fn open(store: SqliteStore, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let index = Self::new(store, embedder);
        match index.load() {
            Ok(count) => log::info!("🗂️  Vector index loaded ({} entries)", count),
            Err(e) => {
                log::warn!("⚠️  {}; rebuilding from document store", e);
                let count = index.rebuild().await?;
                log::info!("🗂️  Vector index rebuilt ({} entries)", count);
            }
        }
        Ok(index)
    }

    /// Verify and install persisted vectors
    pub fn load(&self) -> Result<usize, IndexError> {
        let dimension = self.embedder.dimension();
        let rows = self.store.load_vectors()?;
        let documents = self.store.count_documents()?;

        if rows.len() != documents {
            return Err(IndexError::Corrupt(format!(
                "{} vectors for {} documents",
                rows.len(),
                documents
            )));
        }

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.dim != dimension || row.vector.len() != dimension * 4 {
                return Err(IndexError::Corrupt(format!(
                    "vector {} has dimension {} (expected {})",
                    row.doc_id, row.dim, dimension
                )));
            }
            if checksum(&row.vector) != row.checksum {
                return Err(IndexError::Corrupt(format!("checksum mismatch for {}", row.doc_id)));
            }
            map.insert(row.doc_id, Arc::from(decode_vector(&row.vector)));
        }

        let count = map.len();
        self.swap(map)?;
        Ok(count)
    }

    /// Re-embed every stored document and replace the persisted index
    pub async fn rebuild(&self) -> Result<usize, IndexError> {
        let _writer = self.write_gate.lock().await;
        let documents = self.store.all_documents()?;

        let mut rows = Vec::with_capacity(documents.len());
        let mut map = HashMap::with_capacity(documents.len());
        for doc in &documents {
            let vector = self.embedder.embed(&doc.text).await?;
            rows.push(self.row_for(&doc.id, &vector));
            map.insert(doc.id.clone(), Arc::from(vector));
        }

        self.store.replace_vectors(&rows)?;
        let count = map.len();
        self.swap(map)?;
        Ok(count)
    }

    /// Last-write-wins upsert keyed by document id
    pub async fn upsert(&self, doc: &Document) -> Result<(), IndexError> {
        self.upsert_many(std::slice::from_ref(doc)).await
    }

    /// Upsert a batch with a single snapshot swap
    pub async fn upsert_many(&self, docs: &[Document]) -> Result<(), IndexError> {
        if docs.is_empty() {
            return Ok(());
        }

        let mut embedded = Vec::with_capacity(docs.len());
        for doc in docs {
            embedded.push((doc.id.clone(), self.embedder.embed(&doc.text).await?));
        }

        let _writer = self.write_gate.lock().await;
        let mut map: HashMap<String, Arc<[f32]>> = (*self.current()?).clone();
        for (id, vector) in embedded {
            self.store.upsert_vector(&self.row_for(&id, &vector))?;
            map.insert(id, Arc::from(vector));
        }
        self.swap(map)?;
        Ok(())
    }

    /// k nearest documents by cosine similarity, ties broken by id
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<(Document, f32)>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;
        let snapshot = self.current()?;

        let mut scored: Vec<(&String, f32)> = snapshot
            .iter()
            .map(|(id, v)| (id, cosine_similarity(&query_vector, v)))
            .collect();
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(b.0),
            other => other,
        });
        scored.truncate(k);

        let ids: Vec<String> = scored.iter().map(|(id, _)| (*id).clone()).collect();
        let docs: HashMap<String, Document> = self
            .store
            .get_documents(&ids)?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        Ok(scored
            .into_iter()
            .filter_map(|(id, score)| docs.get(id).cloned().map(|d| (d, score)))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.current().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row_for(&self, doc_id: &str, vector: &[f32]) -> VectorRow {
        let bytes = encode_vector(vector);
        VectorRow {
            doc_id: doc_id.to_string(),
            dim: vector.len(),
            checksum: checksum(&bytes),
            vector: bytes,
        }
    }

    fn current(&self) -> Result<Snapshot, IndexError> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&s))
            .map_err(|_| IndexError::Corrupt("snapshot lock poisoned".to_string()))
    }

    fn swap(&self, map: HashMap<String, Arc<[f32]>>) -> Result<(), IndexError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| IndexError::Corrupt("snapshot lock poisoned".to_string()))?;
        *guard = Arc::new(map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::test_support::create_test_store;
    use crate::pipeline::types::{RiskLevel, SourceKind};
    use crate::providers::HashingEmbedder;

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, SourceKind::Sanctions, text, 1).with_risk(RiskLevel::Critical)
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::new(64))
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_id() {
        let (_temp, store) = create_test_store();
        let index = VectorIndex::new(store.clone(), embedder());
        let d = doc("ofac_sdn_1", "OFAC SDN Entry: ACME MIXER");
        store.upsert_document(&d).unwrap();

        index.upsert(&d).await.unwrap();
        index.upsert(&d).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(store.load_vectors().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let (_temp, store) = create_test_store();
        let index = VectorIndex::new(store.clone(), embedder());
        let docs = vec![
            doc("a", "OFAC sanctions tornado mixer"),
            doc("b", "quarterly exchange earnings report"),
        ];
        for d in &docs {
            store.upsert_document(d).unwrap();
        }
        index.upsert_many(&docs).await.unwrap();

        let results = index.search("tornado mixer sanctions", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, "a");
        assert!(results[0].1 > results[1].1);

        assert!(index.search("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_vectors_trigger_rebuild() {
        let (_temp, store) = create_test_store();
        let d = doc("ofac_sdn_1", "OFAC SDN Entry: ACME MIXER");
        store.upsert_document(&d).unwrap();
        store
            .upsert_vector(&VectorRow {
                doc_id: "ofac_sdn_1".to_string(),
                dim: 64,
                vector: vec![0u8; 256],
                checksum: "bogus".to_string(),
            })
            .unwrap();

        let index = VectorIndex::open(store.clone(), embedder()).await.unwrap();
        assert_eq!(index.len(), 1);

        let rows = store.load_vectors().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].checksum, checksum(&rows[0].vector));
    }

    #[tokio::test]
    async fn test_missing_vectors_trigger_rebuild() {
        let (_temp, store) = create_test_store();
        store.upsert_document(&doc("a", "alpha")).unwrap();
        store.upsert_document(&doc("b", "beta")).unwrap();

        let index = VectorIndex::open(store, embedder()).await.unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_vector_encoding_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }
}
