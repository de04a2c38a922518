//! # Ingestion Pipeline
//!
//! Connectors feed batches into a stream engine that decides which items are
//! new or changed; the shared downstream path persists them, publishes stream
//! records, keeps the vector index current and raises alerts.
//!
//! ## Module Organization
//!
//! - `types` - Documents, transactions, alerts and stream names
//! - `config` - Environment configuration, risk weights, alert thresholds
//! - `db` - SQLite store (documents, streams, alerts, wallets, vectors)
//! - `engine` - `StreamEngine` seam and the shared `Pipeline`
//! - `incremental` / `fallback` - The two engine backends
//! - `windows` - Time-bounded transaction windows
//! - `scheduler` - Per-connector polling tasks
//! - `health` - Connector status for `/health`
//! - `context` - Engine lifecycle (start / stop / ingest)

pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod fallback;
pub mod health;
pub mod incremental;
pub mod scheduler;
pub mod types;
pub mod windows;

pub use config::EngineConfig;
pub use context::{EngineContext, EngineParts, ScheduledConnector};
pub use db::SqliteStore;
pub use engine::{BatchSummary, EngineBackend, EngineError, Pipeline, StreamEngine};
pub use types::{Alert, Document, Ingested, StreamName, StreamRecord, Transaction};
