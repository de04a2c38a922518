//! SQLite persistence for documents, transactions, streams, alerts and wallets
//!
//! One `Arc<Mutex<Connection>>` per store; every public method takes the lock
//! once, so each upsert is atomic per id and stream `seq` allocation is
//! serialized.
//!
//! Tables (see `/sql/`):
//! - `documents` - UPSERT on id, only `risk_level` may be upgraded
//! - `transactions` - INSERT OR IGNORE on hash (append-only)
//! - `stream_records` - append, `seq = MAX(seq) + 1` per stream, at most one
//!   record per `(stream, item_key)`
//! - `seen_ids` - emitted ids and risk rank per stream, written at engine commit
//! - `alerts` - INSERT OR IGNORE on dedup_key
//! - `wallet_subscriptions` - tracker state, `tx_cursor` only moves forward
//! - `connector_cursors`, `vectors`, `address_denylist`

use super::types::{
    Alert, AlertType, Document, RiskFlag, RiskLevel, Severity, SourceKind, StreamName, StreamRecord,
    Transaction, TxDirection,
};
use crate::wallet::state::{WalletState, WalletSubscription};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
    Schema(String),
    Corrupt(String),
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Schema(msg) => write!(f, "Schema error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
            StoreError::LockPoisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in filename order and executes
/// them. Every file must use `IF NOT EXISTS` so reruns are no-ops.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Schema(format!("Schema directory not found: {}", schema_dir)));
    }

    // PRAGMA journal_mode returns a row, so go through pragma_update
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().to_string();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// Result of a document upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Existing row had a lower risk level and was upgraded
    Upgraded,
    Unchanged,
}

/// Persisted embedding row
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub doc_id: String,
    pub dim: usize,
    pub vector: Vec<u8>,
    pub checksum: String,
}

/// Shared handle to the engine database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    pub fn open(db_path: &str, schema_dir: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already-migrated connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // ----- documents -----

    /// Insert a document, or upgrade the stored risk level if the incoming one is higher
    ///
    /// Text, metadata and timestamp of an existing document are never rewritten.
    pub fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome, StoreError> {
        let conn = self.lock()?;
        let now = Self::now();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT risk_rank FROM documents WHERE id = ?",
                [&doc.id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(
                    r#"
                    INSERT INTO documents (
                        id, source, text, metadata_json, risk_level, risk_rank,
                        timestamp, origin_link, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    rusqlite::params![
                        doc.id,
                        doc.source.as_str(),
                        doc.text,
                        serde_json::to_string(&doc.metadata)?,
                        doc.risk_level.as_str(),
                        doc.risk_level.rank() as i64,
                        doc.timestamp,
                        doc.origin_link,
                        now,
                        now,
                    ],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(rank) if (doc.risk_level.rank() as i64) > rank => {
                conn.execute(
                    "UPDATE documents SET risk_level = ?, risk_rank = ?, updated_at = ? WHERE id = ?",
                    rusqlite::params![
                        doc.risk_level.as_str(),
                        doc.risk_level.rank() as i64,
                        now,
                        doc.id
                    ],
                )?;
                Ok(UpsertOutcome::Upgraded)
            }
            Some(_) => Ok(UpsertOutcome::Unchanged),
        }
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?", DOCUMENT_SELECT),
                [id],
                raw_document,
            )
            .optional()?;
        raw.map(RawDocument::into_document).transpose()
    }

    pub fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>, StoreError> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get_document(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Every stored document, ordered by id
    pub fn all_documents(&self) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", DOCUMENT_SELECT))?;
        let rows = stmt
            .query_map([], raw_document)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawDocument::into_document).collect()
    }

    /// Documents whose text contains `needle` (case-insensitive), restricted to `sources`
    pub fn documents_mentioning(
        &self,
        needle: &str,
        sources: &[SourceKind],
    ) -> Result<Vec<Document>, StoreError> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE instr(lower(text), ?) > 0 ORDER BY id",
            DOCUMENT_SELECT
        ))?;
        let rows = stmt
            .query_map([&needle], raw_document)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::new();
        for raw in rows {
            let doc = raw.into_document()?;
            if sources.contains(&doc.source) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    pub fn count_documents(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ----- transactions -----

    /// Insert a transaction; returns false if the hash was already stored
    pub fn insert_transaction(&self, tx: &Transaction) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let flags: Vec<RiskFlag> = tx.risk_flags.iter().copied().collect();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO transactions (
                hash, wallet_address, counterparty, value_eth, timestamp,
                block_number, direction, risk_flags_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                tx.hash,
                tx.wallet_address,
                tx.counterparty,
                tx.value,
                tx.timestamp,
                tx.block_number as i64,
                tx.direction.as_str(),
                serde_json::to_string(&flags)?,
                Self::now(),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Transactions for a wallet ordered by (timestamp, hash)
    pub fn transactions_for_wallet(&self, address: &str) -> Result<Vec<Transaction>, StoreError> {
        self.transactions_between(address, i64::MIN, i64::MAX)
    }

    /// Transactions for a wallet with `from_ts <= timestamp <= to_ts`
    pub fn transactions_between(
        &self,
        address: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} WHERE wallet_address = ? AND timestamp >= ? AND timestamp <= ? ORDER BY timestamp, hash",
            TRANSACTION_SELECT
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![address, from_ts, to_ts], raw_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    pub fn all_transactions(&self) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY hash", TRANSACTION_SELECT))?;
        let rows = stmt
            .query_map([], raw_transaction)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTransaction::into_transaction).collect()
    }

    // ----- streams -----

    /// Append a record to a stream, allocating the next `seq`
    pub fn append_record(
        &self,
        stream: StreamName,
        wallet_address: Option<&str>,
        payload: &Value,
    ) -> Result<StreamRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let record = append_on(&tx, stream, wallet_address, None, payload)?;
        tx.commit()?;
        record.ok_or_else(|| StoreError::Corrupt(format!("unkeyed append to {} was skipped", stream)))
    }

    /// Append a record at most once per `(stream, item_key)`
    ///
    /// Returns `None` when a record with this key was already published.
    pub fn append_record_once(
        &self,
        stream: StreamName,
        wallet_address: Option<&str>,
        item_key: &str,
        payload: &Value,
    ) -> Result<Option<StreamRecord>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let record = append_on(&tx, stream, wallet_address, Some(item_key), payload)?;
        tx.commit()?;
        Ok(record)
    }

    /// Read records in ascending `seq` order
    ///
    /// With `after_seq`, returns up to `limit` records following it.
    /// Without, returns the latest `limit` records.
    pub fn read_stream(
        &self,
        stream: StreamName,
        after_seq: Option<i64>,
        wallet_address: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let conn = self.lock()?;
        let limit = limit as i64;

        let (sql, ascending) = match after_seq {
            Some(_) => (
                "SELECT seq, wallet_address, payload_json, created_at FROM stream_records
                 WHERE stream_name = ?1 AND seq > ?2 AND (?3 IS NULL OR wallet_address = ?3)
                 ORDER BY seq ASC LIMIT ?4",
                true,
            ),
            None => (
                "SELECT seq, wallet_address, payload_json, created_at FROM stream_records
                 WHERE stream_name = ?1 AND seq > ?2 AND (?3 IS NULL OR wallet_address = ?3)
                 ORDER BY seq DESC LIMIT ?4",
                false,
            ),
        };

        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![stream.as_str(), after_seq.unwrap_or(0), wallet_address, limit],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (seq, wallet, payload_json, created_at) in rows {
            records.push(StreamRecord {
                stream_name: stream,
                seq,
                wallet_address: wallet,
                payload: serde_json::from_str(&payload_json)?,
                created_at,
            });
        }
        if !ascending {
            records.reverse();
        }
        Ok(records)
    }

    // ----- seen ids -----

    /// Emitted ids on one stream with the highest risk rank published
    pub fn seen_ids(&self, stream: StreamName) -> Result<HashMap<String, u8>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT item_id, risk_rank FROM seen_ids WHERE stream_name = ?")?;
        let ids = stmt
            .query_map([stream.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, rank_from_sql(row.get::<_, i64>(1)?)))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(ids)
    }

    /// Every emitted (stream, id, rank), used to hydrate engine state
    pub fn all_seen(&self) -> Result<Vec<(StreamName, String, u8)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT stream_name, item_id, risk_rank FROM seen_ids")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(stream, id, rank)| {
                let stream = stream.parse::<StreamName>().map_err(StoreError::Corrupt)?;
                Ok((stream, id, rank_from_sql(rank)))
            })
            .collect()
    }

    /// Record ids as emitted; a known id keeps the higher of the two ranks
    pub fn mark_seen(&self, stream: StreamName, ids: &[(String, u8)]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let now = Self::now();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO seen_ids (stream_name, item_id, risk_rank, first_seen_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(stream_name, item_id) DO UPDATE SET risk_rank = MAX(risk_rank, excluded.risk_rank)",
            )?;
            for (id, rank) in ids {
                stmt.execute(rusqlite::params![stream.as_str(), id, *rank as i64, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ----- alerts -----

    /// Insert an alert and its stream records unless its dedup_key already exists
    ///
    /// The alert row, the wallet's `alert_count` bump and one record per entry
    /// of `streams` commit together. Returns true when the alert is new.
    pub fn publish_alert(&self, alert: &Alert, streams: &[StreamName]) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO alerts (
                dedup_key, id, alert_type, severity, wallet_address,
                evidence_json, description, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                alert.dedup_key,
                alert.id,
                alert.alert_type.as_str(),
                alert.severity.as_str(),
                alert.wallet_address,
                serde_json::to_string(&alert.evidence_refs)?,
                alert.description,
                alert.timestamp,
            ],
        )?;

        if inserted == 1 {
            if let Some(wallet) = &alert.wallet_address {
                tx.execute(
                    "UPDATE wallet_subscriptions SET alert_count = alert_count + 1 WHERE address = ?",
                    [wallet],
                )?;
            }
            let payload = serde_json::to_value(alert)?;
            for stream in streams {
                append_on(
                    &tx,
                    *stream,
                    alert.wallet_address.as_deref(),
                    Some(&alert.dedup_key),
                    &payload,
                )?;
            }
        }
        tx.commit()?;
        Ok(inserted == 1)
    }

    /// Alerts ordered by (timestamp, dedup_key), optionally for one wallet
    pub fn alerts(&self, wallet_address: Option<&str>) -> Result<Vec<Alert>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT dedup_key, id, alert_type, severity, wallet_address, evidence_json, description, timestamp
             FROM alerts WHERE (?1 IS NULL OR wallet_address = ?1)
             ORDER BY timestamp, dedup_key",
        )?;
        let rows = stmt
            .query_map([wallet_address], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(dedup_key, id, alert_type, severity, wallet, evidence, description, timestamp)| {
                Ok(Alert {
                    id,
                    dedup_key,
                    alert_type: alert_type.parse::<AlertType>().map_err(StoreError::Corrupt)?,
                    severity: severity.parse::<Severity>().map_err(StoreError::Corrupt)?,
                    wallet_address: wallet,
                    evidence_refs: serde_json::from_str(&evidence)?,
                    description,
                    timestamp,
                })
            })
            .collect()
    }

    // ----- wallets -----

    pub fn get_wallet(&self, address: &str) -> Result<Option<WalletSubscription>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(&format!("{} WHERE address = ?", WALLET_SELECT), [address], raw_wallet)
            .optional()?;
        raw.map(RawWallet::into_subscription).transpose()
    }

    pub fn list_wallets(&self) -> Result<Vec<WalletSubscription>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY address", WALLET_SELECT))?;
        let rows = stmt
            .query_map([], raw_wallet)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawWallet::into_subscription).collect()
    }

    /// Persist tracker state for a wallet and return the stored snapshot
    ///
    /// `tx_cursor` is merged with `MAX` so it never moves backwards, and
    /// `tx_count` is recomputed from the transactions table.
    pub fn save_wallet(&self, sub: &WalletSubscription) -> Result<WalletSubscription, StoreError> {
        {
            let conn = self.lock()?;
            let now = Self::now();
            conn.execute(
                r#"
                INSERT INTO wallet_subscriptions (
                    address, state, last_poll_ts, tx_cursor, consecutive_failures,
                    last_error, tx_count, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                    (SELECT COUNT(*) FROM transactions WHERE wallet_address = ?1), ?7, ?7)
                ON CONFLICT(address) DO UPDATE SET
                    state = excluded.state,
                    last_poll_ts = COALESCE(excluded.last_poll_ts, wallet_subscriptions.last_poll_ts),
                    tx_cursor = CASE
                        WHEN excluded.tx_cursor IS NULL THEN wallet_subscriptions.tx_cursor
                        WHEN wallet_subscriptions.tx_cursor IS NULL THEN excluded.tx_cursor
                        ELSE MAX(wallet_subscriptions.tx_cursor, excluded.tx_cursor)
                    END,
                    consecutive_failures = excluded.consecutive_failures,
                    last_error = excluded.last_error,
                    tx_count = excluded.tx_count,
                    updated_at = excluded.updated_at
                "#,
                rusqlite::params![
                    sub.address,
                    sub.state.as_str(),
                    sub.last_poll_ts,
                    sub.tx_cursor.map(|c| c as i64),
                    sub.consecutive_failures as i64,
                    sub.last_error,
                    now,
                ],
            )?;
        }

        self.get_wallet(&sub.address)?
            .ok_or_else(|| StoreError::Corrupt(format!("wallet {} vanished after save", sub.address)))
    }

    // ----- connector cursors -----

    pub fn connector_cursor(&self, connector: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let cursor = conn
            .query_row(
                "SELECT cursor FROM connector_cursors WHERE connector = ?",
                [connector],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    pub fn set_connector_cursor(&self, connector: &str, cursor: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO connector_cursors (connector, cursor, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(connector) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at",
            rusqlite::params![connector, cursor, Self::now()],
        )?;
        Ok(())
    }

    // ----- vectors -----

    pub fn upsert_vector(&self, row: &VectorRow) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vectors (doc_id, dim, vector, checksum, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(doc_id) DO UPDATE SET
                dim = excluded.dim,
                vector = excluded.vector,
                checksum = excluded.checksum,
                updated_at = excluded.updated_at",
            rusqlite::params![row.doc_id, row.dim as i64, row.vector, row.checksum, Self::now()],
        )?;
        Ok(())
    }

    pub fn load_vectors(&self) -> Result<Vec<VectorRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT doc_id, dim, vector, checksum FROM vectors ORDER BY doc_id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VectorRow {
                    doc_id: row.get(0)?,
                    dim: row.get::<_, i64>(1)?.max(0) as usize,
                    vector: row.get(2)?,
                    checksum: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace every persisted vector in one transaction
    pub fn replace_vectors(&self, rows: &[VectorRow]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let now = Self::now();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vectors", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vectors (doc_id, dim, vector, checksum, updated_at) VALUES (?, ?, ?, ?, ?)",
            )?;
            for row in rows {
                stmt.execute(rusqlite::params![row.doc_id, row.dim as i64, row.vector, row.checksum, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ----- denylist -----

    /// Returns true if the address is on the operator denylist and not expired
    pub fn is_denylisted(&self, address: &str, now: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT address FROM address_denylist
             WHERE address = ? AND (expires_at IS NULL OR expires_at > ?)",
        )?;
        Ok(stmt.exists(rusqlite::params![address, now])?)
    }

    pub fn add_to_denylist(
        &self,
        address: &str,
        reason: &str,
        added_by: &str,
        expires_at: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO address_denylist (address, reason, added_by, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                reason = excluded.reason,
                added_by = excluded.added_by,
                expires_at = excluded.expires_at",
            rusqlite::params![address.to_lowercase(), reason, added_by, Self::now(), expires_at],
        )?;
        Ok(())
    }

    pub fn remove_from_denylist(&self, address: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM address_denylist WHERE address = ?",
            [address.to_lowercase()],
        )?;
        Ok(removed > 0)
    }
}

/// Append one record inside an open transaction
///
/// With an `item_key` already present on the stream nothing is written.
fn append_on(
    conn: &Connection,
    stream: StreamName,
    wallet_address: Option<&str>,
    item_key: Option<&str>,
    payload: &Value,
) -> Result<Option<StreamRecord>, StoreError> {
    if let Some(key) = item_key {
        let exists = conn
            .query_row(
                "SELECT 1 FROM stream_records WHERE stream_name = ? AND item_key = ?",
                rusqlite::params![stream.as_str(), key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Ok(None);
        }
    }

    let created_at = chrono::Utc::now().timestamp();
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM stream_records WHERE stream_name = ?",
        [stream.as_str()],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO stream_records (stream_name, seq, wallet_address, item_key, payload_json, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            stream.as_str(),
            seq,
            wallet_address,
            item_key,
            serde_json::to_string(payload)?,
            created_at
        ],
    )?;

    Ok(Some(StreamRecord {
        stream_name: stream,
        seq,
        wallet_address: wallet_address.map(str::to_string),
        payload: payload.clone(),
        created_at,
    }))
}

fn rank_from_sql(rank: i64) -> u8 {
    rank.clamp(0, u8::MAX as i64) as u8
}

const DOCUMENT_SELECT: &str =
    "SELECT id, source, text, metadata_json, risk_level, timestamp, origin_link FROM documents";

const TRANSACTION_SELECT: &str = "SELECT hash, wallet_address, counterparty, value_eth, timestamp, \
     block_number, direction, risk_flags_json FROM transactions";

const WALLET_SELECT: &str = "SELECT address, state, last_poll_ts, tx_cursor, alert_count, tx_count, \
     consecutive_failures, last_error FROM wallet_subscriptions";

struct RawDocument {
    id: String,
    source: String,
    text: String,
    metadata_json: String,
    risk_level: String,
    timestamp: i64,
    origin_link: Option<String>,
}

fn raw_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDocument> {
    Ok(RawDocument {
        id: row.get(0)?,
        source: row.get(1)?,
        text: row.get(2)?,
        metadata_json: row.get(3)?,
        risk_level: row.get(4)?,
        timestamp: row.get(5)?,
        origin_link: row.get(6)?,
    })
}

impl RawDocument {
    fn into_document(self) -> Result<Document, StoreError> {
        Ok(Document {
            source: self.source.parse::<SourceKind>().map_err(StoreError::Corrupt)?,
            risk_level: self.risk_level.parse::<RiskLevel>().map_err(StoreError::Corrupt)?,
            metadata: serde_json::from_str(&self.metadata_json)?,
            id: self.id,
            text: self.text,
            timestamp: self.timestamp,
            origin_link: self.origin_link,
        })
    }
}

struct RawTransaction {
    hash: String,
    wallet_address: String,
    counterparty: String,
    value: f64,
    timestamp: i64,
    block_number: i64,
    direction: String,
    risk_flags_json: String,
}

fn raw_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTransaction> {
    Ok(RawTransaction {
        hash: row.get(0)?,
        wallet_address: row.get(1)?,
        counterparty: row.get(2)?,
        value: row.get(3)?,
        timestamp: row.get(4)?,
        block_number: row.get(5)?,
        direction: row.get(6)?,
        risk_flags_json: row.get(7)?,
    })
}

impl RawTransaction {
    fn into_transaction(self) -> Result<Transaction, StoreError> {
        let flags: Vec<RiskFlag> = serde_json::from_str(&self.risk_flags_json)?;
        Ok(Transaction {
            direction: self.direction.parse::<TxDirection>().map_err(StoreError::Corrupt)?,
            risk_flags: flags.into_iter().collect::<BTreeSet<_>>(),
            hash: self.hash,
            wallet_address: self.wallet_address,
            counterparty: self.counterparty,
            value: self.value,
            timestamp: self.timestamp,
            block_number: self.block_number.max(0) as u64,
        })
    }
}

struct RawWallet {
    address: String,
    state: String,
    last_poll_ts: Option<i64>,
    tx_cursor: Option<i64>,
    alert_count: i64,
    tx_count: i64,
    consecutive_failures: i64,
    last_error: Option<String>,
}

fn raw_wallet(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawWallet> {
    Ok(RawWallet {
        address: row.get(0)?,
        state: row.get(1)?,
        last_poll_ts: row.get(2)?,
        tx_cursor: row.get(3)?,
        alert_count: row.get(4)?,
        tx_count: row.get(5)?,
        consecutive_failures: row.get(6)?,
        last_error: row.get(7)?,
    })
}

impl RawWallet {
    fn into_subscription(self) -> Result<WalletSubscription, StoreError> {
        Ok(WalletSubscription {
            state: self.state.parse::<WalletState>().map_err(StoreError::Corrupt)?,
            address: self.address,
            last_poll_ts: self.last_poll_ts,
            tx_cursor: self.tx_cursor.map(|c| c.max(0) as u64),
            alert_count: self.alert_count.max(0) as u64,
            tx_count: self.tx_count.max(0) as u64,
            consecutive_failures: self.consecutive_failures.clamp(0, u32::MAX as i64) as u32,
            last_error: self.last_error,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::NamedTempFile;

    /// Temp database migrated from the real `sql/` directory
    pub fn create_test_store() -> (NamedTempFile, SqliteStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        let store = SqliteStore::open(&db_path, concat!(env!("CARGO_MANIFEST_DIR"), "/sql")).unwrap();
        (temp_file, store)
    }
}
