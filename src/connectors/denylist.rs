//! High-risk counterparty denylist
//!
//! Query logic for the SQLite provider:
//! ```sql
//! SELECT address FROM address_denylist
//! WHERE address = ? AND (expires_at IS NULL OR expires_at > ?)
//! ```
//!
//! Expiration handling:
//! - `expires_at = NULL`: permanently denylisted
//! - `expires_at > now`: temporarily denylisted
//! - `expires_at <= now`: entry has expired
//!
//! Each check hits the table directly, so operator edits apply without a restart.

use crate::pipeline::db::{SqliteStore, StoreError};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait DenylistProvider: Send + Sync {
    /// Returns true if the address is currently denylisted
    async fn is_denylisted(&self, address: &str, now: i64) -> Result<bool, StoreError>;
}

/// Denylist backed by the `address_denylist` table
#[derive(Clone)]
pub struct SqliteDenylist {
    store: SqliteStore,
}

impl SqliteDenylist {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Insert configured addresses as permanent entries
    pub fn seed(&self, addresses: &[String]) -> Result<usize, StoreError> {
        for address in addresses {
            self.store.add_to_denylist(address, "configured", "config", None)?;
        }
        if !addresses.is_empty() {
            log::info!("🚫 Seeded {} denylisted addresses from configuration", addresses.len());
        }
        Ok(addresses.len())
    }
}

#[async_trait]
impl DenylistProvider for SqliteDenylist {
    async fn is_denylisted(&self, address: &str, now: i64) -> Result<bool, StoreError> {
        self.store.is_denylisted(&address.to_lowercase(), now)
    }
}

/// Fixed in-memory denylist
#[derive(Debug, Clone, Default)]
pub struct StaticDenylist {
    addresses: HashSet<String>,
}

impl StaticDenylist {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl DenylistProvider for StaticDenylist {
    async fn is_denylisted(&self, address: &str, _now: i64) -> Result<bool, StoreError> {
        Ok(self.addresses.contains(&address.to_lowercase()))
    }
}
