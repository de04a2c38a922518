//! Wallet registry and per-wallet polling
//!
//! - `connect` is idempotent: a monitored wallet is returned unchanged.
//!   Otherwise the wallet moves to `Connecting`, is polled once inline and a
//!   background task keeps polling it every interval.
//! - At most one poll per address is in flight; overlapping calls return the
//!   current snapshot without polling.
//! - State changes are applied to the freshly loaded row under a gate, so a
//!   `stop` that races a poll always wins.
//! - `tx_cursor` is merged with `MAX` on save and never moves backwards.
//! - A poll skipped because the chain budget is spent leaves state and
//!   failure count untouched; the loop sleeps until the budget resets.
//! - Poll outcomes are recorded against the `chain` health entry.

use super::state::{transition, FailureThresholds, WalletEvent, WalletState, WalletSubscription};
use crate::connectors::backoff::ExponentialBackoff;
use crate::connectors::chain::ChainSource;
use crate::connectors::ConnectorError;
use crate::pipeline::db::{SqliteStore, StoreError};
use crate::pipeline::engine::{EngineError, Pipeline};
use crate::pipeline::health::HealthRegistry;
use crate::pipeline::scheduler::sleep_or_shutdown;
use crate::pipeline::types::{normalize_address, Ingested, StreamName};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum WalletError {
    InvalidAddress(String),
    NotFound(String),
    Store(StoreError),
    Engine(EngineError),
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<EngineError> for WalletError {
    fn from(err: EngineError) -> Self {
        WalletError::Engine(err)
    }
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::InvalidAddress(a) => write!(f, "Invalid wallet address: {}", a),
            WalletError::NotFound(a) => write!(f, "Wallet not tracked: {}", a),
            WalletError::Store(e) => write!(f, "Wallet store error: {}", e),
            WalletError::Engine(e) => write!(f, "Wallet processing error: {}", e),
        }
    }
}

impl std::error::Error for WalletError {}

/// Accepts `0x` followed by 1..=64 alphanumeric characters
pub fn validate_address(address: &str) -> Result<String, WalletError> {
    let normalized = normalize_address(address);
    let body = normalized.strip_prefix("0x").unwrap_or("");
    if body.is_empty() || body.len() > 64 || !body.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(WalletError::InvalidAddress(address.to_string()));
    }
    Ok(normalized)
}

/// Removes the address from the in-flight set when the poll ends
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    address: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.address);
        }
    }
}

pub struct WalletTracker {
    store: SqliteStore,
    chain: Arc<dyn ChainSource>,
    pipeline: Arc<Pipeline>,
    limits: FailureThresholds,
    poll_interval: Duration,
    backoff: (u64, u64),
    shutdown: watch::Receiver<bool>,
    in_flight: Mutex<HashSet<String>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Serializes load → transition → save
    state_gate: Mutex<()>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    health: Option<Arc<HealthRegistry>>,
}

/// Health entry name shared by every wallet poll
pub const CHAIN_CONNECTOR: &str = "chain";

impl WalletTracker {
    pub fn new(
        pipeline: Arc<Pipeline>,
        chain: Arc<dyn ChainSource>,
        limits: FailureThresholds,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self::new_with_timestamp_fn(
            pipeline,
            chain,
            limits,
            poll_interval,
            shutdown,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    pub fn new_with_timestamp_fn(
        pipeline: Arc<Pipeline>,
        chain: Arc<dyn ChainSource>,
        limits: FailureThresholds,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            store: pipeline.store().clone(),
            chain,
            pipeline,
            limits,
            poll_interval,
            backoff: (1_000, 300_000),
            shutdown,
            in_flight: Mutex::new(HashSet::new()),
            tasks: Mutex::new(HashMap::new()),
            state_gate: Mutex::new(()),
            now_fn,
            health: None,
        }
    }

    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.backoff = (initial_ms, max_ms);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthRegistry>) -> Self {
        health.register(CHAIN_CONNECTOR);
        self.health = Some(health);
        self
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>, WalletError> {
        self.state_gate.lock().map_err(|_| WalletError::Store(StoreError::LockPoisoned))
    }

    /// Start monitoring an address; a no-op for wallets already monitored
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<WalletSubscription, WalletError> {
        let address = validate_address(address)?;

        let connecting = {
            let _gate = self.gate()?;
            let current = self
                .store
                .get_wallet(&address)?
                .unwrap_or_else(|| WalletSubscription::unregistered(&address));

            if current.state.is_monitored() {
                drop(_gate);
                self.ensure_task(&address);
                return Ok(current);
            }

            let mut next = current;
            next.state = transition(next.state, WalletEvent::Connect, self.limits);
            next.consecutive_failures = 0;
            next.last_error = None;
            self.store.save_wallet(&next)?
        };
        log::info!("👛 Connecting wallet {} (cursor: {:?})", address, connecting.tx_cursor);

        let snapshot = self.poll_once(&address).await?;
        if snapshot.state.is_monitored() {
            self.ensure_task(&address);
        }
        Ok(snapshot)
    }

    /// Stop monitoring; the polling task exits at its next wake-up
    pub fn stop(&self, address: &str) -> Result<WalletSubscription, WalletError> {
        let address = normalize_address(address);
        let _gate = self.gate()?;
        let mut sub = self
            .store
            .get_wallet(&address)?
            .ok_or_else(|| WalletError::NotFound(address.clone()))?;

        sub.state = transition(sub.state, WalletEvent::Stop, self.limits);
        let saved = self.store.save_wallet(&sub)?;
        log::info!("🛑 Wallet {} stopped", address);
        Ok(saved)
    }

    pub fn status(&self, address: &str) -> Result<WalletSubscription, WalletError> {
        let address = normalize_address(address);
        self.store
            .get_wallet(&address)?
            .ok_or(WalletError::NotFound(address))
    }

    pub fn list(&self) -> Result<Vec<WalletSubscription>, WalletError> {
        Ok(self.store.list_wallets()?)
    }

    /// Poll the chain once for a monitored wallet and apply the outcome
    pub async fn poll_once(&self, address: &str) -> Result<WalletSubscription, WalletError> {
        let (sub, _) = self.poll_with_skip(address).await?;
        Ok(sub)
    }

    /// Like `poll_once`; also returns the wait when the poll was skipped
    /// because the chain budget is spent.
    async fn poll_with_skip(
        &self,
        address: &str,
    ) -> Result<(WalletSubscription, Option<Duration>), WalletError> {
        let address = normalize_address(address);
        let Some(_flight) = self.begin_poll(&address) else {
            log::debug!("⏭️  Poll already in flight for {}", address);
            return Ok((self.status(&address)?, None));
        };

        let sub = self.status(&address)?;
        if !sub.state.is_monitored() {
            return Ok((sub, None));
        }

        let outcome = self.chain.poll_address(&address, sub.tx_cursor).await;
        let now = (self.now_fn)();

        let (event, cursor, error) = match outcome {
            Ok(batch) => {
                let fetched = batch.transactions.len();
                let items: Vec<Ingested> = batch.transactions.into_iter().map(Ingested::Transaction).collect();
                let summary = self.pipeline.process(StreamName::WalletTransactions, items).await?;
                self.pipeline.alerts().check_wallet_sanctions(&address)?;
                if let Some(health) = &self.health {
                    health.record_success(CHAIN_CONNECTOR, &summary, now);
                }
                log::debug!("👛 {}: {} transactions fetched", address, fetched);
                (WalletEvent::PollSucceeded, batch.next_cursor, None)
            }
            Err(ConnectorError::RateLimited(wait)) => {
                if let Some(health) = &self.health {
                    health.record_rate_limited(CHAIN_CONNECTOR);
                }
                log::debug!("⏸️  {}: chain budget exhausted, next poll in {}s", address, wait.as_secs());
                return Ok((sub, Some(wait)));
            }
            Err(e) => {
                if let Some(health) = &self.health {
                    health.record_failure(CHAIN_CONNECTOR, &e);
                }
                let fatal = e.is_fatal();
                let msg = match e {
                    ConnectorError::Transient(msg) | ConnectorError::Fatal(msg) => msg,
                    other => other.to_string(),
                };
                let event = if fatal {
                    WalletEvent::FatalError
                } else {
                    WalletEvent::PollFailed {
                        consecutive: sub.consecutive_failures + 1,
                    }
                };
                (event, None, Some(msg))
            }
        };

        let _gate = self.gate()?;
        let mut latest = self.status(&address)?;
        let before = latest.state;
        latest.state = transition(latest.state, event, self.limits);
        latest.last_poll_ts = Some(now);
        if cursor.is_some() {
            latest.tx_cursor = cursor;
        }
        match &error {
            None => {
                latest.consecutive_failures = 0;
                latest.last_error = None;
            }
            Some(msg) => {
                latest.consecutive_failures = latest.consecutive_failures.saturating_add(1);
                latest.last_error = Some(msg.clone());
            }
        }
        let saved = self.store.save_wallet(&latest)?;

        if before != saved.state {
            match saved.state {
                WalletState::Degraded => log::warn!(
                    "⚠️  Wallet {} degraded after {} failures",
                    address,
                    saved.consecutive_failures
                ),
                WalletState::Stopped => log::error!(
                    "❌ Wallet {} stopped: {}",
                    address,
                    saved.last_error.as_deref().unwrap_or("stop requested")
                ),
                state => log::info!("👛 Wallet {} is {}", address, state.as_str()),
            }
        }
        Ok((saved, None))
    }

    /// Spawn polling tasks for every wallet persisted as monitored
    pub fn resume_all(self: &Arc<Self>) -> Result<usize, StoreError> {
        let mut resumed = 0;
        for sub in self.store.list_wallets()? {
            if sub.state.is_monitored() && self.ensure_task(&sub.address) {
                resumed += 1;
            }
        }
        if resumed > 0 {
            log::info!("👛 Resumed polling for {} wallets", resumed);
        }
        Ok(resumed)
    }

    /// Await every polling task after shutdown has been signalled
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().map(|(_, h)| h).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("⚠️  Wallet task ended abnormally: {}", e);
            }
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .map(|t| t.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    fn begin_poll(&self, address: &str) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(address.to_string()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            address: address.to_string(),
        })
    }

    /// Spawn the polling loop unless one is running or the engine is stopped
    fn ensure_task(self: &Arc<Self>, address: &str) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        let Ok(mut tasks) = self.tasks.lock() else {
            return false;
        };
        if tasks.get(address).is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let tracker = Arc::clone(self);
        let addr = address.to_string();
        let handle = tokio::spawn(async move { tracker.poll_loop(addr).await });
        tasks.insert(address.to_string(), handle);
        true
    }

    async fn poll_loop(self: Arc<Self>, address: String) {
        let mut shutdown = self.shutdown.clone();
        shutdown.borrow_and_update();
        let mut backoff = ExponentialBackoff::new(self.backoff.0, self.backoff.1);
        let mut delay = self.poll_interval;

        loop {
            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }

            match self.poll_with_skip(&address).await {
                Ok((sub, _)) if !sub.state.is_monitored() => break,
                Ok((_, Some(wait))) => {
                    delay = wait.max(self.poll_interval);
                }
                Ok((sub, None)) if sub.consecutive_failures > 0 => {
                    delay = backoff.next_delay().max(self.poll_interval);
                }
                Ok((_, None)) => {
                    backoff.reset();
                    delay = self.poll_interval;
                }
                Err(WalletError::NotFound(_)) => break,
                Err(e) => {
                    log::error!("❌ Wallet {} poll error: {}", address, e);
                    delay = backoff.next_delay().max(self.poll_interval);
                }
            }
        }
        log::debug!("👛 Polling loop for {} ended", address);
    }
}
