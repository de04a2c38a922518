//! Engine lifecycle
//!
//! `EngineContext` owns the store, the shared pipeline, connector handles and
//! their scheduled tasks, and the wallet tracker.
//!
//! ```text
//! new / from_config   build everything, nothing runs yet
//! start()             spawn one task per connector, resume tracked wallets
//! stop()              signal shutdown, await every task
//! is_running()
//! ```

use super::config::{BackendChoice, EngineConfig, RateBudgetConfig};
use super::db::SqliteStore;
use super::engine::{BatchSummary, EngineBackend, EngineError, Pipeline, StreamEngine};
use super::fallback::FallbackEngine;
use super::health::{HealthRegistry, HealthReport, WalletSummary};
use super::incremental::IncrementalEngine;
use super::scheduler::{run_connector_task, ConnectorSchedule, TaskExit};
use super::types::{Document, Ingested, StreamName};
use crate::alerts::AlertGenerator;
use crate::connectors::backoff::ExponentialBackoff;
use crate::connectors::chain::{ChainConnector, ChainSource};
use crate::connectors::denylist::{DenylistProvider, SqliteDenylist};
use crate::connectors::news::NewsConnector;
use crate::connectors::rate_budget::RateBudget;
use crate::connectors::regulatory::RegulatoryFeedConnector;
use crate::connectors::sanctions::SanctionsConnector;
use crate::connectors::transport::ReqwestTransport;
use crate::connectors::{ConnectorError, SourceConnector};
use crate::index::VectorIndex;
use crate::providers::ProviderSet;
use crate::risk::RiskScorer;
use crate::wallet::state::{FailureThresholds, WalletState};
use crate::wallet::tracker::CHAIN_CONNECTOR;
use crate::wallet::WalletTracker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// A source connector with its cadence and request budget
pub struct ScheduledConnector {
    pub connector: Arc<dyn SourceConnector>,
    pub interval: Duration,
    pub budget: RateBudgetConfig,
}

/// Injected collaborators; `from_config` builds the production set
pub struct EngineParts {
    pub providers: ProviderSet,
    pub chain: Arc<dyn ChainSource>,
    pub denylist: Arc<dyn DenylistProvider>,
    pub connectors: Vec<ScheduledConnector>,
}

/// Auto picks incremental only when a license key is configured
pub fn select_backend(choice: BackendChoice, license_key: Option<&str>) -> EngineBackend {
    match (choice, license_key.is_some()) {
        (BackendChoice::Fallback, _) => EngineBackend::Fallback,
        (BackendChoice::Incremental, true) | (BackendChoice::Auto, true) => EngineBackend::Incremental,
        (BackendChoice::Incremental, false) => {
            log::warn!("⚠️  ENGINE_BACKEND=incremental without ENGINE_LICENSE_KEY, using fallback");
            EngineBackend::Fallback
        }
        (BackendChoice::Auto, false) => EngineBackend::Fallback,
    }
}

pub struct EngineContext {
    config: EngineConfig,
    store: SqliteStore,
    pipeline: Arc<Pipeline>,
    health: Arc<HealthRegistry>,
    tracker: Arc<WalletTracker>,
    scorer: Arc<RiskScorer>,
    connectors: Vec<ScheduledConnector>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<TaskExit>>>,
    running: AtomicBool,
}

impl EngineContext {
    /// Build the production engine: open the store, construct connectors and providers
    pub async fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        log::info!("🔧 Initializing engine...");
        log::info!("   ├─ Database: {}", config.db_path);
        let store = SqliteStore::open(&config.db_path, &config.schema_dir)?;

        let providers =
            ProviderSet::from_config(&config).map_err(|e| EngineError::Provider(e.to_string()))?;
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);

        let sqlite_denylist = SqliteDenylist::new(store.clone());
        sqlite_denylist.seed(&config.denylist_addresses)?;
        let denylist: Arc<dyn DenylistProvider> = Arc::new(sqlite_denylist);

        let chain: Arc<dyn ChainSource> = Arc::new(ChainConnector::new(
            transport.clone(),
            denylist.clone(),
            config.etherscan_endpoint.clone(),
            config.etherscan_api_key.clone(),
            config.etherscan_chain_id,
            config.alert_thresholds.high_value_eth,
            RateBudget::from_config(config.chain_budget),
        ));

        let mut connectors = vec![ScheduledConnector {
            connector: Arc::new(SanctionsConnector::new(transport.clone(), config.ofac_sdn_url.clone())),
            interval: Duration::from_secs(config.sanctions_interval_secs),
            budget: config.sanctions_budget,
        }];
        let mut unavailable = Vec::new();
        match &config.news_api_key {
            Some(key) => connectors.push(ScheduledConnector {
                connector: Arc::new(NewsConnector::new(
                    transport.clone(),
                    config.news_endpoint.clone(),
                    key.clone(),
                    config.news_query.clone(),
                )),
                interval: Duration::from_secs(config.news_interval_secs),
                budget: config.news_budget,
            }),
            None => unavailable.push(("news", "NEWSAPI_KEY not configured")),
        }
        for feed in &config.regulatory_feeds {
            connectors.push(ScheduledConnector {
                connector: Arc::new(RegulatoryFeedConnector::new(transport.clone(), feed.clone())),
                interval: Duration::from_secs(config.regulatory_interval_secs),
                budget: config.regulatory_budget,
            });
        }
        if config.etherscan_api_key.is_none() {
            unavailable.push((CHAIN_CONNECTOR, "ETHERSCAN_API_KEY not configured"));
        }
        log::info!("   ├─ Connectors: {}", connectors.len());
        log::info!("   └─ Backend choice: {:?}", config.backend);

        let parts = EngineParts {
            providers,
            chain,
            denylist,
            connectors,
        };
        let ctx = Self::new(config, store, parts).await?;
        for (name, reason) in unavailable {
            log::warn!("⚠️  {} connector disabled: {}", name, reason);
            ctx.health
                .record_failure(name, &ConnectorError::Fatal(reason.to_string()));
        }
        Ok(ctx)
    }

    /// Assemble the engine from an opened store and injected parts
    pub async fn new(config: EngineConfig, store: SqliteStore, parts: EngineParts) -> Result<Self, EngineError> {
        let backend = select_backend(config.backend, config.license_key.as_deref());
        let engine: Arc<dyn StreamEngine> = match backend {
            EngineBackend::Incremental => Arc::new(IncrementalEngine::hydrated(&store)?),
            EngineBackend::Fallback => Arc::new(FallbackEngine::new(store.clone())),
        };
        log::info!("✅ Stream engine backend: {}", backend.as_str());

        let index = Arc::new(VectorIndex::open(store.clone(), parts.providers.embedder.clone()).await?);
        let alerts = Arc::new(AlertGenerator::new(store.clone(), config.alert_thresholds.clone()));
        let pipeline = Arc::new(Pipeline::new(
            engine,
            store.clone(),
            index,
            parts.providers.classifier.clone(),
            alerts,
        ));

        let health = Arc::new(HealthRegistry::new(config.connector_degrade_after));
        for scheduled in &parts.connectors {
            health.register(scheduled.connector.name());
        }

        let (shutdown, _) = watch::channel(true);
        let tracker = Arc::new(
            WalletTracker::new(
                pipeline.clone(),
                parts.chain,
                FailureThresholds {
                    degrade_after: config.wallet_degrade_after,
                    stop_after: config.wallet_stop_after,
                },
                Duration::from_secs(config.wallet_poll_interval_secs),
                shutdown.subscribe(),
            )
            .with_backoff(config.backoff_initial_ms, config.backoff_max_ms)
            .with_health(health.clone()),
        );
        let scorer = Arc::new(RiskScorer::new(
            store.clone(),
            parts.denylist,
            config.risk_weights.clone(),
        ));

        Ok(Self {
            config,
            store,
            pipeline,
            health,
            tracker,
            scorer,
            connectors: parts.connectors,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn connector tasks and resume tracked wallets. Idempotent.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut tasks = self.tasks.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        log::info!("🚀 Starting engine ({} connectors)", self.connectors.len());
        self.shutdown.send_replace(false);

        for scheduled in &self.connectors {
            let schedule = ConnectorSchedule {
                interval: scheduled.interval,
                budget: RateBudget::from_config(scheduled.budget),
                backoff: ExponentialBackoff::new(self.config.backoff_initial_ms, self.config.backoff_max_ms),
            };
            tasks.push(tokio::spawn(run_connector_task(
                scheduled.connector.clone(),
                self.pipeline.clone(),
                self.health.clone(),
                schedule,
                self.shutdown.subscribe(),
            )));
            log::info!("   ├─ {} scheduled", scheduled.connector.name());
        }

        self.running.store(true, Ordering::SeqCst);
        let resumed = self.tracker.resume_all()?;
        log::info!("   └─ ✅ Engine running ({} wallets resumed)", resumed);
        Ok(())
    }

    /// Signal shutdown and wait for every task to finish its current step
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        log::info!("⚠️  Stopping engine...");
        self.shutdown.send_replace(true);

        for handle in tasks.drain(..) {
            match handle.await {
                Ok(TaskExit::Disabled(reason)) => log::debug!("connector had been disabled: {}", reason),
                Ok(TaskExit::Shutdown) => {}
                Err(e) => log::warn!("⚠️  Connector task ended abnormally: {}", e),
            }
        }
        self.tracker.join_all().await;
        log::info!("✅ Engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Push externally supplied documents through the same path as connector output
    pub async fn ingest_documents(&self, stream: StreamName, docs: Vec<Document>) -> Result<BatchSummary, EngineError> {
        let items = docs.into_iter().map(Ingested::Document).collect();
        self.pipeline.process(stream, items).await
    }

    pub fn health(&self) -> Result<HealthReport, EngineError> {
        let mut wallets = WalletSummary::default();
        for sub in self.store.list_wallets()? {
            wallets.total += 1;
            match sub.state {
                WalletState::Connecting => wallets.connecting += 1,
                WalletState::Active => wallets.active += 1,
                WalletState::Degraded => wallets.degraded += 1,
                WalletState::Stopped => wallets.stopped += 1,
                WalletState::Unregistered => {}
            }
        }

        let connectors = self.health.snapshot();
        let healthy = connectors.iter().all(|c| c.status.is_available()) && wallets.degraded == 0;

        Ok(HealthReport {
            backend: self.pipeline.backend(),
            running: self.is_running(),
            healthy,
            connectors,
            wallets,
            documents: self.store.count_documents()?,
            index_entries: self.pipeline.index().len(),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn health_registry(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn tracker(&self) -> &Arc<WalletTracker> {
        &self.tracker
    }

    pub fn scorer(&self) -> &Arc<RiskScorer> {
        &self.scorer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        assert_eq!(select_backend(BackendChoice::Auto, Some("key")), EngineBackend::Incremental);
        assert_eq!(select_backend(BackendChoice::Auto, None), EngineBackend::Fallback);
        assert_eq!(select_backend(BackendChoice::Incremental, None), EngineBackend::Fallback);
        assert_eq!(select_backend(BackendChoice::Fallback, Some("key")), EngineBackend::Fallback);
    }
}
