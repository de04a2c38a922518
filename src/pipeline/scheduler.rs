//! Per-connector polling loop
//!
//! One task per source connector. Each task:
//! 1. Skips the poll (until the window resets) when the rate budget is spent,
//!    locally or as reported by the connector
//! 2. Polls from the persisted cursor
//! 3. Runs the batch through the pipeline, then persists the new cursor
//! 4. Sleeps for its interval, or for the backoff delay after a failure
//!
//! A fatal source error disables the connector and ends its task; other
//! connectors keep running. Shutdown is observed while sleeping or polling,
//! never between a processed batch and its cursor write.

use super::engine::Pipeline;
use super::health::{ConnectorStatus, HealthRegistry};
use crate::connectors::backoff::ExponentialBackoff;
use crate::connectors::rate_budget::RateBudget;
use crate::connectors::{ConnectorError, SourceConnector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct ConnectorSchedule {
    pub interval: Duration,
    pub budget: RateBudget,
    pub backoff: ExponentialBackoff,
}

/// Sleep for `delay` unless shutdown is signalled first. Returns true on shutdown.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Shutdown,
    Disabled(String),
}

pub async fn run_connector_task(
    connector: Arc<dyn SourceConnector>,
    pipeline: Arc<Pipeline>,
    health: Arc<HealthRegistry>,
    mut schedule: ConnectorSchedule,
    mut shutdown: watch::Receiver<bool>,
) -> TaskExit {
    let name = connector.name().to_string();
    let store = pipeline.store().clone();
    health.register(&name);
    log::info!(
        "⏰ Starting {} connector (interval: {}s, stream: {})",
        name,
        schedule.interval.as_secs(),
        connector.stream()
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = Instant::now();
        if !schedule.budget.try_acquire(now) {
            let wait = schedule.budget.resets_in(now).max(Duration::from_millis(100));
            log::warn!("⏸️  {} rate budget exhausted, skipping for {}s", name, wait.as_secs());
            health.record_rate_limited(&name);
            if sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
            continue;
        }

        let cursor = match store.connector_cursor(&name) {
            Ok(cursor) => cursor,
            Err(e) => {
                log::error!("❌ {}: failed to load cursor: {}", name, e);
                None
            }
        };

        let polled = tokio::select! {
            result = connector.poll(cursor.as_deref()) => result,
            _ = shutdown.changed() => break,
        };

        let delay = match polled {
            Ok(batch) => match pipeline.process(connector.stream(), batch.items).await {
                Ok(summary) => {
                    if let Some(next) = batch.next_cursor.as_deref() {
                        if let Err(e) = store.set_connector_cursor(&name, next) {
                            log::error!("❌ {}: failed to persist cursor: {}", name, e);
                        }
                    }
                    health.record_success(&name, &summary, chrono::Utc::now().timestamp());
                    schedule.backoff.reset();
                    schedule.interval
                }
                Err(e) => {
                    log::error!("❌ {}: batch processing failed: {}", name, e);
                    health.record_failure(&name, &ConnectorError::Transient(e.to_string()));
                    schedule.backoff.next_delay()
                }
            },
            Err(ConnectorError::RateLimited(wait)) => {
                log::warn!("⏸️  {} reported its budget spent, skipping for {}s", name, wait.as_secs());
                health.record_rate_limited(&name);
                wait.max(Duration::from_millis(100))
            }
            Err(e) if e.is_fatal() => {
                log::error!("❌ {} disabled: {}", name, e);
                health.record_failure(&name, &e);
                return TaskExit::Disabled(e.to_string());
            }
            Err(e) => {
                let status = health.record_failure(&name, &e);
                if status == ConnectorStatus::Degraded {
                    log::warn!("⚠️  {} degraded: {}", name, e);
                } else {
                    log::warn!("⚠️  {} poll failed: {}", name, e);
                }
                schedule.backoff.next_delay()
            }
        };

        if sleep_or_shutdown(delay, &mut shutdown).await {
            break;
        }
    }

    log::info!("🛑 {} connector stopped", name);
    TaskExit::Shutdown
}
