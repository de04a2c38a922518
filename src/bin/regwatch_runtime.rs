//! Regwatch Runtime
//!
//! Runs the ingestion engine and serves the read API:
//! - Opens the SQLite store and applies `sql/` migrations
//! - Schedules the sanctions and news connectors
//! - Resumes polling for every tracked wallet
//! - Serves the HTTP query API until CTRL+C
//!
//! Usage:
//!   cargo run --release --bin regwatch_runtime
//!
//! Environment variables (see `EngineConfig::from_env` for the full list):
//!   REGWATCH_DB_PATH - SQLite database path (default: regwatch.db)
//!   ENGINE_BACKEND - auto | incremental | fallback (default: auto)
//!   NEWSAPI_KEY - news connector key (news stream unavailable without it)
//!   ETHERSCAN_API_KEY - chain explorer key for wallet polling
//!   REGWATCH_HTTP_BIND - listen address (default: 0.0.0.0:8080)

use dotenv::dotenv;
use log::{error, info};
use regwatch::pipeline::{EngineConfig, EngineContext};
use regwatch::query::{router, QueryFacade};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Regwatch Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_env()?;
    let bind = config.http_bind.clone();

    let ctx = Arc::new(EngineContext::from_config(config).await?);
    ctx.start().await?;

    let app = router(Arc::new(QueryFacade::new(ctx.clone())));
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("✅ Query API listening on {}", bind);
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
        })
        .await;

    ctx.stop().await;
    served?;

    info!("✅ Regwatch runtime stopped");
    Ok(())
}
