//! HTTP read API
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/streams/:name?limit&wallet_address&after_seq` | stream records |
//! | POST | `/wallet/connect` | `{"address": "0x…"}` |
//! | GET | `/wallet/:address/status` | subscription snapshot |
//! | GET | `/wallet/:address/compliance` | compliance status |
//! | GET | `/wallet/:address/report` | compliance report |
//! | GET | `/wallet/:address/risk` | risk assessment |
//! | POST | `/wallet/:address/stop` | stop monitoring |
//! | GET | `/wallets` | tracked wallets |
//! | GET | `/health` | engine health |
//! | GET | `/search?q&k` | vector search |
//! | POST | `/documents` | manual document ingestion |

use super::facade::{QueryError, QueryFacade, StreamQuery};
use crate::pipeline::types::{Document, RiskLevel, SourceKind};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type SharedFacade = Arc<QueryFacade>;

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Internal(e) => {
                log::error!("❌ Query failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(facade: SharedFacade) -> Router {
    Router::new()
        .route("/streams/:name", get(read_stream))
        .route("/wallet/connect", post(connect_wallet))
        .route("/wallet/:address/status", get(wallet_status))
        .route("/wallet/:address/compliance", get(wallet_compliance))
        .route("/wallet/:address/report", get(wallet_report))
        .route("/wallet/:address/risk", get(wallet_risk))
        .route("/wallet/:address/stop", post(stop_wallet))
        .route("/wallets", get(list_wallets))
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/documents", post(ingest_documents))
        .with_state(facade)
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub limit: Option<usize>,
    pub wallet_address: Option<String>,
    pub after_seq: Option<i64>,
}

/// GET /streams/:name
async fn read_stream(
    State(facade): State<SharedFacade>,
    Path(name): Path<String>,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, QueryError> {
    let page = facade.stream(
        &name,
        StreamQuery {
            limit: params.limit,
            wallet_address: params.wallet_address,
            after_seq: params.after_seq,
        },
    )?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub address: String,
}

/// POST /wallet/connect
async fn connect_wallet(
    State(facade): State<SharedFacade>,
    Json(req): Json<ConnectRequest>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.connect_wallet(&req.address).await?))
}

async fn wallet_status(
    State(facade): State<SharedFacade>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.wallet_status(&address)?))
}

async fn wallet_compliance(
    State(facade): State<SharedFacade>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.wallet_compliance(&address).await?))
}

async fn wallet_report(
    State(facade): State<SharedFacade>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.wallet_report(&address).await?))
}

async fn wallet_risk(
    State(facade): State<SharedFacade>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.wallet_risk(&address).await?))
}

/// POST /wallet/:address/stop
async fn stop_wallet(
    State(facade): State<SharedFacade>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.stop_wallet(&address)?))
}

async fn list_wallets(State(facade): State<SharedFacade>) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.wallets()?))
}

async fn health(State(facade): State<SharedFacade>) -> Result<impl IntoResponse, QueryError> {
    Ok(Json(facade.health()?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub k: Option<usize>,
}

/// GET /search?q=...&k=5
async fn search(
    State(facade): State<SharedFacade>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, QueryError> {
    let hits = facade.search(&params.q, params.k.unwrap_or(5)).await?;
    Ok(Json(hits))
}

/// Externally supplied document; missing fields get connector-like defaults
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub id: Option<String>,
    pub source: SourceKind,
    pub text: String,
    pub risk_level: Option<RiskLevel>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub origin_link: Option<String>,
}

impl DocumentInput {
    /// Sanctions entries default to `critical`; ids default to a content hash
    pub fn into_document(self, now: i64) -> Document {
        let id = self.id.unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.source.as_str().as_bytes());
            hasher.update(b"|");
            hasher.update(self.text.as_bytes());
            let digest = hex::encode(hasher.finalize());
            format!("{}_{}", self.source.as_str(), &digest[..16])
        });
        let default_risk = match self.source {
            SourceKind::Sanctions => RiskLevel::Critical,
            _ => RiskLevel::None,
        };
        Document {
            id,
            source: self.source,
            text: self.text,
            metadata: self.metadata,
            risk_level: self.risk_level.unwrap_or(default_risk),
            timestamp: self.timestamp.unwrap_or(now),
            origin_link: self.origin_link,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<DocumentInput>,
}

/// POST /documents
async fn ingest_documents(
    State(facade): State<SharedFacade>,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, QueryError> {
    let now = chrono::Utc::now().timestamp();
    let docs = req.documents.into_iter().map(|d| d.into_document(now)).collect();
    let summary = facade.ingest(docs).await?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}
