//! Model capabilities selected by configuration
//!
//! - `Embedder` - `embed(text) -> vector`, opaque to the rest of the engine
//! - `TextClassifier` - category / sentiment / relevance / impact for news
//!
//! Adapters are picked once in `ProviderSet::from_config`; nothing else in
//! the crate branches on the provider.

pub mod hashing;
pub mod keyword;
pub mod openrouter;

use crate::pipeline::config::{EmbeddingProvider, EngineConfig};
use crate::pipeline::types::RiskLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use hashing::HashingEmbedder;
pub use keyword::KeywordClassifier;
pub use openrouter::OpenRouterEmbedder;

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Provider could not be reached or timed out
    Unavailable(String),
    /// Provider answered with something unusable
    InvalidResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid provider response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            ImpactLevel::Critical => 1.5,
            ImpactLevel::High => 1.2,
            ImpactLevel::Medium => 1.0,
            ImpactLevel::Low => 0.8,
            ImpactLevel::None => 0.5,
        }
    }
}

impl From<RiskLevel> for ImpactLevel {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::None => ImpactLevel::None,
            RiskLevel::Medium => ImpactLevel::Medium,
            RiskLevel::High => ImpactLevel::High,
            RiskLevel::Critical => ImpactLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub sentiment: Sentiment,
    /// 0.0..=1.0
    pub relevance: f64,
    pub impact: ImpactLevel,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<Classification, ProviderError>;
}

pub fn category_multiplier(category: &str) -> f64 {
    match category {
        "enforcement" => 1.4,
        "regulatory" => 1.3,
        "compliance" => 1.2,
        "guidance" => 1.0,
        "technology" => 0.9,
        "market" => 0.8,
        _ => 1.0,
    }
}

/// News priority in `[0, 1]`
///
/// `relevance × impact × category`, where impact is the stronger of the
/// classifier's estimate and the document's own risk level.
pub fn priority(analysis: &Classification, risk_level: RiskLevel) -> f64 {
    let impact = analysis.impact.max(ImpactLevel::from(risk_level));
    let raw = analysis.relevance * impact.multiplier() * category_multiplier(&analysis.category);
    raw.clamp(0.0, 1.0)
}

/// Capabilities chosen for this process
#[derive(Clone)]
pub struct ProviderSet {
    pub embedder: Arc<dyn Embedder>,
    pub classifier: Arc<dyn TextClassifier>,
}

impl ProviderSet {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ProviderError> {
        let embedder: Arc<dyn Embedder> = match config.embeddings_provider {
            EmbeddingProvider::Local => Arc::new(HashingEmbedder::new(config.embeddings_dimension)),
            EmbeddingProvider::OpenRouter => {
                let api_key = config.openrouter_api_key.clone().ok_or_else(|| {
                    ProviderError::Unavailable("OPENROUTER_API_KEY not configured".to_string())
                })?;
                Arc::new(OpenRouterEmbedder::new(
                    &config.openrouter_endpoint,
                    api_key,
                    &config.embeddings_model,
                    config.embeddings_dimension,
                )?)
            }
        };

        log::info!(
            "🧠 Providers: embedder={} ({}d), classifier=keyword",
            embedder.name(),
            embedder.dimension()
        );

        Ok(Self {
            embedder,
            classifier: Arc::new(KeywordClassifier::new()),
        })
    }

    /// Local-only providers, no network access
    pub fn local(dimension: usize) -> Self {
        Self {
            embedder: Arc::new(HashingEmbedder::new(dimension)),
            classifier: Arc::new(KeywordClassifier::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(category: &str, relevance: f64, impact: ImpactLevel) -> Classification {
        Classification {
            category: category.to_string(),
            sentiment: Sentiment::Neutral,
            relevance,
            impact,
            keywords: Vec::new(),
        }
    }

    #[test]
    fn test_priority_uses_stronger_impact() {
        let a = analysis("regulatory", 0.4, ImpactLevel::Low);
        let p = priority(&a, RiskLevel::Critical);
        assert!((p - 0.4 * 1.5 * 1.3).abs() < 1e-9);

        let low = priority(&a, RiskLevel::None);
        assert!((low - 0.4 * 0.8 * 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_priority_is_capped() {
        let a = analysis("enforcement", 1.0, ImpactLevel::Critical);
        assert_eq!(priority(&a, RiskLevel::Critical), 1.0);
    }

    #[test]
    fn test_unknown_category_is_neutral() {
        assert_eq!(category_multiplier("weather"), 1.0);
    }
}
