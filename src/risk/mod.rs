//! Wallet risk scoring
//!
//! `score` is pure: the same `RiskContext` and weights always produce the
//! same score and the same reason order. `RiskScorer` only gathers the
//! context from the store.
//!
//! Contributions (all weights configurable):
//! - sanctions match: fixed weight when any sanctions document names the address
//! - transaction volume: tiered additive weights on total ETH moved
//! - high-risk counterparties: per distinct denylisted counterparty, capped
//! - news: recency-decayed severity of news naming the address, capped
//!
//! Verdict: `>= 70` high, `40..70` medium, `< 40` low.

use crate::connectors::denylist::DenylistProvider;
use crate::pipeline::config::RiskWeights;
use crate::pipeline::db::{SqliteStore, StoreError};
use crate::pipeline::types::{normalize_address, Document, RiskFlag, RiskLevel, SourceKind, Transaction};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Low,
    Medium,
    High,
}

impl Verdict {
    pub fn from_score(score: u8) -> Self {
        match score {
            70..=u8::MAX => Verdict::High,
            40..=69 => Verdict::Medium,
            _ => Verdict::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Low => "low",
            Verdict::Medium => "medium",
            Verdict::High => "high",
        }
    }
}

/// News item naming the address
#[derive(Debug, Clone, PartialEq)]
pub struct NewsSignal {
    pub doc_id: String,
    pub risk_level: RiskLevel,
    pub age_secs: i64,
}

/// Everything the scorer looks at for one address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskContext {
    pub address: String,
    pub sanctions_matches: Vec<Document>,
    pub transactions: Vec<Transaction>,
    /// Distinct denylisted counterparties, sorted
    pub high_risk_counterparties: Vec<String>,
    pub news: Vec<NewsSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub code: &'static str,
    pub weight: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub address: String,
    pub score: u8,
    pub verdict: Verdict,
    /// `code: detail`, by contribution weight descending
    pub reasons: Vec<String>,
    pub contributions: Vec<Contribution>,
}

pub fn score(ctx: &RiskContext, weights: &RiskWeights) -> RiskAssessment {
    let mut contributions: Vec<Contribution> = Vec::new();

    if !ctx.sanctions_matches.is_empty() {
        let ids: Vec<&str> = ctx.sanctions_matches.iter().map(|d| d.id.as_str()).collect();
        contributions.push(Contribution {
            code: "sanctions_match",
            weight: weights.sanctions_match,
            reason: format!("named in {} sanctions entr(ies): {}", ids.len(), ids.join(", ")),
        });
    }

    let volume: f64 = ctx.transactions.iter().map(|t| t.value).sum();
    let crossed: Vec<&(f64, u32)> = weights.value_tiers.iter().filter(|(limit, _)| volume >= *limit).collect();
    if !crossed.is_empty() {
        let weight = crossed.iter().fold(0u32, |acc, (_, w)| acc.saturating_add(*w));
        let top = crossed.iter().map(|(limit, _)| *limit).fold(0.0, f64::max);
        contributions.push(Contribution {
            code: "transaction_volume",
            weight,
            reason: format!("{:.4} ETH moved across {} transactions (tier >= {})", volume, ctx.transactions.len(), top),
        });
    }

    if !ctx.high_risk_counterparties.is_empty() {
        let n = u32::try_from(ctx.high_risk_counterparties.len()).unwrap_or(u32::MAX);
        contributions.push(Contribution {
            code: "high_risk_counterparties",
            weight: n.saturating_mul(weights.counterparty_per_match).min(weights.counterparty_cap),
            reason: format!("{} denylisted counterparties", n),
        });
    }

    if !ctx.news.is_empty() {
        let raw: f64 = ctx
            .news
            .iter()
            .map(|n| news_weight(n.risk_level, weights) * decay(n.age_secs, weights.news_half_life_secs))
            .sum();
        let weight = (raw.round() as u32).min(weights.news_cap);
        if weight > 0 {
            contributions.push(Contribution {
                code: "news_sentiment",
                weight,
                reason: format!("{} news items reference this address", ctx.news.len()),
            });
        }
    }

    // stable: ties keep insertion order
    contributions.sort_by(|a, b| b.weight.cmp(&a.weight));

    let total = contributions.iter().fold(0u32, |acc, c| acc.saturating_add(c.weight));
    let score = total.min(100) as u8;

    RiskAssessment {
        address: ctx.address.clone(),
        score,
        verdict: Verdict::from_score(score),
        reasons: contributions
            .iter()
            .map(|c| format!("{}: {}", c.code, c.reason))
            .collect(),
        contributions,
    }
}

fn news_weight(level: RiskLevel, weights: &RiskWeights) -> f64 {
    match level {
        RiskLevel::Critical => weights.news_critical,
        RiskLevel::High => weights.news_high,
        RiskLevel::Medium => weights.news_medium,
        RiskLevel::None => 0.0,
    }
}

/// Exponential decay by half-life; future-dated items count fully
fn decay(age_secs: i64, half_life_secs: i64) -> f64 {
    if half_life_secs <= 0 {
        return 1.0;
    }
    0.5f64.powf(age_secs.max(0) as f64 / half_life_secs as f64)
}

/// Builds a `RiskContext` from stored history and scores it
pub struct RiskScorer {
    store: SqliteStore,
    denylist: Arc<dyn DenylistProvider>,
    weights: RiskWeights,
}

impl RiskScorer {
    pub fn new(store: SqliteStore, denylist: Arc<dyn DenylistProvider>, weights: RiskWeights) -> Self {
        Self {
            store,
            denylist,
            weights,
        }
    }

    pub fn weights(&self) -> &RiskWeights {
        &self.weights
    }

    pub async fn context(&self, address: &str, now: i64) -> Result<RiskContext, StoreError> {
        let address = normalize_address(address);

        let sanctions_matches: Vec<Document> = self
            .store
            .documents_mentioning(&address, &[SourceKind::Sanctions])?
            .into_iter()
            .filter(|d| crate::alerts::mentions(&d.text, &address))
            .collect();

        let transactions = self.store.transactions_for_wallet(&address)?;

        let mut counterparties = BTreeSet::new();
        for tx in &transactions {
            if tx.risk_flags.contains(&RiskFlag::DenylistedCounterparty)
                || self.denylist.is_denylisted(&tx.counterparty, now).await?
            {
                counterparties.insert(tx.counterparty.clone());
            }
        }

        let news = self
            .store
            .documents_mentioning(&address, &[SourceKind::News, SourceKind::Regulatory, SourceKind::Manual])?
            .into_iter()
            .map(|d| NewsSignal {
                age_secs: now - d.timestamp,
                doc_id: d.id,
                risk_level: d.risk_level,
            })
            .collect();

        Ok(RiskContext {
            address,
            sanctions_matches,
            transactions,
            high_risk_counterparties: counterparties.into_iter().collect(),
            news,
        })
    }

    pub async fn assess(&self, address: &str, now: i64) -> Result<RiskAssessment, StoreError> {
        let ctx = self.context(address, now).await?;
        Ok(score(&ctx, &self.weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::denylist::StaticDenylist;
    use crate::pipeline::db::test_support::create_test_store;
    use crate::pipeline::types::TxDirection;

    fn tx(hash: &str, value: f64, counterparty: &str) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            wallet_address: "0xw".to_string(),
            counterparty: counterparty.to_string(),
            value,
            timestamp: 1_000,
            block_number: 1,
            direction: TxDirection::Outgoing,
            risk_flags: BTreeSet::new(),
        }
    }

    fn sanctions_doc() -> Document {
        Document::new("ofac_sdn_1", SourceKind::Sanctions, "OFAC SDN Entry: 0xw", 1).with_risk(RiskLevel::Critical)
    }

    #[test]
    fn test_oversized_weights_clamp_instead_of_overflowing() {
        let weights = RiskWeights {
            sanctions_match: u32::MAX,
            value_tiers: vec![(1.0, u32::MAX), (2.0, u32::MAX)],
            counterparty_per_match: u32::MAX,
            counterparty_cap: u32::MAX,
            ..RiskWeights::default()
        };
        let ctx = RiskContext {
            address: "0xw".to_string(),
            sanctions_matches: vec![sanctions_doc()],
            transactions: vec![tx("0x1", 5.0, "0xa"), tx("0x2", 5.0, "0xb")],
            high_risk_counterparties: vec!["0xa".to_string(), "0xb".to_string()],
            ..Default::default()
        };
        let assessment = score(&ctx, &weights);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.verdict, Verdict::High);
        let volume = assessment.contributions.iter().find(|c| c.code == "transaction_volume").unwrap();
        assert_eq!(volume.weight, u32::MAX);
        let peers = assessment.contributions.iter().find(|c| c.code == "high_risk_counterparties").unwrap();
        assert_eq!(peers.weight, u32::MAX);
    }

    #[test]
    fn test_empty_context_is_low() {
        let assessment = score(&RiskContext::default(), &RiskWeights::default());
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.verdict, Verdict::Low);
        assert!(assessment.reasons.is_empty());
    }

    #[test]
    fn test_sanctions_match_alone_is_high() {
        let ctx = RiskContext {
            address: "0xw".to_string(),
            sanctions_matches: vec![sanctions_doc()],
            ..Default::default()
        };
        let assessment = score(&ctx, &RiskWeights::default());
        assert!(assessment.score >= 70);
        assert_eq!(assessment.verdict, Verdict::High);
        assert!(assessment.reasons[0].starts_with("sanctions_match:"));
    }

    #[test]
    fn test_reasons_sorted_by_weight_and_score_clamped() {
        let ctx = RiskContext {
            address: "0xw".to_string(),
            sanctions_matches: vec![sanctions_doc()],
            transactions: vec![tx("a", 600.0, "0xc1"), tx("b", 600.0, "0xc2")],
            high_risk_counterparties: vec!["0xc1".to_string(), "0xc2".to_string(), "0xc3".to_string()],
            news: vec![NewsSignal {
                doc_id: "n".to_string(),
                risk_level: RiskLevel::Critical,
                age_secs: 0,
            }],
        };
        let assessment = score(&ctx, &RiskWeights::default());

        assert_eq!(assessment.score, 100);
        let weights: Vec<u32> = assessment.contributions.iter().map(|c| c.weight).collect();
        let mut sorted = weights.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(weights, sorted);
        assert_eq!(assessment.contributions[1].code, "transaction_volume");
        assert_eq!(assessment.contributions[1].weight, 30);
        assert_eq!(assessment.contributions[2].code, "high_risk_counterparties");
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let ctx = RiskContext {
            address: "0xw".to_string(),
            transactions: vec![tx("a", 50.0, "0xc1")],
            high_risk_counterparties: vec!["0xc1".to_string()],
            ..Default::default()
        };
        let weights = RiskWeights::default();
        assert_eq!(score(&ctx, &weights), score(&ctx, &weights));
    }

    #[test]
    fn test_news_decays_with_age() {
        let weights = RiskWeights::default();
        let fresh = RiskContext {
            news: vec![NewsSignal {
                doc_id: "n".to_string(),
                risk_level: RiskLevel::Critical,
                age_secs: 0,
            }],
            ..Default::default()
        };
        let stale = RiskContext {
            news: vec![NewsSignal {
                doc_id: "n".to_string(),
                risk_level: RiskLevel::Critical,
                age_secs: weights.news_half_life_secs * 10,
            }],
            ..Default::default()
        };
        assert!(score(&fresh, &weights).score > score(&stale, &weights).score);
    }

    #[test]
    fn test_verdict_boundaries() {
        assert_eq!(Verdict::from_score(39), Verdict::Low);
        assert_eq!(Verdict::from_score(40), Verdict::Medium);
        assert_eq!(Verdict::from_score(69), Verdict::Medium);
        assert_eq!(Verdict::from_score(70), Verdict::High);
    }

    #[tokio::test]
    async fn test_context_from_store() {
        let (_temp, store) = create_test_store();
        store.upsert_document(&sanctions_doc()).unwrap();
        let mut t = tx("0xt1", 12.0, "0xmixer");
        t.wallet_address = "0xw".to_string();
        store.insert_transaction(&t).unwrap();

        let scorer = RiskScorer::new(store, Arc::new(StaticDenylist::new(["0xmixer"])), RiskWeights::default());
        let ctx = scorer.context("0xW", 2_000).await.unwrap();

        assert_eq!(ctx.address, "0xw");
        assert_eq!(ctx.sanctions_matches.len(), 1);
        assert_eq!(ctx.transactions.len(), 1);
        assert_eq!(ctx.high_risk_counterparties, vec!["0xmixer"]);
    }
}
