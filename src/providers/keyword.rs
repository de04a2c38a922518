//! Keyword heuristic classifier, used when no model provider is configured

use super::{Classification, ImpactLevel, ProviderError, Sentiment, TextClassifier};
use async_trait::async_trait;

/// Checked in order; the first category with a hit wins
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("regulatory", &["regulation", "regulatory", "sec", "cftc", "finra", "compliance"]),
    ("enforcement", &["enforcement", "penalty", "fine", "violation", "lawsuit"]),
    ("compliance", &["compliance", "aml", "kyc", "sanctions", "ofac"]),
    ("technology", &["blockchain", "cryptocurrency", "defi", "nft", "smart contract"]),
];

const POSITIVE_WORDS: &[&str] = &["growth", "adoption", "approval", "partnership", "innovation"];
const NEGATIVE_WORDS: &[&str] = &["ban", "penalty", "violation", "crash", "hack", "fraud"];

/// Each hit adds 0.2 relevance, capped at 1.0
const RELEVANCE_KEYWORDS: &[&str] = &["crypto", "blockchain", "defi", "regulatory", "compliance", "sec", "cftc"];

#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn analyse(&self, text: &str) -> Classification {
        let text = text.to_lowercase();
        let hits = |words: &[&str]| words.iter().filter(|w| text.contains(*w)).count();

        let category = CATEGORY_KEYWORDS
            .iter()
            .find(|(_, words)| hits(*words) > 0)
            .map(|(cat, _)| *cat)
            .unwrap_or("general");

        let positive = hits(POSITIVE_WORDS);
        let negative = hits(NEGATIVE_WORDS);
        let sentiment = match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        };

        let keywords: Vec<String> = RELEVANCE_KEYWORDS
            .iter()
            .filter(|k| text.contains(*k))
            .map(|k| k.to_string())
            .collect();
        let relevance = (keywords.len() as f64 * 0.2).min(1.0);

        Classification {
            category: category.to_string(),
            sentiment,
            relevance,
            impact: if relevance > 0.5 {
                ImpactLevel::Medium
            } else {
                ImpactLevel::Low
            },
            keywords,
        }
    }
}

#[async_trait]
impl TextClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, text: &str) -> Result<Classification, ProviderError> {
        Ok(self.analyse(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforcement_news() {
        let c = KeywordClassifier::new().analyse("Exchange hit with penalty after AML violation");
        assert_eq!(c.category, "enforcement");
        assert_eq!(c.sentiment, Sentiment::Negative);
    }

    #[test]
    fn test_relevance_and_impact() {
        let c = KeywordClassifier::new()
            .analyse("SEC and CFTC publish crypto compliance guidance for DeFi and blockchain firms");
        assert_eq!(c.category, "regulatory");
        assert_eq!(c.relevance, 1.0);
        assert_eq!(c.impact, ImpactLevel::Medium);
        assert!(c.keywords.contains(&"defi".to_string()));
    }

    #[test]
    fn test_general_low_relevance() {
        let c = KeywordClassifier::new().analyse("Local weather is sunny");
        assert_eq!(c.category, "general");
        assert_eq!(c.relevance, 0.0);
        assert_eq!(c.impact, ImpactLevel::Low);
        assert_eq!(c.sentiment, Sentiment::Neutral);
    }
}
