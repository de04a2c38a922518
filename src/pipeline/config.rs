//! Engine configuration from environment variables
//!
//! Every knob has a default so the runtime starts with an empty `.env`.
//! Risk weights and alert thresholds are product decisions and live here
//! rather than in the scorer.

use std::env;
use std::str::FromStr;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which stream engine backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// Incremental when a license key is present, polling otherwise
    Auto,
    Incremental,
    Fallback,
}

impl FromStr for BackendChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "incremental" => Ok(BackendChoice::Incremental),
            "fallback" | "polling" => Ok(BackendChoice::Fallback),
            other => Err(ConfigError::InvalidValue(format!(
                "ENGINE_BACKEND must be auto, incremental or fallback (got '{}')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embedder, no network
    Local,
    OpenRouter,
}

impl FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "hashing" => Ok(EmbeddingProvider::Local),
            "openrouter" => Ok(EmbeddingProvider::OpenRouter),
            other => Err(ConfigError::InvalidValue(format!(
                "EMBEDDINGS_PROVIDER must be local or openrouter (got '{}')",
                other
            ))),
        }
    }
}

/// Request budget for one external API
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudgetConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// One regulator RSS/Atom feed, polled as its own connector
#[derive(Debug, Clone, PartialEq)]
pub struct RegulatoryFeed {
    /// Short agency tag, uppercased (`SEC`, `CFTC`, `FINRA`)
    pub agency: String,
    pub url: String,
}

impl RegulatoryFeed {
    pub fn new(agency: &str, url: &str) -> Self {
        Self {
            agency: agency.trim().to_uppercase(),
            url: url.trim().to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("SEC", "https://www.sec.gov/rss/litigation/litreleases.xml"),
            Self::new("CFTC", "https://www.cftc.gov/RSS/cftcrss.xml"),
            Self::new("FINRA", "https://www.finra.org/rss/news/all"),
        ]
    }
}

/// Score contributions used by the risk scorer
#[derive(Debug, Clone, PartialEq)]
pub struct RiskWeights {
    /// Fixed contribution when any sanctioned-entity document references the wallet
    pub sanctions_match: u32,

    /// (total ETH volume, weight) pairs; every tier reached adds its weight
    pub value_tiers: Vec<(f64, u32)>,

    /// Contribution per distinct high-risk counterparty
    pub counterparty_per_match: u32,
    pub counterparty_cap: u32,

    /// Recency-decayed news contribution per risk level, summed up to `news_cap`
    pub news_critical: f64,
    pub news_high: f64,
    pub news_medium: f64,
    pub news_cap: u32,
    pub news_half_life_secs: i64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            sanctions_match: 70,
            value_tiers: vec![(10.0, 5), (100.0, 10), (1_000.0, 15)],
            counterparty_per_match: 15,
            counterparty_cap: 30,
            news_critical: 10.0,
            news_high: 6.0,
            news_medium: 3.0,
            news_cap: 15,
            news_half_life_secs: 7 * 24 * 3600,
        }
    }
}

/// Thresholds used when tagging transactions and raising alerts
#[derive(Debug, Clone, PartialEq)]
pub struct AlertThresholds {
    /// Transactions at or above this value (ETH) carry the `high_value` flag
    pub high_value_eth: f64,

    /// Transactions above this value (ETH) raise a `high_value_tx` alert
    pub top_value_eth: f64,

    /// `velocity_count` high-value transactions within `velocity_window_secs`
    pub velocity_count: usize,
    pub velocity_window_secs: i64,

    /// Regulatory documents at or above this risk rank raise `regulatory_update`
    pub regulatory_min_rank: u8,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_value_eth: 10.0,
            top_value_eth: 100.0,
            velocity_count: 2,
            velocity_window_secs: 600,
            regulatory_min_rank: 2,
        }
    }
}

/// Regulatory requirement thresholds used by the compliance report
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceRules {
    pub kyc_threshold_eth: f64,
    pub reporting_threshold_eth: f64,
    pub enhanced_monitoring_eth: f64,
    /// Transactions per hour considered suspicious
    pub suspicious_frequency_per_hour: usize,
    /// ETH volume per day considered high velocity
    pub daily_velocity_eth: f64,
}

impl Default for ComplianceRules {
    fn default() -> Self {
        Self {
            kyc_threshold_eth: 1.0,
            reporting_threshold_eth: 10.0,
            enhanced_monitoring_eth: 50.0,
            suspicious_frequency_per_hour: 10,
            daily_velocity_eth: 50.0,
        }
    }
}

/// Configuration for the engine runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `.sql` schema files
    pub schema_dir: String,

    pub backend: BackendChoice,

    /// License for the incremental runtime (selects it under `Auto`)
    pub license_key: Option<String>,

    pub sanctions_interval_secs: u64,
    pub news_interval_secs: u64,
    pub regulatory_interval_secs: u64,
    pub wallet_poll_interval_secs: u64,

    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,

    /// Consecutive transient failures before a connector reports degraded
    pub connector_degrade_after: u32,

    /// Consecutive poll failures before a wallet moves Active -> Degraded
    pub wallet_degrade_after: u32,

    /// Consecutive poll failures before a wallet is abandoned (Stopped)
    pub wallet_stop_after: u32,

    pub sanctions_budget: RateBudgetConfig,
    pub news_budget: RateBudgetConfig,
    /// Applies to each regulatory feed separately
    pub regulatory_budget: RateBudgetConfig,
    pub chain_budget: RateBudgetConfig,

    pub ofac_sdn_url: String,

    pub news_endpoint: String,
    pub news_api_key: Option<String>,
    pub news_query: String,

    pub regulatory_feeds: Vec<RegulatoryFeed>,

    pub etherscan_endpoint: String,
    pub etherscan_api_key: Option<String>,
    pub etherscan_chain_id: u64,

    pub embeddings_provider: EmbeddingProvider,
    pub embeddings_model: String,
    pub embeddings_dimension: usize,
    pub openrouter_endpoint: String,
    pub openrouter_api_key: Option<String>,

    pub risk_weights: RiskWeights,
    pub alert_thresholds: AlertThresholds,
    pub compliance_rules: ComplianceRules,

    /// Static high-risk counterparty addresses (lowercased)
    pub denylist_addresses: Vec<String>,

    pub http_bind: String,
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `REGWATCH_DB_PATH` (default: regwatch.db)
    /// - `REGWATCH_SCHEMA_DIR` (default: sql)
    /// - `ENGINE_BACKEND` auto|incremental|fallback (default: auto)
    /// - `ENGINE_LICENSE_KEY`
    /// - `SANCTIONS_POLL_INTERVAL_SECS` (default: 3600)
    /// - `NEWS_POLL_INTERVAL_SECS` (default: 300)
    /// - `REGULATORY_FEEDS` `AGENCY=url` pairs, comma-separated, or `none`
    ///   (default: SEC, CFTC and FINRA feeds)
    /// - `REGULATORY_POLL_INTERVAL_SECS` (default: 300)
    /// - `WALLET_POLL_INTERVAL_SECS` (default: 30)
    /// - `NEWSAPI_KEY`, `ETHERSCAN_API_KEY`, `OPENROUTER_API_KEY`
    /// - `RISK_*`, `ALERT_*`, `COMPLIANCE_*` weight and threshold overrides
    /// - `DENYLIST_ADDRESSES` comma-separated
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("ENGINE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => BackendChoice::Auto,
        };

        let embeddings_provider = match get("EMBEDDINGS_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => EmbeddingProvider::Local,
        };

        let ofac_sdn_url = get("OFAC_SDN_URL")
            .unwrap_or_else(|| "https://www.treasury.gov/ofac/downloads/sdn.csv".to_string());
        let news_endpoint = get("NEWSAPI_ENDPOINT")
            .unwrap_or_else(|| "https://newsapi.org/v2/everything".to_string());
        let etherscan_endpoint = get("ETHERSCAN_ENDPOINT")
            .unwrap_or_else(|| "https://api.etherscan.io/v2/api".to_string());
        let openrouter_endpoint = get("OPENROUTER_ENDPOINT")
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());

        for (name, url) in [
            ("OFAC_SDN_URL", &ofac_sdn_url),
            ("NEWSAPI_ENDPOINT", &news_endpoint),
            ("ETHERSCAN_ENDPOINT", &etherscan_endpoint),
            ("OPENROUTER_ENDPOINT", &openrouter_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }

        let regulatory_feeds = match get("REGULATORY_FEEDS") {
            Some(raw) => parse_feeds(&raw)?,
            None => RegulatoryFeed::defaults(),
        };

        let openrouter_api_key = get("OPENROUTER_API_KEY");
        if embeddings_provider == EmbeddingProvider::OpenRouter && openrouter_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENROUTER_API_KEY".to_string()));
        }

        let defaults = RiskWeights::default();
        let value_tiers = match get("RISK_VALUE_TIERS") {
            Some(raw) => parse_tiers(&raw)?,
            None => defaults.value_tiers.clone(),
        };

        let risk_weights = RiskWeights {
            sanctions_match: parsed(&get, "RISK_SANCTIONS_WEIGHT", defaults.sanctions_match),
            value_tiers,
            counterparty_per_match: parsed(&get, "RISK_COUNTERPARTY_WEIGHT", defaults.counterparty_per_match),
            counterparty_cap: parsed(&get, "RISK_COUNTERPARTY_CAP", defaults.counterparty_cap),
            news_critical: parsed(&get, "RISK_NEWS_CRITICAL_WEIGHT", defaults.news_critical),
            news_high: parsed(&get, "RISK_NEWS_HIGH_WEIGHT", defaults.news_high),
            news_medium: parsed(&get, "RISK_NEWS_MEDIUM_WEIGHT", defaults.news_medium),
            news_cap: parsed(&get, "RISK_NEWS_CAP", defaults.news_cap),
            news_half_life_secs: parsed(&get, "RISK_NEWS_HALF_LIFE_SECS", defaults.news_half_life_secs),
        };

        let alert_defaults = AlertThresholds::default();
        let alert_thresholds = AlertThresholds {
            high_value_eth: parsed(&get, "ALERT_HIGH_VALUE_ETH", alert_defaults.high_value_eth),
            top_value_eth: parsed(&get, "ALERT_TOP_VALUE_ETH", alert_defaults.top_value_eth),
            velocity_count: parsed(&get, "ALERT_VELOCITY_COUNT", alert_defaults.velocity_count),
            velocity_window_secs: parsed(&get, "ALERT_VELOCITY_WINDOW_SECS", alert_defaults.velocity_window_secs),
            regulatory_min_rank: parsed(&get, "ALERT_REGULATORY_MIN_RANK", alert_defaults.regulatory_min_rank),
        };
        if alert_thresholds.velocity_count < 2 {
            return Err(ConfigError::InvalidValue(
                "ALERT_VELOCITY_COUNT must be at least 2".to_string(),
            ));
        }

        let rule_defaults = ComplianceRules::default();
        let compliance_rules = ComplianceRules {
            kyc_threshold_eth: parsed(&get, "COMPLIANCE_KYC_THRESHOLD_ETH", rule_defaults.kyc_threshold_eth),
            reporting_threshold_eth: parsed(&get, "COMPLIANCE_REPORTING_THRESHOLD_ETH", rule_defaults.reporting_threshold_eth),
            enhanced_monitoring_eth: parsed(&get, "COMPLIANCE_ENHANCED_MONITORING_ETH", rule_defaults.enhanced_monitoring_eth),
            suspicious_frequency_per_hour: parsed(&get, "COMPLIANCE_SUSPICIOUS_TX_PER_HOUR", rule_defaults.suspicious_frequency_per_hour),
            daily_velocity_eth: parsed(&get, "COMPLIANCE_DAILY_VELOCITY_ETH", rule_defaults.daily_velocity_eth),
        };

        let denylist_addresses = get("DENYLIST_ADDRESSES")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let wallet_degrade_after = parsed(&get, "WALLET_DEGRADE_AFTER_FAILURES", 5);
        let wallet_stop_after = parsed(&get, "WALLET_STOP_AFTER_FAILURES", 10);
        if wallet_stop_after <= wallet_degrade_after {
            return Err(ConfigError::InvalidValue(
                "WALLET_STOP_AFTER_FAILURES must exceed WALLET_DEGRADE_AFTER_FAILURES".to_string(),
            ));
        }

        Ok(Self {
            db_path: get("REGWATCH_DB_PATH").unwrap_or_else(|| "regwatch.db".to_string()),
            schema_dir: get("REGWATCH_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            backend,
            license_key: get("ENGINE_LICENSE_KEY"),
            sanctions_interval_secs: parsed(&get, "SANCTIONS_POLL_INTERVAL_SECS", 3_600),
            news_interval_secs: parsed(&get, "NEWS_POLL_INTERVAL_SECS", 300),
            regulatory_interval_secs: parsed(&get, "REGULATORY_POLL_INTERVAL_SECS", 300),
            wallet_poll_interval_secs: parsed(&get, "WALLET_POLL_INTERVAL_SECS", 30),
            backoff_initial_ms: parsed(&get, "BACKOFF_INITIAL_MS", 1_000),
            backoff_max_ms: parsed(&get, "BACKOFF_MAX_MS", 300_000),
            connector_degrade_after: parsed(&get, "CONNECTOR_DEGRADE_AFTER_FAILURES", 3),
            wallet_degrade_after,
            wallet_stop_after,
            sanctions_budget: RateBudgetConfig {
                max_requests: parsed(&get, "SANCTIONS_RATE_BUDGET", 4),
                window_secs: parsed(&get, "SANCTIONS_RATE_WINDOW_SECS", 3_600),
            },
            news_budget: RateBudgetConfig {
                max_requests: parsed(&get, "NEWS_RATE_BUDGET", 100),
                window_secs: parsed(&get, "NEWS_RATE_WINDOW_SECS", 86_400),
            },
            regulatory_budget: RateBudgetConfig {
                max_requests: parsed(&get, "REGULATORY_RATE_BUDGET", 12),
                window_secs: parsed(&get, "REGULATORY_RATE_WINDOW_SECS", 3_600),
            },
            chain_budget: RateBudgetConfig {
                max_requests: parsed(&get, "CHAIN_RATE_BUDGET", 5),
                window_secs: parsed(&get, "CHAIN_RATE_WINDOW_SECS", 1),
            },
            ofac_sdn_url,
            news_endpoint,
            news_api_key: get("NEWSAPI_KEY"),
            news_query: get("NEWS_QUERY")
                .unwrap_or_else(|| "cryptocurrency OR blockchain OR regulatory".to_string()),
            regulatory_feeds,
            etherscan_endpoint,
            etherscan_api_key: get("ETHERSCAN_API_KEY"),
            etherscan_chain_id: parsed(&get, "ETHERSCAN_CHAIN_ID", 1),
            embeddings_provider,
            embeddings_model: get("EMBEDDINGS_MODEL")
                .unwrap_or_else(|| "openai/text-embedding-3-small".to_string()),
            embeddings_dimension: parsed(&get, "EMBEDDINGS_DIMENSION", 384),
            openrouter_endpoint,
            openrouter_api_key,
            risk_weights,
            alert_thresholds,
            compliance_rules,
            denylist_addresses,
            http_bind: get("REGWATCH_HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}

fn parsed<T, F>(get: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Invalid {} '{}', using default", key, raw);
            default
        }),
        None => default,
    }
}

/// Parse `"SEC=https://..,CFTC=https://.."`; `none` disables every feed
fn parse_feeds(raw: &str) -> Result<Vec<RegulatoryFeed>, ConfigError> {
    if raw.trim().eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    let mut feeds: Vec<RegulatoryFeed> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (agency, url) = part.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue(format!("REGULATORY_FEEDS entry '{}' must be AGENCY=url", part))
        })?;
        let feed = RegulatoryFeed::new(agency, url);
        if feed.agency.is_empty() || !feed.agency.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidValue(format!(
                "REGULATORY_FEEDS agency '{}' must be alphanumeric",
                agency.trim()
            )));
        }
        if !feed.url.starts_with("http://") && !feed.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "REGULATORY_FEEDS url for {} must start with http:// or https://",
                feed.agency
            )));
        }
        if feeds.iter().any(|f| f.agency == feed.agency) {
            return Err(ConfigError::InvalidValue(format!(
                "REGULATORY_FEEDS lists {} twice",
                feed.agency
            )));
        }
        feeds.push(feed);
    }
    Ok(feeds)
}

/// Parse `"10:5,100:10"` into ascending (threshold, weight) pairs
fn parse_tiers(raw: &str) -> Result<Vec<(f64, u32)>, ConfigError> {
    let mut tiers = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (threshold, weight) = part.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(format!("RISK_VALUE_TIERS entry '{}' must be threshold:weight", part))
        })?;
        let threshold: f64 = threshold.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("RISK_VALUE_TIERS threshold '{}' is not a number", threshold))
        })?;
        let weight: u32 = weight.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("RISK_VALUE_TIERS weight '{}' is not an integer", weight))
        })?;
        tiers.push((threshold, weight));
    }
    tiers.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(tiers)
}
