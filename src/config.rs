//! Configuration loader and validator.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::adapters::{ebay, mercari};
use crate::queue::QueueSettings;
use crate::valuation::tables::{PLATFORM_FEE_RATE, SPREAD_HIGH, SPREAD_LOW};
use crate::valuation::ValuationSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub marketplaces: MarketplacesConfig,
    #[serde(default)]
    pub scoring: Scoring,
    #[serde(default)]
    pub posting: Posting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiMarketplace {
    #[serde(default)]
    pub token: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Craigslist {
    pub site: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferUp {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketplacesConfig {
    pub ebay: ApiMarketplace,
    pub mercari: ApiMarketplace,
    pub craigslist: Craigslist,
    pub offerup: OfferUp,
}

impl Default for MarketplacesConfig {
    fn default() -> Self {
        Self {
            ebay: ApiMarketplace {
                token: None,
                base_url: ebay::DEFAULT_BASE_URL.to_string(),
            },
            mercari: ApiMarketplace {
                token: None,
                base_url: mercari::DEFAULT_BASE_URL.to_string(),
            },
            craigslist: Craigslist {
                site: "sfbay".to_string(),
            },
            offerup: OfferUp {
                base_url: "https://offerup.com/".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scoring {
    pub platform_fee_rate: f64,
    pub spread_low: f64,
    pub spread_high: f64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            platform_fee_rate: PLATFORM_FEE_RATE,
            spread_low: SPREAD_LOW,
            spread_high: SPREAD_HIGH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub max_retries: u32,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub relay_token: Option<String>,
}

impl Default for Posting {
    fn default() -> Self {
        Self {
            max_retries: 3,
            relay_url: None,
            relay_token: None,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the data directory; `DATABASE_URL` wins when set.
    pub fn database_url(&self) -> String {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                let path = PathBuf::from(&self.app.data_dir).join("flip-scout.db");
                format!("sqlite://{}", path.display())
            }
        }
    }

    pub fn valuation_settings(&self) -> ValuationSettings {
        ValuationSettings {
            platform_fee_rate: self.scoring.platform_fee_rate,
            spread_low: self.scoring.spread_low,
            spread_high: self.scoring.spread_high,
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_retries: i64::from(self.posting.max_retries),
            max_backoff_secs: i64::try_from(self.app.max_backoff_seconds).unwrap_or(i64::MAX),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn check_url(key: &str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(invalid(format!("{key} must be an http(s) URL"))),
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(invalid("app.poll_interval_ms must be > 0"));
    }

    let m = &cfg.marketplaces;
    check_url("marketplaces.ebay.base_url", &m.ebay.base_url)?;
    check_url("marketplaces.mercari.base_url", &m.mercari.base_url)?;
    check_url("marketplaces.offerup.base_url", &m.offerup.base_url)?;
    let site = m.craigslist.site.trim();
    if site.is_empty() || !site.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid("marketplaces.craigslist.site must be a craigslist subdomain"));
    }

    let s = &cfg.scoring;
    if !(0.0..1.0).contains(&s.platform_fee_rate) {
        return Err(invalid("scoring.platform_fee_rate must be in [0, 1)"));
    }
    if !(s.spread_low > 0.0 && s.spread_low <= 1.0) {
        return Err(invalid("scoring.spread_low must be in (0, 1]"));
    }
    if !(s.spread_high >= 1.0 && s.spread_high.is_finite()) {
        return Err(invalid("scoring.spread_high must be >= 1"));
    }

    if let Some(relay) = &cfg.posting.relay_url {
        check_url("posting.relay_url", relay)?;
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000
  max_backoff_seconds: 3600

marketplaces:
  ebay:
    token: "YOUR_EBAY_OAUTH_TOKEN"
    base_url: "https://api.ebay.com/"
  mercari:
    token: "YOUR_MERCARI_API_TOKEN"
    base_url: "https://api.mercari.com/"
  craigslist:
    site: "sfbay"
  offerup:
    base_url: "https://offerup.com/"

scoring:
  platform_fee_rate: 0.13
  spread_low: 0.85
  spread_high: 1.15

posting:
  max_retries: 3
  relay_url: "http://127.0.0.1:8787/post"
  relay_token: "YOUR_RELAY_TOKEN"
"#
}
