//! Listing shapes as they move through the pipeline: raw adapter output,
//! the canonical normalized form, and the scored valuation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::{Condition, ListingStatus, Platform, ResaleDifficulty};
use crate::valuation;

/// Search parameters accepted by every source adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub keywords: String,
    pub category: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub condition: Option<Condition>,
    pub limit: usize,
}

impl SearchParams {
    pub fn new(keywords: impl Into<String>, limit: usize) -> Self {
        Self {
            keywords: keywords.into(),
            category: None,
            location: None,
            min_price: None,
            max_price: None,
            condition: None,
            limit,
        }
    }

    /// Reject bad parameters before any job is created. `cap` is the
    /// adapter's maximum page size.
    pub fn validate(&self, cap: usize) -> Result<()> {
        if self.keywords.trim().is_empty() {
            return Err(PipelineError::Validation("keywords must be non-empty".into()));
        }
        if self.limit == 0 || self.limit > cap {
            return Err(PipelineError::Validation(format!(
                "limit must be between 1 and {cap}, got {}",
                self.limit
            )));
        }
        for (name, bound) in [("min_price", self.min_price), ("max_price", self.max_price)] {
            if let Some(v) = bound {
                if !v.is_finite() || v < 0.0 {
                    return Err(PipelineError::Validation(format!(
                        "{name} must be a non-negative number"
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(PipelineError::Validation(format!(
                    "min_price {min} exceeds max_price {max}"
                )));
            }
        }
        Ok(())
    }

    pub fn price_in_bounds(&self, price: f64) -> bool {
        self.min_price.map_or(true, |min| price >= min)
            && self.max_price.map_or(true, |max| price <= max)
    }
}

/// Source-specific listing as returned by an adapter. Lives for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub condition: Option<String>,
    pub images: Vec<String>,
    pub seller_name: Option<String>,
    pub seller_contact: Option<String>,
    pub seller_rating: Option<f64>,
    pub seller_total_sales: Option<i64>,
    pub seller_joined: Option<String>,
    pub shipping_cost: Option<f64>,
    pub shipping_method: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub platform: Platform,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub asking_price: f64,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub image_urls: Vec<String>,
    pub seller_name: Option<String>,
    pub seller_contact: Option<String>,
    pub seller_rating: Option<f64>,
    pub seller_total_sales: Option<i64>,
    pub seller_joined: Option<String>,
    /// What the buyer pays on top of the asking price to receive the item.
    pub shipping_cost: Option<f64>,
    pub shipping_method: Option<String>,
    pub shippable: bool,
    pub negotiable: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub brand: Option<String>,
}

impl NormalizedListing {
    /// Upsert key in the listing store.
    pub fn key(&self) -> String {
        format!("{}:{}", self.platform, self.external_id)
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

/// Turn a raw adapter record into the canonical shape. Records without an
/// id, a title or a non-negative price are rejected.
pub fn normalize(platform: Platform, raw: RawListing) -> Result<NormalizedListing> {
    let external_id = clean(raw.id)
        .ok_or_else(|| PipelineError::Validation(format!("{platform} listing without id")))?;
    let title = clean(raw.title).ok_or_else(|| {
        PipelineError::Validation(format!("{platform} listing {external_id} without title"))
    })?;
    let asking_price = match raw.price {
        Some(p) if p.is_finite() && p >= 0.0 => p,
        Some(p) => {
            return Err(PipelineError::Validation(format!(
                "{platform} listing {external_id} has invalid price {p}"
            )))
        }
        None => {
            return Err(PipelineError::Validation(format!(
                "{platform} listing {external_id} has no price"
            )))
        }
    };
    let description = raw.description.unwrap_or_default().trim().to_string();

    let mut image_urls: Vec<String> = Vec::with_capacity(raw.images.len());
    for url in raw.images {
        let url = url.trim().to_string();
        if !url.is_empty() && !image_urls.contains(&url) {
            image_urls.push(url);
        }
    }

    Ok(NormalizedListing {
        platform,
        shippable: valuation::is_shippable(&description),
        negotiable: valuation::is_negotiable(&description),
        external_id,
        title,
        description,
        asking_price,
        condition: clean(raw.condition),
        location: clean(raw.location),
        category: clean(raw.category),
        image_urls,
        seller_name: clean(raw.seller_name),
        seller_contact: clean(raw.seller_contact),
        seller_rating: raw.seller_rating.filter(|r| r.is_finite() && *r >= 0.0),
        seller_total_sales: raw.seller_total_sales.filter(|n| *n >= 0),
        seller_joined: clean(raw.seller_joined),
        shipping_cost: raw.shipping_cost.filter(|c| c.is_finite() && *c >= 0.0),
        shipping_method: clean(raw.shipping_method),
        posted_at: raw.posted_at,
        url: clean(raw.url),
        brand: clean(raw.brand),
    })
}

/// Parse a display price such as "$1,250" or "1250.00 USD".
pub fn parse_price(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    digits.parse::<f64>().ok()
}

/// A normalized listing plus everything the estimation engine derives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRecord {
    pub listing: NormalizedListing,
    pub category: String,
    pub condition: Condition,
    pub brands: Vec<String>,
    pub risk_flags: Vec<String>,
    pub estimated_value: f64,
    pub estimated_low: f64,
    pub estimated_high: f64,
    pub profit_potential: f64,
    pub profit_low: f64,
    pub profit_high: f64,
    pub value_score: u8,
    pub discount_percent: f64,
    pub resale_difficulty: ResaleDifficulty,
    pub comparable_urls: [String; 4],
    pub tags: Vec<String>,
    pub request_to_buy: String,
    pub status: ListingStatus,
    pub scored_at: DateTime<Utc>,
}

/// Sold comparable, appended to the price history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
    pub category: String,
    pub condition: Condition,
    pub sold_price: f64,
    pub sold_at: DateTime<Utc>,
    pub source_platform: Platform,
}
