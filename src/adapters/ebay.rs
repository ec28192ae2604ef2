use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::info;

use crate::adapters::{apply_price_bounds, fallback_params, http, SourceAdapter};
use crate::error::{PipelineError, Result};
use crate::listing::{parse_price, RawListing, SearchParams};
use crate::model::{Condition, Platform};

pub const DEFAULT_BASE_URL: &str = "https://api.ebay.com/";

const MAX_RESULTS: usize = 200;
const SEARCH_PATH: &str = "buy/browse/v1/item_summary/search";
const SOLD_PATH: &str = "buy/marketplace_insights/v1_beta/item_sales/search";

/// eBay Browse API for active listings, Marketplace Insights for sold ones.
pub struct EbayAdapter {
    http: Client,
    token: Option<String>,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SalesResponse {
    #[serde(default)]
    item_sales: Vec<ItemSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    item_id: Option<String>,
    title: Option<String>,
    short_description: Option<String>,
    price: Option<Amount>,
    last_sold_price: Option<Amount>,
    condition: Option<String>,
    image: Option<Image>,
    #[serde(default)]
    additional_images: Vec<Image>,
    seller: Option<Seller>,
    item_location: Option<Location>,
    item_web_url: Option<String>,
    item_creation_date: Option<DateTime<Utc>>,
    last_sold_date: Option<DateTime<Utc>>,
    #[serde(default)]
    categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct Seller {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    city: Option<String>,
    state_or_province: Option<String>,
    postal_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Category {
    category_name: Option<String>,
}

impl ItemSummary {
    fn into_raw(self) -> RawListing {
        let price = self
            .price
            .or(self.last_sold_price)
            .and_then(|a| parse_price(&a.value));
        let images = self
            .image
            .into_iter()
            .chain(self.additional_images)
            .map(|i| i.image_url)
            .collect();
        let location = self.item_location.and_then(|l| {
            let parts: Vec<String> = [l.city, l.state_or_province]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                l.postal_code
            } else {
                Some(parts.join(", "))
            }
        });
        RawListing {
            id: self.item_id,
            title: self.title,
            description: self.short_description,
            price,
            condition: self.condition,
            images,
            seller_name: self.seller.and_then(|s| s.username),
            location,
            category: self.categories.into_iter().find_map(|c| c.category_name),
            url: self.item_web_url,
            posted_at: self.item_creation_date,
            sold_at: self.last_sold_date,
            ..Default::default()
        }
    }
}

fn condition_filter(condition: Condition) -> &'static str {
    match condition {
        Condition::New => "1000",
        Condition::LikeNew => "2750",
        Condition::Excellent | Condition::Good | Condition::Fair => "3000",
        Condition::Poor => "7000",
    }
}

impl EbayAdapter {
    pub fn new(token: Option<String>, base_url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client("flip-scout/0.1")?,
            token: token.filter(|t| !t.trim().is_empty()),
            base_url,
        })
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            PipelineError::Configuration("marketplaces.ebay.token is required for eBay searches".into())
        })
    }

    /// Query pairs for the Browse API. `filtered = false` sends keywords and
    /// limit only.
    fn query(params: &SearchParams, limit: usize, filtered: bool) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("q", params.keywords.trim().to_string()),
            ("limit", limit.to_string()),
        ];
        if !filtered {
            return query;
        }
        let mut filters = vec!["buyingOptions:{FIXED_PRICE}".to_string()];
        if params.min_price.is_some() || params.max_price.is_some() {
            let lo = params.min_price.map(|v| format!("{v}")).unwrap_or_default();
            let hi = params.max_price.map(|v| format!("{v}")).unwrap_or_default();
            filters.push(format!("price:[{lo}..{hi}]"));
            filters.push("priceCurrency:USD".into());
        }
        if let Some(condition) = params.condition {
            filters.push(format!("conditionIds:{{{}}}", condition_filter(condition)));
        }
        query.push(("filter", filters.join(",")));
        if let Some(category) = &params.category {
            if category.chars().all(|c| c.is_ascii_digit()) {
                query.push(("category_ids", category.clone()));
            }
        }
        query
    }

    async fn search(&self, query: &[(&str, String)]) -> Result<Vec<RawListing>> {
        let token = self.token()?;
        let url = http::endpoint(&self.base_url, SEARCH_PATH, query)?;
        let response: SearchResponse = http::get_json(&self.http, Platform::Ebay, url, Some(token)).await?;
        Ok(response.item_summaries.into_iter().map(ItemSummary::into_raw).collect())
    }
}

#[async_trait]
impl SourceAdapter for EbayAdapter {
    fn platform(&self) -> Platform {
        Platform::Ebay
    }

    fn max_results(&self) -> usize {
        MAX_RESULTS
    }

    fn preflight(&self) -> Result<()> {
        self.token().map(|_| ())
    }

    async fn fetch_active(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        self.search(&Self::query(params, params.limit, true)).await
    }

    async fn fetch_sold(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        let token = self.token()?;
        let url = http::endpoint(&self.base_url, SOLD_PATH, &Self::query(params, params.limit, false))?;
        let response: SalesResponse = http::get_json(&self.http, Platform::Ebay, url, Some(token)).await?;
        Ok(response.item_sales.into_iter().map(ItemSummary::into_raw).collect())
    }

    async fn fetch_active_fallback(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        let narrow = fallback_params(params);
        let listings = apply_price_bounds(params, self.search(&Self::query(&narrow, narrow.limit, false)).await?);
        info!(count = listings.len(), "ebay fallback search");
        Ok(listings)
    }
}
