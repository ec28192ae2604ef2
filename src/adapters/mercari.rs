use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::info;

use crate::adapters::{apply_price_bounds, fallback_params, http, SourceAdapter};
use crate::error::{PipelineError, Result};
use crate::listing::{RawListing, SearchParams};
use crate::model::{Condition, Platform};
use crate::valuation;

pub const DEFAULT_BASE_URL: &str = "https://api.mercari.com/";

const MAX_RESULTS: usize = 100;
const SEARCH_PATH: &str = "v2/search";
const ITEM_URL_BASE: &str = "https://www.mercari.com/item/";

pub struct MercariAdapter {
    http: Client,
    token: Option<String>,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    id: Option<String>,
    name: Option<String>,
    title: Option<String>,
    description: Option<String>,
    price: Option<f64>,
    condition_description: Option<String>,
    condition: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default)]
    thumbnails: Vec<String>,
    seller_username: Option<String>,
    seller_rating: Option<f64>,
    seller_total_sales: Option<i64>,
    seller_join_date: Option<String>,
    shipping_cost: Option<f64>,
    shipping_method: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    listing_url: Option<String>,
    created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    status: Option<String>,
}

/// Map Mercari's condition labels onto the shared condition scale. Unknown
/// labels count as good.
pub fn normalize_condition(label: &str) -> Condition {
    valuation::map_condition(label).unwrap_or(Condition::Good)
}

fn condition_code(condition: Condition) -> &'static str {
    match condition {
        Condition::New => "1",
        Condition::LikeNew => "2",
        Condition::Excellent | Condition::Good => "3",
        Condition::Fair | Condition::Poor => "4",
    }
}

/// Explicit brand field, then the title, then the description.
fn extract_brand(item: &Item, title: Option<&str>) -> Option<String> {
    item.brand
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .or_else(|| title.and_then(valuation::first_brand).map(str::to_string))
        .or_else(|| {
            item.description
                .as_deref()
                .and_then(valuation::first_brand)
                .map(str::to_string)
        })
}

impl Item {
    fn into_raw(self) -> RawListing {
        let title = self.name.clone().or_else(|| self.title.clone());
        let brand = extract_brand(&self, title.as_deref());
        let condition = self
            .condition_description
            .as_deref()
            .or(self.condition.as_deref())
            .map(|c| normalize_condition(c).label().to_string());
        let url = self
            .listing_url
            .or_else(|| self.id.as_ref().map(|id| format!("{ITEM_URL_BASE}{id}")));
        let sold = self.status.as_deref() == Some("sold_out") || self.status.as_deref() == Some("sold");
        let images = if self.image_urls.is_empty() {
            self.thumbnails
        } else {
            self.image_urls
        };
        RawListing {
            id: self.id,
            title,
            description: self.description,
            price: self.price,
            condition,
            images,
            seller_name: Some(
                self.seller_username
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| valuation::UNKNOWN_SELLER.to_string()),
            ),
            seller_rating: self.seller_rating,
            seller_total_sales: Some(self.seller_total_sales.unwrap_or(0)),
            seller_joined: self.seller_join_date,
            shipping_cost: self.shipping_cost,
            shipping_method: self.shipping_method,
            category: self.category,
            brand,
            url,
            posted_at: self.created,
            sold_at: if sold { self.updated } else { None },
            ..Default::default()
        }
    }
}

impl MercariAdapter {
    pub fn new(token: Option<String>, base_url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client("flip-scout/0.1")?,
            token: token.filter(|t| !t.trim().is_empty()),
            base_url,
        })
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            PipelineError::Configuration(
                "marketplaces.mercari.token is required for Mercari searches".into(),
            )
        })
    }

    fn query(params: &SearchParams, limit: usize, status: &str, filtered: bool) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("keyword", params.keywords.trim().to_string()),
            ("limit", limit.to_string()),
            ("status", status.to_string()),
        ];
        if !filtered {
            return query;
        }
        if let Some(category) = &params.category {
            query.push(("category_id", category.clone()));
        }
        if let Some(condition) = params.condition {
            query.push(("condition", condition_code(condition).to_string()));
        }
        if let Some(min) = params.min_price {
            query.push(("price_min", format!("{min}")));
        }
        if let Some(max) = params.max_price {
            query.push(("price_max", format!("{max}")));
        }
        query
    }

    async fn search(&self, query: &[(&str, String)]) -> Result<Vec<RawListing>> {
        let token = self.token()?;
        let url = http::endpoint(&self.base_url, SEARCH_PATH, query)?;
        let response: SearchResponse = http::get_json(&self.http, Platform::Mercari, url, Some(token)).await?;
        Ok(response.items.into_iter().map(Item::into_raw).collect())
    }
}

#[async_trait]
impl SourceAdapter for MercariAdapter {
    fn platform(&self) -> Platform {
        Platform::Mercari
    }

    fn max_results(&self) -> usize {
        MAX_RESULTS
    }

    fn preflight(&self) -> Result<()> {
        self.token().map(|_| ())
    }

    async fn fetch_active(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        self.search(&Self::query(params, params.limit, "on_sale", true)).await
    }

    async fn fetch_sold(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        self.search(&Self::query(params, params.limit, "sold_out", true)).await
    }

    async fn fetch_active_fallback(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        let narrow = fallback_params(params);
        let query = Self::query(&narrow, narrow.limit, "on_sale", false);
        let listings = apply_price_bounds(params, self.search(&query).await?);
        info!(count = listings.len(), "mercari fallback search");
        Ok(listings)
    }
}
