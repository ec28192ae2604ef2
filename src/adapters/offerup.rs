use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use scraper::Html;
use tracing::{debug, info};

use crate::adapters::browser::Browser;
use crate::adapters::extract::{self, Strategy};
use crate::adapters::{apply_price_bounds, fallback_params, http, SourceAdapter};
use crate::error::Result;
use crate::listing::{parse_price, RawListing, SearchParams};
use crate::model::Platform;

const MAX_RESULTS: usize = 50;

const ROWS: &[&str] = &[
    "[data-testid='feed-item']",
    "a[href*='/item/detail/']",
    "div.item-tile",
];

const TITLE: &[Strategy] = &[
    Strategy::Text("[data-testid='item-title']"),
    Strategy::Text("span.item-title"),
    Strategy::Attr("img", "alt"),
    Strategy::OwnAttr("aria-label"),
];

const PRICE: &[Strategy] = &[
    Strategy::Text("[data-testid='item-price']"),
    Strategy::Text("span.item-price"),
    Strategy::Text("span[class*='price']"),
];

const LOCATION: &[Strategy] = &[
    Strategy::Text("[data-testid='item-location']"),
    Strategy::Text("span.item-location"),
];

const LINK: &[Strategy] = &[
    Strategy::OwnAttr("href"),
    Strategy::Attr("a[href*='/item/detail/']", "href"),
];

pub struct OfferUpAdapter {
    browser: Arc<dyn Browser>,
    base_url: Url,
}

impl OfferUpAdapter {
    pub fn new(browser: Arc<dyn Browser>, base_url: Url) -> Self {
        Self { browser, base_url }
    }

    fn search_url(&self, params: &SearchParams) -> Result<Url> {
        let mut query = vec![("q", params.keywords.trim().to_string())];
        if let Some(min) = params.min_price {
            query.push(("PRICE_MIN", format!("{min:.0}")));
        }
        if let Some(max) = params.max_price {
            query.push(("PRICE_MAX", format!("{max:.0}")));
        }
        if let Some(location) = &params.location {
            query.push(("location", location.clone()));
        }
        http::endpoint(&self.base_url, "search", &query)
    }

    async fn scrape(&self, url: Url, limit: usize) -> Result<Vec<RawListing>> {
        let mut page = self.browser.lease().await?;
        page.goto(&url).await?;
        let listings = parse_results(page.content(), &self.base_url, limit);
        debug!(url = %url, count = listings.len(), "offerup page parsed");
        Ok(listings)
    }
}

fn id_from_link(link: &str) -> Option<String> {
    let rest = link.split("/item/detail/").nth(1)?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
    (!id.is_empty()).then_some(id)
}

pub fn parse_results(html: &str, base: &Url, limit: usize) -> Vec<RawListing> {
    let document = Html::parse_document(html);
    extract::result_rows(&document, ROWS)
        .into_iter()
        .filter_map(|row| {
            let link = extract::first_match(row, LINK)?;
            let id = id_from_link(&link)?;
            Some(RawListing {
                id: Some(id),
                title: extract::first_match(row, TITLE),
                price: extract::first_match(row, PRICE).as_deref().and_then(parse_price),
                location: extract::first_match(row, LOCATION),
                images: extract::all_attrs(row, "img", "src"),
                url: base.join(&link).ok().map(|u| u.to_string()),
                ..Default::default()
            })
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SourceAdapter for OfferUpAdapter {
    fn platform(&self) -> Platform {
        Platform::OfferUp
    }

    fn max_results(&self) -> usize {
        MAX_RESULTS
    }

    async fn fetch_active(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        let url = self.search_url(params)?;
        self.scrape(url, params.limit).await
    }

    async fn fetch_sold(&self, _params: &SearchParams) -> Result<Vec<RawListing>> {
        Ok(Vec::new())
    }

    async fn fetch_active_fallback(&self, params: &SearchParams) -> Result<Vec<RawListing>> {
        let narrow = fallback_params(params);
        let url = self.search_url(&narrow)?;
        let listings = apply_price_bounds(params, self.scrape(url, narrow.limit).await?);
        info!(count = listings.len(), "offerup fallback search");
        Ok(listings)
    }
}
