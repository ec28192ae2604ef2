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
use crate::model::{Condition, Platform};

const MAX_RESULTS: usize = 120;

const ROWS: &[&str] = &[
    "li.cl-static-search-result",
    "li.cl-search-result",
    "div.cl-search-result",
    "li.result-row",
];

const ID: &[Strategy] = &[Strategy::OwnAttr("data-pid"), Strategy::Attr("[data-pid]", "data-pid")];

const TITLE: &[Strategy] = &[
    Strategy::Text(".title"),
    Strategy::Text(".titlestring"),
    Strategy::Text("a.posting-title .label"),
    Strategy::Text("a.result-title"),
    Strategy::OwnAttr("title"),
];

const PRICE: &[Strategy] = &[
    Strategy::Text(".price"),
    Strategy::Text(".priceinfo"),
    Strategy::Text(".result-price"),
];

const LOCATION: &[Strategy] = &[
    Strategy::Text(".location"),
    Strategy::Text(".result-hood"),
    Strategy::Text(".meta .separator + span"),
];

const LINK: &[Strategy] = &[Strategy::Attr("a[href]", "href")];

/// Craigslist search-result scraper. Craigslist shows no sold listings.
pub struct CraigslistAdapter {
    browser: Arc<dyn Browser>,
    base_url: Url,
}

impl CraigslistAdapter {
    pub fn new(browser: Arc<dyn Browser>, base_url: Url) -> Self {
        Self { browser, base_url }
    }

    fn search_url(&self, params: &SearchParams) -> Result<Url> {
        let mut query = vec![("query", params.keywords.trim().to_string())];
        if let Some(min) = params.min_price {
            query.push(("min_price", format!("{min:.0}")));
        }
        if let Some(max) = params.max_price {
            query.push(("max_price", format!("{max:.0}")));
        }
        if let Some(condition) = params.condition {
            query.push(("condition", condition_code(condition).to_string()));
        }
        if let Some(location) = &params.location {
            query.push(("postal", location.clone()));
        }
        http::endpoint(&self.base_url, "search/sss", &query)
    }

    async fn scrape(&self, url: Url, limit: usize) -> Result<Vec<RawListing>> {
        let mut page = self.browser.lease().await?;
        page.goto(&url).await?;
        let listings = parse_results(page.content(), &self.base_url, limit);
        debug!(url = %url, count = listings.len(), "craigslist page parsed");
        Ok(listings)
    }
}

fn condition_code(condition: Condition) -> u8 {
    match condition {
        Condition::New => 10,
        Condition::LikeNew => 20,
        Condition::Excellent => 30,
        Condition::Good => 40,
        Condition::Fair => 50,
        Condition::Poor => 60,
    }
}

/// Posting id from a link like `/sfc/fuo/d/oak-desk/7712345678.html`.
fn id_from_link(link: &str) -> Option<String> {
    let stem = link.rsplit('/').next()?.split('.').next()?;
    (!stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit())).then(|| stem.to_string())
}

pub fn parse_results(html: &str, base: &Url, limit: usize) -> Vec<RawListing> {
    let document = Html::parse_document(html);
    extract::result_rows(&document, ROWS)
        .into_iter()
        .filter_map(|row| {
            let link = extract::first_match(row, LINK);
            let url = link.as_deref().and_then(|l| base.join(l).ok()).map(|u| u.to_string());
            let id = extract::first_match(row, ID).or_else(|| link.as_deref().and_then(id_from_link));
            let title = extract::first_match(row, TITLE)?;
            Some(RawListing {
                id,
                title: Some(title),
                price: extract::first_match(row, PRICE).as_deref().and_then(parse_price),
                location: extract::first_match(row, LOCATION)
                    .map(|l| l.trim_matches(|c| c == '(' || c == ')').to_string()),
                images: extract::all_attrs(row, "img", "src"),
                url,
                ..Default::default()
            })
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SourceAdapter for CraigslistAdapter {
    fn platform(&self) -> Platform {
        Platform::Craigslist
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
        info!(count = listings.len(), "craigslist fallback search");
        Ok(listings)
    }
}
