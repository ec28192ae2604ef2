use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use tracing::{info, warn};

use crate::config::MarketplacesConfig;
use crate::error::{PipelineError, Result};
use crate::listing::{RawListing, SearchParams};
use crate::model::Platform;

pub mod browser;
pub mod classify;
pub mod craigslist;
pub mod ebay;
pub mod extract;
pub mod http;
pub mod mercari;
pub mod offerup;

pub use browser::{Browser, HttpBrowser, Page, PageLease};
pub use craigslist::CraigslistAdapter;
pub use ebay::EbayAdapter;
pub use mercari::MercariAdapter;
pub use offerup::OfferUpAdapter;

/// One marketplace integration. Failures are already classified into
/// `RateLimited`, `Transient` or `FatalAdapter` when they leave an adapter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Largest `limit` a single search may request.
    fn max_results(&self) -> usize;

    /// Checks that need no network, such as credentials being present.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_active(&self, params: &SearchParams) -> Result<Vec<RawListing>>;

    async fn fetch_sold(&self, params: &SearchParams) -> Result<Vec<RawListing>>;

    /// Narrow search used after a transient primary failure. Implementations
    /// send keywords only and filter prices locally.
    async fn fetch_active_fallback(&self, params: &SearchParams) -> Result<Vec<RawListing>>;
}

/// Keywords-only copy of `params` with a reduced limit.
pub fn fallback_params(params: &SearchParams) -> SearchParams {
    SearchParams::new(params.keywords.clone(), (params.limit / 2).max(1))
}

/// Drop listings whose known price falls outside the original bounds.
pub fn apply_price_bounds(params: &SearchParams, listings: Vec<RawListing>) -> Vec<RawListing> {
    listings
        .into_iter()
        .filter(|l| l.price.map_or(true, |p| params.price_in_bounds(p)))
        .collect()
}

/// Primary fetch with at most one fallback attempt after a transient failure.
pub async fn fetch_with_fallback(
    adapter: &dyn SourceAdapter,
    params: &SearchParams,
) -> Result<Vec<RawListing>> {
    match adapter.fetch_active(params).await {
        Ok(listings) => Ok(listings),
        Err(err @ PipelineError::Transient { .. }) => {
            warn!(platform = %adapter.platform(), error = %err, "primary fetch failed; trying fallback");
            let listings = adapter.fetch_active_fallback(params).await?;
            info!(platform = %adapter.platform(), count = listings.len(), "fallback fetch succeeded");
            Ok(listings)
        }
        Err(err) => Err(err),
    }
}

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters.get(&platform).cloned().ok_or_else(|| {
            PipelineError::Configuration(format!("no adapter registered for {platform}"))
        })
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }

    /// Register every shipped adapter. Missing API tokens are not an error
    /// here; `preflight` reports them when a search is attempted.
    pub fn from_config(cfg: &MarketplacesConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        let craigslist_base = Url::parse(&format!("https://{}.craigslist.org/", cfg.craigslist.site))
            .with_context(|| format!("invalid craigslist site '{}'", cfg.craigslist.site))?;
        registry.register(Arc::new(CraigslistAdapter::new(
            Arc::new(HttpBrowser::new(Platform::Craigslist)?),
            craigslist_base,
        )));

        let offerup_base = Url::parse(&cfg.offerup.base_url).context("invalid offerup base_url")?;
        registry.register(Arc::new(OfferUpAdapter::new(
            Arc::new(HttpBrowser::new(Platform::OfferUp)?),
            offerup_base,
        )));

        let ebay_base = Url::parse(&cfg.ebay.base_url).context("invalid ebay base_url")?;
        registry.register(Arc::new(EbayAdapter::new(cfg.ebay.token.clone(), ebay_base)?));

        let mercari_base = Url::parse(&cfg.mercari.base_url).context("invalid mercari base_url")?;
        registry.register(Arc::new(MercariAdapter::new(cfg.mercari.token.clone(), mercari_base)?));

        Ok(registry)
    }
}
