use async_trait::async_trait;
use chrono::Utc;

use crate::db::{self, ListingRow, Pool, StoredListing};
use crate::error::{PipelineError, Result};
use crate::jobs::ScraperJob;
use crate::listing::{PriceHistoryRecord, ValuationRecord};
use crate::model::ListingStatus;

/// Durable storage used by the scrape pipeline. All writes are upserts, so
/// repeating a submission is harmless.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn upsert_listing(&self, record: &ValuationRecord) -> Result<StoredListing>;

    async fn append_price_history(&self, records: &[PriceHistoryRecord]) -> Result<usize>;

    async fn save_job(&self, job: &ScraperJob) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn find_job(&self, id: &str) -> Result<ScraperJob> {
        db::find_job(&self.pool, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("scraper job {id}")))
    }

    pub async fn find_listing(&self, id: i64) -> Result<ListingRow> {
        db::find_listing(&self.pool, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("listing {id}")))
    }

    /// Move a listing through the resale workflow. `status` is parsed,
    /// case-insensitively, before anything is written.
    pub async fn set_listing_status(&self, id: i64, status: &str) -> Result<ListingStatus> {
        let status = ListingStatus::parse(&status.trim().to_ascii_uppercase())
            .ok_or_else(|| PipelineError::Validation(format!("invalid listing status '{status}'")))?;
        if !db::set_listing_status(&self.pool, id, status, Utc::now()).await? {
            return Err(PipelineError::NotFound(format!("listing {id}")));
        }
        Ok(status)
    }
}

#[async_trait]
impl ListingStore for SqliteStore {
    async fn upsert_listing(&self, record: &ValuationRecord) -> Result<StoredListing> {
        Ok(db::upsert_listing(&self.pool, record, Utc::now()).await?)
    }

    async fn append_price_history(&self, records: &[PriceHistoryRecord]) -> Result<usize> {
        Ok(db::append_price_history(&self.pool, records, Utc::now()).await?)
    }

    async fn save_job(&self, job: &ScraperJob) -> Result<()> {
        Ok(db::save_job(&self.pool, job).await?)
    }
}
