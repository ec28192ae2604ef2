//! One scrape run: validate, track the job, fetch, score and persist.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{self, AdapterRegistry, SourceAdapter};
use crate::error::{PipelineError, Result};
use crate::identify::Identifier;
use crate::jobs::{JobEvent, ScraperJob};
use crate::listing::{self, RawListing, SearchParams};
use crate::model::{ListingStatus, Platform};
use crate::price_history;
use crate::store::ListingStore;
use crate::valuation::Estimator;

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub platform: Platform,
    pub params: SearchParams,
}

/// Outcome handed back to the caller. A failed job is still a report; only
/// errors raised before the job exists, or job writes that did not stick,
/// come back as `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub job: ScraperJob,
    pub listings_found: i64,
    pub opportunities_found: i64,
    pub skipped: usize,
    pub comparables_recorded: usize,
    /// Seconds to wait before trying again, set when the source rate limited us.
    pub retry_after_secs: Option<u64>,
}

impl ScrapeReport {
    pub fn succeeded(&self) -> bool {
        self.job.error_message.is_none()
    }
}

pub struct ScrapePipeline {
    registry: AdapterRegistry,
    store: Arc<dyn ListingStore>,
    estimator: Estimator,
    identifier: Option<Arc<dyn Identifier>>,
}

#[derive(Debug, Default)]
struct Persisted {
    listings: i64,
    opportunities: i64,
    skipped: usize,
}

impl ScrapePipeline {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn ListingStore>, estimator: Estimator) -> Self {
        Self {
            registry,
            store,
            estimator,
            identifier: None,
        }
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    #[instrument(skip_all, fields(platform = %request.platform, keywords = %request.params.keywords))]
    pub async fn run(&self, request: ScrapeRequest) -> Result<ScrapeReport> {
        let adapter = self.registry.get(request.platform)?;
        request.params.validate(adapter.max_results())?;
        adapter.preflight()?;

        let params = &request.params;
        let mut job = ScraperJob::new(
            request.platform,
            params.location.clone(),
            params.category.clone(),
            Utc::now(),
        );
        self.store.save_job(&job).await?;
        job.apply(JobEvent::Start, Utc::now())?;
        let running = job.clone();
        self.save_or_fail(&running, &job).await?;
        info!(job_id = %job.id, "scrape job started");

        let (active, sold) = tokio::join!(
            adapters::fetch_with_fallback(adapter.as_ref(), params),
            adapter.fetch_sold(params),
        );

        let comparables_recorded = self.record_sold(adapter.as_ref(), sold).await;

        let raw = match active {
            Ok(raw) => raw,
            Err(err) => {
                let retry_after_secs = err.retry_after_secs();
                error!(job_id = %job.id, error = %err, "scrape job failed");
                job.apply(JobEvent::Fail { message: err.to_string() }, Utc::now())?;
                self.save_or_fail(&running, &job).await?;
                return Ok(ScrapeReport {
                    job,
                    listings_found: 0,
                    opportunities_found: 0,
                    skipped: 0,
                    comparables_recorded,
                    retry_after_secs,
                });
            }
        };

        let fetched = raw.len();
        let persisted = self.persist(request.platform, raw).await;
        job.apply(
            JobEvent::Succeed {
                listings_found: persisted.listings,
                opportunities_found: persisted.opportunities,
            },
            Utc::now(),
        )?;
        self.save_or_fail(&running, &job).await?;
        info!(
            job_id = %job.id,
            fetched,
            listings = persisted.listings,
            opportunities = persisted.opportunities,
            skipped = persisted.skipped,
            "scrape job completed"
        );

        Ok(ScrapeReport {
            job,
            listings_found: persisted.listings,
            opportunities_found: persisted.opportunities,
            skipped: persisted.skipped,
            comparables_recorded,
            retry_after_secs: None,
        })
    }

    /// Save a job update. When that write fails the job must not be left
    /// RUNNING in storage, so a FAILED copy of `running` is written in its
    /// place before the original error is returned.
    async fn save_or_fail(&self, running: &ScraperJob, job: &ScraperJob) -> Result<()> {
        let Err(err) = self.store.save_job(job).await else {
            return Ok(());
        };
        error!(job_id = %job.id, status = %job.status, error = %err, "failed to save job");
        let mut failed = running.clone();
        failed.apply(
            JobEvent::Fail {
                message: format!("failed to save job: {err}"),
            },
            Utc::now(),
        )?;
        if let Err(again) = self.store.save_job(&failed).await {
            error!(job_id = %job.id, error = %again, "failed to record job failure");
        }
        Err(err)
    }

    /// Sold comparables are best effort; failures are logged only.
    async fn record_sold(&self, adapter: &dyn SourceAdapter, sold: Result<Vec<RawListing>>) -> usize {
        let platform = adapter.platform();
        let sold = match sold {
            Ok(sold) => sold,
            Err(err) => {
                warn!(%platform, error = %err, "sold fetch failed; continuing without comparables");
                return 0;
            }
        };
        match price_history::record(self.store.as_ref(), platform, &sold, Utc::now()).await {
            Ok(written) => written,
            Err(err) => {
                warn!(%platform, error = %err, "failed to append price history");
                0
            }
        }
    }

    async fn persist(&self, platform: Platform, raw: Vec<RawListing>) -> Persisted {
        let mut out = Persisted::default();
        for item in raw {
            let normalized = match listing::normalize(platform, item) {
                Ok(n) => n,
                Err(err) => {
                    warn!(%platform, error = %err, "skipping listing");
                    out.skipped += 1;
                    continue;
                }
            };

            let identification = match &self.identifier {
                Some(identifier) => match identifier.identify(&normalized).await {
                    Ok(found) => found,
                    Err(err) => {
                        warn!(key = %normalized.key(), error = ?err, "identification failed");
                        None
                    }
                },
                None => None,
            };

            let record = self
                .estimator
                .estimate_with(&normalized, Utc::now(), identification.as_ref());
            let key = normalized.key();
            match self.store.upsert_listing(&record).await {
                Ok(stored) => {
                    out.listings += 1;
                    if record.status == ListingStatus::Opportunity {
                        out.opportunities += 1;
                    }
                    debug!(%key, id = stored.id, score = record.value_score, "listing saved");
                }
                Err(err) => {
                    let err = PipelineError::PerItemSave {
                        key,
                        message: err.to_string(),
                    };
                    warn!(error = %err, "skipping listing");
                    out.skipped += 1;
                }
            }
        }
        out
    }
}
