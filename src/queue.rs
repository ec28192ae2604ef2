//! Posting queue engine: scheduled cross-platform re-listing attempts.
//!
//! Status changes are computed by `apply` without touching storage and then
//! written with a guard on the prior status, so a lost race is reported as a
//! conflict instead of overwriting another worker's result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, Pool};
use crate::error::{PipelineError, Result};
use crate::model::{Platform, QueueStatus};
use crate::poster::CrossPoster;

/// First retry delay; doubles per retry.
pub const BASE_BACKOFF_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingQueueItem {
    pub id: String,
    pub listing_id: i64,
    pub source_platform: Platform,
    pub target_platform: Platform,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub scheduled_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub posted_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Dispatch,
    Succeed { posted_url: String },
    Fail { error: String, retryable: bool },
    Cancel,
    Retry,
}

impl QueueEvent {
    fn name(&self) -> &'static str {
        match self {
            QueueEvent::Dispatch => "dispatch",
            QueueEvent::Succeed { .. } => "complete",
            QueueEvent::Fail { .. } => "fail",
            QueueEvent::Cancel => "cancel",
            QueueEvent::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_retries: i64,
    pub max_backoff_secs: i64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_backoff_secs: 3600,
        }
    }
}

/// Delay before retry number `retry_count` (1-based): 60s doubling, capped
/// at `max_backoff_secs` when that is positive.
pub fn backoff_delay(retry_count: i64, max_backoff_secs: i64) -> Duration {
    let exp = (retry_count - 1).clamp(0, 20) as u32;
    let secs = BASE_BACKOFF_SECS.saturating_mul(1_i64 << exp);
    let secs = if max_backoff_secs > 0 {
        secs.min(max_backoff_secs)
    } else {
        secs
    };
    Duration::seconds(secs)
}

fn conflict(item: &PostingQueueItem, event: &QueueEvent) -> PipelineError {
    PipelineError::StateConflict(format!(
        "cannot {} posting queue item {} in status {}",
        event.name(),
        item.id,
        item.status
    ))
}

/// Target status for `event`, or a conflict when the move is illegal.
pub fn next_state(item: &PostingQueueItem, event: &QueueEvent) -> Result<QueueStatus> {
    use QueueStatus::*;
    let next = match (item.status, event) {
        (Pending, QueueEvent::Dispatch) => InProgress,
        (InProgress, QueueEvent::Succeed { .. }) => Completed,
        (InProgress, QueueEvent::Fail { retryable, .. }) => {
            if *retryable && item.retry_count < item.max_retries {
                Pending
            } else {
                Failed
            }
        }
        (Pending | Failed, QueueEvent::Cancel) => Cancelled,
        (Failed, QueueEvent::Retry) if item.retry_count < item.max_retries => Pending,
        _ => return Err(conflict(item, event)),
    };
    Ok(next)
}

/// Compute the item after `event`. The input is never modified.
pub fn apply(
    item: &PostingQueueItem,
    event: QueueEvent,
    now: DateTime<Utc>,
    max_backoff_secs: i64,
) -> Result<PostingQueueItem> {
    let status = next_state(item, &event)?;
    let mut next = item.clone();
    next.status = status;
    next.updated_at = now;
    match event {
        QueueEvent::Dispatch | QueueEvent::Cancel => {}
        QueueEvent::Succeed { posted_url } => {
            next.posted_url = Some(posted_url);
            next.last_error = None;
        }
        QueueEvent::Fail { error, .. } => {
            next.last_error = Some(error);
            if status == QueueStatus::Pending {
                next.retry_count += 1;
                next.scheduled_at = now + backoff_delay(next.retry_count, max_backoff_secs);
            }
        }
        QueueEvent::Retry => {
            next.retry_count += 1;
            next.scheduled_at = now;
        }
    }
    Ok(next)
}

/// Dedupe requested targets and drop the listing's own platform.
pub fn plan_targets(source: Platform, targets: &[Platform]) -> Result<Vec<Platform>> {
    let mut planned: Vec<Platform> = Vec::with_capacity(targets.len());
    for &target in targets {
        if target != source && !planned.contains(&target) {
            planned.push(target);
        }
    }
    if planned.is_empty() {
        return Err(PipelineError::Validation(format!(
            "no target platforms left after removing the source platform {source}"
        )));
    }
    Ok(planned)
}

fn new_item(
    listing_id: i64,
    source: Platform,
    target: Platform,
    max_retries: i64,
    now: DateTime<Utc>,
) -> PostingQueueItem {
    PostingQueueItem {
        id: Uuid::new_v4().to_string(),
        listing_id,
        source_platform: source,
        target_platform: target,
        status: QueueStatus::Pending,
        retry_count: 0,
        max_retries,
        scheduled_at: now,
        last_error: None,
        posted_url: None,
        created_at: now,
        updated_at: now,
    }
}

async fn listing_platform(pool: &Pool, listing_id: i64) -> Result<Platform> {
    db::find_listing(pool, listing_id)
        .await?
        .map(|l| l.platform)
        .ok_or_else(|| PipelineError::NotFound(format!("listing {listing_id}")))
}

async fn load(pool: &Pool, id: &str) -> Result<PostingQueueItem> {
    db::find_queue_item(pool, id)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("posting queue item {id}")))
}

async fn write_guarded(pool: &Pool, next: &PostingQueueItem, expected: QueueStatus) -> Result<()> {
    if db::update_queue_item_guarded(pool, next, expected).await? {
        Ok(())
    } else {
        Err(PipelineError::StateConflict(format!(
            "posting queue item {} changed concurrently; expected status {expected}",
            next.id
        )))
    }
}

#[instrument(skip_all, fields(listing_id = listing_id, target = %target))]
pub async fn enqueue(
    pool: &Pool,
    listing_id: i64,
    target: Platform,
    settings: &QueueSettings,
    now: DateTime<Utc>,
) -> Result<PostingQueueItem> {
    let source = listing_platform(pool, listing_id).await?;
    if source == target {
        return Err(PipelineError::Validation(format!(
            "target platform {target} is the listing's own platform"
        )));
    }
    let item = new_item(listing_id, source, target, settings.max_retries, now);
    let stored = db::upsert_queue_item(pool, &item).await?;
    info!(id = %stored.id, status = %stored.status, "posting queued");
    Ok(stored)
}

#[instrument(skip_all, fields(listing_id = listing_id))]
pub async fn enqueue_batch(
    pool: &Pool,
    listing_id: i64,
    targets: &[Platform],
    settings: &QueueSettings,
    now: DateTime<Utc>,
) -> Result<Vec<PostingQueueItem>> {
    let source = listing_platform(pool, listing_id).await?;
    let planned = plan_targets(source, targets)?;
    let mut stored = Vec::with_capacity(planned.len());
    for target in planned {
        let item = new_item(listing_id, source, target, settings.max_retries, now);
        stored.push(db::upsert_queue_item(pool, &item).await?);
    }
    info!(count = stored.len(), "posting batch queued");
    Ok(stored)
}

#[instrument(skip_all, fields(id = %id))]
pub async fn cancel(pool: &Pool, id: &str, now: DateTime<Utc>) -> Result<PostingQueueItem> {
    let item = load(pool, id).await?;
    let next = apply(&item, QueueEvent::Cancel, now, 0)?;
    write_guarded(pool, &next, item.status).await?;
    info!(id, "posting cancelled");
    Ok(next)
}

#[instrument(skip_all, fields(id = %id))]
pub async fn retry(pool: &Pool, id: &str, now: DateTime<Utc>) -> Result<PostingQueueItem> {
    let item = load(pool, id).await?;
    let next = apply(&item, QueueEvent::Retry, now, 0)?;
    write_guarded(pool, &next, QueueStatus::Failed).await?;
    info!(id, retry_count = next.retry_count, "posting rescheduled");
    Ok(next)
}

#[instrument(skip_all, fields(id = %id))]
pub async fn delete(pool: &Pool, id: &str) -> Result<()> {
    let item = load(pool, id).await?;
    if item.status == QueueStatus::InProgress {
        return Err(PipelineError::StateConflict(format!(
            "posting queue item {id} is in progress and cannot be deleted"
        )));
    }
    if !db::delete_queue_item_guarded(pool, id).await? {
        return Err(PipelineError::StateConflict(format!(
            "posting queue item {id} changed concurrently"
        )));
    }
    info!(id, "posting deleted");
    Ok(())
}

/// Claim and run one due item. Returns `Ok(false)` when nothing was due.
///
/// Once an item is claimed it does not stay IN_PROGRESS: if the attempt
/// itself errors, the claim is released through a retryable failure.
#[instrument(skip_all)]
pub async fn process_next(
    pool: &Pool,
    poster: &dyn CrossPoster,
    settings: &QueueSettings,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(item) = db::claim_next_due(pool, now).await? else {
        return Ok(false);
    };

    let next = match attempt(pool, poster, settings, &item, now).await {
        Ok(next) => next,
        Err(err) => {
            error!(id = %item.id, error = %err, "posting attempt errored; releasing claim");
            let event = QueueEvent::Fail {
                error: err.to_string(),
                retryable: true,
            };
            let next = apply(&item, event, Utc::now().max(now), settings.max_backoff_secs)?;
            write_guarded(pool, &next, QueueStatus::InProgress).await?;
            next
        }
    };

    match next.status {
        QueueStatus::Completed => info!(
            id = %next.id,
            target = %next.target_platform,
            url = next.posted_url.as_deref().unwrap_or_default(),
            "posting succeeded"
        ),
        QueueStatus::Pending => warn!(
            id = %next.id,
            retry_count = next.retry_count,
            scheduled_at = %next.scheduled_at,
            error = next.last_error.as_deref().unwrap_or_default(),
            "posting failed; backoff"
        ),
        _ => warn!(
            id = %next.id,
            error = next.last_error.as_deref().unwrap_or_default(),
            "posting failed permanently"
        ),
    }
    Ok(true)
}

async fn attempt(
    pool: &Pool,
    poster: &dyn CrossPoster,
    settings: &QueueSettings,
    item: &PostingQueueItem,
    now: DateTime<Utc>,
) -> Result<PostingQueueItem> {
    let event = match db::find_listing(pool, item.listing_id).await? {
        None => QueueEvent::Fail {
            error: format!("listing {} no longer exists", item.listing_id),
            retryable: false,
        },
        Some(listing) => match poster.post(&listing, item.target_platform).await {
            Ok(posted_url) => QueueEvent::Succeed { posted_url },
            Err(err) => QueueEvent::Fail {
                retryable: err.is_retryable(),
                error: err.to_string(),
            },
        },
    };

    let next = apply(item, event, Utc::now().max(now), settings.max_backoff_secs)?;
    write_guarded(pool, &next, QueueStatus::InProgress).await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: QueueStatus, retry_count: i64, max_retries: i64) -> PostingQueueItem {
        let now = Utc::now();
        PostingQueueItem {
            status,
            retry_count,
            ..new_item(1, Platform::Craigslist, Platform::Ebay, max_retries, now)
        }
    }

    #[test]
    fn backoff_doubles_from_sixty_seconds_and_caps() {
        assert_eq!(backoff_delay(1, 0), Duration::seconds(60));
        assert_eq!(backoff_delay(2, 0), Duration::seconds(120));
        assert_eq!(backoff_delay(4, 0), Duration::seconds(480));
        assert_eq!(backoff_delay(10, 600), Duration::seconds(600));
        assert_eq!(backoff_delay(0, 0), Duration::seconds(60));
    }

    #[test]
    fn failure_under_limit_reschedules() {
        let now = Utc::now();
        let it = item(QueueStatus::InProgress, 0, 3);
        let next = apply(
            &it,
            QueueEvent::Fail { error: "relay 502".into(), retryable: true },
            now,
            3600,
        )
        .unwrap();
        assert_eq!(next.status, QueueStatus::Pending);
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.scheduled_at, now + Duration::seconds(60));
        assert_eq!(next.last_error.as_deref(), Some("relay 502"));
        assert_eq!(it.status, QueueStatus::InProgress);
    }

    #[test]
    fn failure_at_limit_or_rejected_is_final() {
        let now = Utc::now();
        let at_limit = item(QueueStatus::InProgress, 3, 3);
        let next = apply(&at_limit, QueueEvent::Fail { error: "x".into(), retryable: true }, now, 0).unwrap();
        assert_eq!(next.status, QueueStatus::Failed);
        assert_eq!(next.retry_count, 3);

        let rejected = item(QueueStatus::InProgress, 0, 3);
        let next = apply(&rejected, QueueEvent::Fail { error: "x".into(), retryable: false }, now, 0).unwrap();
        assert_eq!(next.status, QueueStatus::Failed);
        assert_eq!(next.retry_count, 0);
    }

    #[test]
    fn retry_only_from_failed_under_limit() {
        let now = Utc::now();
        let failed = item(QueueStatus::Failed, 1, 3);
        let next = apply(&failed, QueueEvent::Retry, now, 0).unwrap();
        assert_eq!((next.status, next.retry_count), (QueueStatus::Pending, 2));
        assert_eq!(next.scheduled_at, now);

        let exhausted = item(QueueStatus::Failed, 3, 3);
        assert!(matches!(
            apply(&exhausted, QueueEvent::Retry, now, 0),
            Err(PipelineError::StateConflict(_))
        ));
        assert!(apply(&item(QueueStatus::Pending, 0, 3), QueueEvent::Retry, now, 0).is_err());
    }

    #[test]
    fn cancel_rules() {
        let now = Utc::now();
        assert!(apply(&item(QueueStatus::Pending, 0, 3), QueueEvent::Cancel, now, 0).is_ok());
        assert!(apply(&item(QueueStatus::Failed, 3, 3), QueueEvent::Cancel, now, 0).is_ok());
        for status in [QueueStatus::InProgress, QueueStatus::Completed, QueueStatus::Cancelled] {
            assert!(apply(&item(status, 0, 3), QueueEvent::Cancel, now, 0).is_err(), "{status}");
        }
    }

    #[test]
    fn dispatch_only_from_pending() {
        let now = Utc::now();
        assert!(apply(&item(QueueStatus::Pending, 0, 3), QueueEvent::Dispatch, now, 0).is_ok());
        assert!(apply(&item(QueueStatus::InProgress, 0, 3), QueueEvent::Dispatch, now, 0).is_err());
    }

    #[test]
    fn plan_targets_dedupes_and_drops_source() {
        let planned = plan_targets(
            Platform::Craigslist,
            &[Platform::Ebay, Platform::Craigslist, Platform::Ebay, Platform::Mercari],
        )
        .unwrap();
        assert_eq!(planned, vec![Platform::Ebay, Platform::Mercari]);
        assert!(matches!(
            plan_targets(Platform::Ebay, &[Platform::Ebay]),
            Err(PipelineError::Validation(_))
        ));
    }
}
