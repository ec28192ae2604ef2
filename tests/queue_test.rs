use chrono::{Duration, Utc};
use flip_scout::db::{self, ListingRow};
use flip_scout::listing::{normalize, RawListing};
use flip_scout::model::{Platform, QueueStatus};
use flip_scout::poster::{CrossPoster, PostFailure};
use flip_scout::queue::{self, QueueSettings};
use flip_scout::valuation;
use flip_scout::PipelineError;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup() -> (db::Pool, i64) {
    let pool = db::memory_pool().await.unwrap();
    let raw = RawListing {
        id: Some("7712".into()),
        title: Some("Herman Miller Aeron chair".into()),
        description: Some("Great condition".into()),
        price: Some(250.0),
        ..Default::default()
    };
    let listing = normalize(Platform::Craigslist, raw).unwrap();
    let record = valuation::estimate(&listing, Utc::now());
    let stored = db::upsert_listing(&pool, &record, Utc::now()).await.unwrap();
    (pool, stored.id)
}

fn settings() -> QueueSettings {
    QueueSettings {
        max_retries: 2,
        max_backoff_secs: 3600,
    }
}

#[derive(Clone, Default)]
struct RecordingPoster {
    responses: Arc<Mutex<VecDeque<Result<String, PostFailure>>>>,
    calls: Arc<Mutex<Vec<(i64, Platform)>>>,
}

impl RecordingPoster {
    fn with_responses(responses: Vec<Result<String, PostFailure>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<(i64, Platform)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl CrossPoster for RecordingPoster {
    async fn post(&self, listing: &ListingRow, target: Platform) -> Result<String, PostFailure> {
        self.calls.lock().await.push((listing.id, target));
        let mut guard = self.responses.lock().await;
        guard
            .pop_front()
            .unwrap_or_else(|| Ok(format!("https://{}.example/{}", target.as_str().to_lowercase(), listing.id)))
    }
}

#[tokio::test]
async fn same_platform_target_is_rejected_without_row() {
    let (pool, listing_id) = setup().await;
    let err = queue::enqueue(&pool, listing_id, Platform::Craigslist, &settings(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_listing_is_not_found() {
    let (pool, _) = setup().await;
    let err = queue::enqueue(&pool, 999, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn batch_creates_one_pending_row_per_target() {
    let (pool, listing_id) = setup().await;
    let items = queue::enqueue_batch(
        &pool,
        listing_id,
        &[Platform::Ebay, Platform::OfferUp, Platform::Mercari],
        &settings(),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.status == QueueStatus::Pending));
    assert!(items.iter().all(|i| i.source_platform == Platform::Craigslist));
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 3);
}

#[tokio::test]
async fn batch_drops_source_and_duplicates() {
    let (pool, listing_id) = setup().await;
    let items = queue::enqueue_batch(
        &pool,
        listing_id,
        &[Platform::Craigslist, Platform::Ebay, Platform::Ebay],
        &settings(),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(items.len(), 1);

    let err = queue::enqueue_batch(&pool, listing_id, &[Platform::Craigslist], &settings(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn duplicate_pair_upserts_same_row() {
    let (pool, listing_id) = setup().await;
    let first = queue::enqueue(&pool, listing_id, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap();
    let second = queue::enqueue(&pool, listing_id, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn dispatch_success_stores_posted_url() {
    let (pool, listing_id) = setup().await;
    let item = queue::enqueue(&pool, listing_id, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap();
    let poster = RecordingPoster::with_responses(vec![Ok("https://www.ebay.com/itm/1".into())]);

    assert!(queue::process_next(&pool, &poster, &settings(), Utc::now()).await.unwrap());
    assert!(!queue::process_next(&pool, &poster, &settings(), Utc::now()).await.unwrap());

    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
    assert_eq!(stored.posted_url.as_deref(), Some("https://www.ebay.com/itm/1"));
    assert_eq!(poster.calls().await, vec![(listing_id, Platform::Ebay)]);
}

#[tokio::test]
async fn failures_back_off_then_fail_at_max_retries() {
    let (pool, listing_id) = setup().await;
    let item = queue::enqueue(&pool, listing_id, Platform::Mercari, &settings(), Utc::now())
        .await
        .unwrap();
    let poster = RecordingPoster::with_responses(vec![
        Err(PostFailure::Retryable("relay 502".into())),
        Err(PostFailure::Retryable("relay 502".into())),
        Err(PostFailure::Retryable("relay 503".into())),
    ]);

    let t0 = Utc::now();
    assert!(queue::process_next(&pool, &poster, &settings(), t0).await.unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.scheduled_at >= t0 + Duration::seconds(59));

    // not due yet
    assert!(!queue::process_next(&pool, &poster, &settings(), t0).await.unwrap());

    let t1 = t0 + Duration::minutes(2);
    assert!(queue::process_next(&pool, &poster, &settings(), t1).await.unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!((stored.status, stored.retry_count), (QueueStatus::Pending, 2));
    assert!(stored.scheduled_at >= t1 + Duration::seconds(119));

    let t2 = t1 + Duration::minutes(5);
    assert!(queue::process_next(&pool, &poster, &settings(), t2).await.unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.last_error.as_deref(), Some("relay 503"));

    let err = queue::retry(&pool, &item.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::StateConflict(_)));
    let unchanged = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(unchanged, stored);
}

#[tokio::test]
async fn rejected_post_can_be_retried_manually() {
    let (pool, listing_id) = setup().await;
    let item = queue::enqueue(&pool, listing_id, Platform::Poshmark, &settings(), Utc::now())
        .await
        .unwrap();
    let poster = RecordingPoster::with_responses(vec![Err(PostFailure::Rejected("category not allowed".into()))]);

    assert!(queue::process_next(&pool, &poster, &settings(), Utc::now()).await.unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!((stored.status, stored.retry_count), (QueueStatus::Failed, 0));

    let retried = queue::retry(&pool, &item.id, Utc::now()).await.unwrap();
    assert_eq!((retried.status, retried.retry_count), (QueueStatus::Pending, 1));
    assert!(queue::process_next(&pool, &poster, &settings(), Utc::now()).await.unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
}

#[tokio::test]
async fn in_progress_items_cannot_be_cancelled_or_deleted() {
    let (pool, listing_id) = setup().await;
    let item = queue::enqueue(&pool, listing_id, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap();
    let claimed = db::claim_next_due(&pool, Utc::now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, item.id);
    assert_eq!(claimed.status, QueueStatus::InProgress);
    assert!(db::claim_next_due(&pool, Utc::now()).await.unwrap().is_none());

    assert!(matches!(
        queue::cancel(&pool, &item.id, Utc::now()).await,
        Err(PipelineError::StateConflict(_))
    ));
    assert!(matches!(
        queue::delete(&pool, &item.id).await,
        Err(PipelineError::StateConflict(_))
    ));
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn pending_items_cancel_and_delete() {
    let (pool, listing_id) = setup().await;
    let items = queue::enqueue_batch(
        &pool,
        listing_id,
        &[Platform::Ebay, Platform::Mercari],
        &settings(),
        Utc::now(),
    )
    .await
    .unwrap();

    let cancelled = queue::cancel(&pool, &items[0].id, Utc::now()).await.unwrap();
    assert_eq!(cancelled.status, QueueStatus::Cancelled);
    assert!(queue::cancel(&pool, &items[0].id, Utc::now()).await.is_err());

    queue::delete(&pool, &items[1].id).await.unwrap();
    assert!(matches!(
        queue::delete(&pool, &items[1].id).await,
        Err(PipelineError::NotFound(_))
    ));
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn re_enqueue_leaves_terminal_rows_untouched() {
    let (pool, listing_id) = setup().await;
    let one_try = QueueSettings {
        max_retries: 1,
        max_backoff_secs: 3600,
    };
    let item = queue::enqueue(&pool, listing_id, Platform::Ebay, &one_try, Utc::now())
        .await
        .unwrap();
    let poster = RecordingPoster::with_responses(vec![
        Err(PostFailure::Retryable("relay 502".into())),
        Err(PostFailure::Retryable("relay 502".into())),
    ]);
    let t0 = Utc::now();
    assert!(queue::process_next(&pool, &poster, &one_try, t0).await.unwrap());
    assert!(queue::process_next(&pool, &poster, &one_try, t0 + Duration::hours(1)).await.unwrap());
    let failed = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!((failed.status, failed.retry_count), (QueueStatus::Failed, 1));

    let again = queue::enqueue(&pool, listing_id, Platform::Ebay, &one_try, Utc::now())
        .await
        .unwrap();
    assert_eq!(again, failed);
    assert_eq!(db::find_queue_item(&pool, &item.id).await.unwrap().unwrap(), failed);

    let other = queue::enqueue(&pool, listing_id, Platform::Mercari, &one_try, Utc::now())
        .await
        .unwrap();
    let cancelled = queue::cancel(&pool, &other.id, Utc::now()).await.unwrap();
    let batch = queue::enqueue_batch(&pool, listing_id, &[Platform::Mercari], &one_try, Utc::now())
        .await
        .unwrap();
    assert_eq!(batch[0].status, QueueStatus::Cancelled);
    assert_eq!(batch[0].updated_at, cancelled.updated_at);

    // nothing was revived, so the worker finds no work
    assert!(!queue::process_next(&pool, &poster, &one_try, t0 + Duration::days(1)).await.unwrap());
    assert_eq!(db::count_queue_items(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn storage_error_after_claim_releases_item_for_retry() {
    let (pool, listing_id) = setup().await;
    let item = queue::enqueue(&pool, listing_id, Platform::Ebay, &settings(), Utc::now())
        .await
        .unwrap();
    sqlx::query(
        "CREATE TRIGGER block_completion BEFORE UPDATE ON posting_queue
         WHEN NEW.status = 'COMPLETED'
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .execute(&pool)
    .await
    .unwrap();
    let poster = RecordingPoster::default();

    let t0 = Utc::now();
    assert!(queue::process_next(&pool, &poster, &settings(), t0).await.unwrap());
    assert_eq!(poster.calls().await.len(), 1);

    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.last_error.is_some());
    assert!(stored.scheduled_at >= t0 + Duration::seconds(59));
    assert!(db::claim_next_due(&pool, t0).await.unwrap().is_none());

    sqlx::query("DROP TRIGGER block_completion").execute(&pool).await.unwrap();
    assert!(queue::process_next(&pool, &poster, &settings(), t0 + Duration::minutes(2))
        .await
        .unwrap());
    let stored = db::find_queue_item(&pool, &item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Completed);
}
