use super::model::{ListingRow, StoredListing};
use crate::jobs::ScraperJob;
use crate::listing::{PriceHistoryRecord, ValuationRecord};
use crate::model::{JobStatus, ListingStatus, Platform, QueueStatus};
use crate::queue::PostingQueueItem;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied. Every
/// memory connection is its own database, so the pool must not grow.
pub async fn memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs, create the parent
/// directory and request file creation. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn to_json(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn platform_col(row: &SqliteRow, col: &str) -> Result<Platform> {
    let raw: String = row.try_get(col)?;
    Platform::parse(&raw).ok_or_else(|| anyhow!("invalid platform '{raw}' in column {col}"))
}

/// Insert or update a scored listing keyed by (platform, external_id).
/// Listings the reseller already moved past OPPORTUNITY keep their status.
#[instrument(skip_all, fields(key = %record.listing.key()))]
pub async fn upsert_listing(
    pool: &Pool,
    record: &ValuationRecord,
    now: DateTime<Utc>,
) -> Result<StoredListing> {
    let l = &record.listing;
    let row = sqlx::query(
        r#"INSERT INTO listings (
            platform, external_id, title, description, asking_price, condition, location,
            category, image_urls, seller_name, seller_contact, shippable, negotiable, posted_at,
            url, brands, risk_flags, estimated_value, estimated_low, estimated_high,
            profit_potential, profit_low, profit_high, value_score, discount_percent,
            resale_difficulty, comparable_urls, tags, request_to_buy, status, scored_at,
            created_at, updated_at, seller_rating, seller_total_sales, seller_joined,
            shipping_cost, shipping_method
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                  ?, ?, ?, ?, ?)
        ON CONFLICT (platform, external_id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            asking_price = excluded.asking_price,
            condition = excluded.condition,
            location = excluded.location,
            category = excluded.category,
            image_urls = excluded.image_urls,
            seller_name = excluded.seller_name,
            seller_contact = excluded.seller_contact,
            shippable = excluded.shippable,
            negotiable = excluded.negotiable,
            posted_at = excluded.posted_at,
            url = excluded.url,
            brands = excluded.brands,
            risk_flags = excluded.risk_flags,
            estimated_value = excluded.estimated_value,
            estimated_low = excluded.estimated_low,
            estimated_high = excluded.estimated_high,
            profit_potential = excluded.profit_potential,
            profit_low = excluded.profit_low,
            profit_high = excluded.profit_high,
            value_score = excluded.value_score,
            discount_percent = excluded.discount_percent,
            resale_difficulty = excluded.resale_difficulty,
            comparable_urls = excluded.comparable_urls,
            tags = excluded.tags,
            request_to_buy = excluded.request_to_buy,
            status = CASE WHEN listings.status IN ('NEW', 'OPPORTUNITY')
                          THEN excluded.status ELSE listings.status END,
            scored_at = excluded.scored_at,
            updated_at = excluded.updated_at,
            seller_rating = excluded.seller_rating,
            seller_total_sales = excluded.seller_total_sales,
            seller_joined = excluded.seller_joined,
            shipping_cost = excluded.shipping_cost,
            shipping_method = excluded.shipping_method
        RETURNING id, status"#,
    )
    .bind(l.platform.as_str())
    .bind(&l.external_id)
    .bind(&l.title)
    .bind(&l.description)
    .bind(l.asking_price)
    .bind(record.condition.as_str())
    .bind(&l.location)
    .bind(&record.category)
    .bind(to_json(&l.image_urls))
    .bind(&l.seller_name)
    .bind(&l.seller_contact)
    .bind(l.shippable)
    .bind(l.negotiable)
    .bind(l.posted_at)
    .bind(&l.url)
    .bind(to_json(&record.brands))
    .bind(to_json(&record.risk_flags))
    .bind(record.estimated_value)
    .bind(record.estimated_low)
    .bind(record.estimated_high)
    .bind(record.profit_potential)
    .bind(record.profit_low)
    .bind(record.profit_high)
    .bind(i64::from(record.value_score))
    .bind(record.discount_percent)
    .bind(record.resale_difficulty.as_str())
    .bind(to_json(&record.comparable_urls))
    .bind(to_json(&record.tags))
    .bind(&record.request_to_buy)
    .bind(record.status.as_str())
    .bind(record.scored_at)
    .bind(now)
    .bind(now)
    .bind(l.seller_rating)
    .bind(l.seller_total_sales)
    .bind(&l.seller_joined)
    .bind(l.shipping_cost)
    .bind(&l.shipping_method)
    .fetch_one(pool)
    .await
    .context("failed to upsert listing")?;

    let status: String = row.try_get("status")?;
    Ok(StoredListing {
        id: row.try_get("id")?,
        status: ListingStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid listing status '{status}'"))?,
    })
}

fn listing_from_row(row: &SqliteRow) -> Result<ListingRow> {
    let status: String = row.try_get("status")?;
    let image_urls: String = row.try_get("image_urls")?;
    let tags: String = row.try_get("tags")?;
    Ok(ListingRow {
        id: row.try_get("id")?,
        platform: platform_col(row, "platform")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        asking_price: row.try_get("asking_price")?,
        condition: row.try_get("condition")?,
        category: row.try_get("category")?,
        image_urls: from_json(&image_urls),
        url: row.try_get("url")?,
        tags: from_json(&tags),
        estimated_value: row.try_get("estimated_value")?,
        value_score: row.try_get("value_score")?,
        status: ListingStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid listing status '{status}'"))?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[instrument(skip_all)]
pub async fn find_listing(pool: &Pool, id: i64) -> Result<Option<ListingRow>> {
    let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(listing_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_listing_by_key(
    pool: &Pool,
    platform: Platform,
    external_id: &str,
) -> Result<Option<ListingRow>> {
    let row = sqlx::query("SELECT * FROM listings WHERE platform = ? AND external_id = ?")
        .bind(platform.as_str())
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(listing_from_row).transpose()
}

/// Returns false when no listing has that id.
#[instrument(skip_all)]
pub async fn set_listing_status(
    pool: &Pool,
    id: i64,
    status: ListingStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query("UPDATE listings SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update listing status")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn count_listings(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn append_price_history(
    pool: &Pool,
    records: &[PriceHistoryRecord],
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for r in records {
        sqlx::query(
            "INSERT INTO price_history (category, condition, sold_price, sold_at, source_platform, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&r.category)
        .bind(r.condition.as_str())
        .bind(r.sold_price)
        .bind(r.sold_at)
        .bind(r.source_platform.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("failed to append price history")?;
    }
    tx.commit().await?;
    Ok(records.len())
}

#[instrument(skip_all)]
pub async fn count_price_history(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all, fields(job_id = %job.id, status = %job.status))]
pub async fn save_job(pool: &Pool, job: &ScraperJob) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO scraper_jobs (
            id, platform, location, category, status, listings_found, opportunities_found,
            error_message, started_at, completed_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            status = excluded.status,
            listings_found = excluded.listings_found,
            opportunities_found = excluded.opportunities_found,
            error_message = excluded.error_message,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at"#,
    )
    .bind(&job.id)
    .bind(job.platform.as_str())
    .bind(&job.location)
    .bind(&job.category)
    .bind(job.status.as_str())
    .bind(job.listings_found)
    .bind(job.opportunities_found)
    .bind(&job.error_message)
    .bind(job.started_at)
    .bind(job.completed_at)
    .bind(job.created_at)
    .execute(pool)
    .await
    .context("failed to save scraper job")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn find_job(pool: &Pool, id: &str) -> Result<Option<ScraperJob>> {
    let Some(row) = sqlx::query("SELECT * FROM scraper_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };
    let status: String = row.try_get("status")?;
    Ok(Some(ScraperJob {
        id: row.try_get("id")?,
        platform: platform_col(&row, "platform")?,
        location: row.try_get("location")?,
        category: row.try_get("category")?,
        status: JobStatus::parse(&status).ok_or_else(|| anyhow!("invalid job status '{status}'"))?,
        listings_found: row.try_get("listings_found")?,
        opportunities_found: row.try_get("opportunities_found")?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    }))
}

fn queue_item_from_row(row: &SqliteRow) -> Result<PostingQueueItem> {
    let status: String = row.try_get("status")?;
    Ok(PostingQueueItem {
        id: row.try_get("id")?,
        listing_id: row.try_get("listing_id")?,
        source_platform: platform_col(row, "source_platform")?,
        target_platform: platform_col(row, "target_platform")?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid queue status '{status}'"))?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        scheduled_at: row.try_get("scheduled_at")?,
        last_error: row.try_get("last_error")?,
        posted_url: row.try_get("posted_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a queue item. An existing row for the same
/// (listing_id, target_platform) is returned unchanged, whatever its status.
#[instrument(skip_all, fields(listing_id = item.listing_id, target = %item.target_platform))]
pub async fn upsert_queue_item(pool: &Pool, item: &PostingQueueItem) -> Result<PostingQueueItem> {
    let row = sqlx::query(
        r#"INSERT INTO posting_queue (
            id, listing_id, source_platform, target_platform, status, retry_count, max_retries,
            scheduled_at, last_error, posted_url, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (listing_id, target_platform) DO UPDATE SET id = posting_queue.id
        RETURNING *"#,
    )
    .bind(&item.id)
    .bind(item.listing_id)
    .bind(item.source_platform.as_str())
    .bind(item.target_platform.as_str())
    .bind(item.status.as_str())
    .bind(item.retry_count)
    .bind(item.max_retries)
    .bind(item.scheduled_at)
    .bind(&item.last_error)
    .bind(&item.posted_url)
    .bind(item.created_at)
    .bind(item.updated_at)
    .fetch_one(pool)
    .await
    .context("failed to upsert posting queue item")?;
    queue_item_from_row(&row)
}

#[instrument(skip_all)]
pub async fn find_queue_item(pool: &Pool, id: &str) -> Result<Option<PostingQueueItem>> {
    let row = sqlx::query("SELECT * FROM posting_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(queue_item_from_row).transpose()
}

/// Claim the next due PENDING item by flipping it to IN_PROGRESS in one
/// guarded statement.
#[instrument(skip_all)]
pub async fn claim_next_due(pool: &Pool, now: DateTime<Utc>) -> Result<Option<PostingQueueItem>> {
    let row = sqlx::query(
        r#"UPDATE posting_queue SET status = 'IN_PROGRESS', updated_at = ?
        WHERE id = (
            SELECT id FROM posting_queue
            WHERE status = 'PENDING' AND julianday(scheduled_at) <= julianday(?)
            ORDER BY julianday(scheduled_at) ASC, created_at ASC
            LIMIT 1
        ) AND status = 'PENDING'
        RETURNING *"#,
    )
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("failed to claim posting queue item")?;
    row.as_ref().map(queue_item_from_row).transpose()
}

/// Write `item` only if the stored row still has status `expected`.
/// Returns false when the guard did not match.
#[instrument(skip_all, fields(id = %item.id, expected = %expected, next = %item.status))]
pub async fn update_queue_item_guarded(
    pool: &Pool,
    item: &PostingQueueItem,
    expected: QueueStatus,
) -> Result<bool> {
    let res = sqlx::query(
        r#"UPDATE posting_queue SET
            status = ?, retry_count = ?, max_retries = ?, scheduled_at = ?, last_error = ?,
            posted_url = ?, updated_at = ?
        WHERE id = ? AND status = ?"#,
    )
    .bind(item.status.as_str())
    .bind(item.retry_count)
    .bind(item.max_retries)
    .bind(item.scheduled_at)
    .bind(&item.last_error)
    .bind(&item.posted_url)
    .bind(item.updated_at)
    .bind(&item.id)
    .bind(expected.as_str())
    .execute(pool)
    .await
    .context("failed to update posting queue item")?;
    Ok(res.rows_affected() == 1)
}

/// Delete unless the item is in flight. Returns false when the guard did
/// not match or the row is gone.
#[instrument(skip_all)]
pub async fn delete_queue_item_guarded(pool: &Pool, id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM posting_queue WHERE id = ? AND status <> 'IN_PROGRESS'")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete posting queue item")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn count_queue_items(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posting_queue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_urls_are_normalized() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/db.sqlite");
        let url = prepare_sqlite_url(&format!("sqlite://{}", path.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn job_rows_round_trip() {
        let pool = memory_pool().await.unwrap();
        let now = Utc::now();
        let mut job = ScraperJob::new(Platform::Craigslist, Some("sfbay".into()), None, now);
        save_job(&pool, &job).await.unwrap();
        job.apply(crate::jobs::JobEvent::Start, now).unwrap();
        save_job(&pool, &job).await.unwrap();

        let loaded = find_job(&pool, &job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.location.as_deref(), Some("sfbay"));
        assert!(find_job(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seller_and_shipping_columns_are_stored() {
        let pool = memory_pool().await.unwrap();
        let raw = crate::listing::RawListing {
            id: Some("m1".into()),
            title: Some("Nike Air Max".into()),
            price: Some(80.0),
            seller_name: Some("test_seller".into()),
            seller_rating: Some(4.8),
            seller_total_sales: Some(250),
            seller_joined: Some("2023-01-15".into()),
            shipping_cost: Some(5.99),
            shipping_method: Some("USPS Priority".into()),
            ..Default::default()
        };
        let listing = crate::listing::normalize(Platform::Mercari, raw).unwrap();
        let record = crate::valuation::estimate(&listing, Utc::now());
        let stored = upsert_listing(&pool, &record, Utc::now()).await.unwrap();

        let row = sqlx::query(
            "SELECT seller_rating, seller_total_sales, seller_joined, shipping_cost, shipping_method FROM listings WHERE id = ?",
        )
        .bind(stored.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.get::<Option<f64>, _>("seller_rating"), Some(4.8));
        assert_eq!(row.get::<Option<i64>, _>("seller_total_sales"), Some(250));
        assert_eq!(row.get::<Option<String>, _>("seller_joined").as_deref(), Some("2023-01-15"));
        assert_eq!(row.get::<Option<f64>, _>("shipping_cost"), Some(5.99));
        assert_eq!(row.get::<Option<String>, _>("shipping_method").as_deref(), Some("USPS Priority"));
    }

    #[tokio::test]
    async fn check_constraint_rejects_unknown_status() {
        let pool = memory_pool().await.unwrap();
        let err = sqlx::query(
            "INSERT INTO scraper_jobs (id, platform, status, created_at) VALUES ('j1', 'EBAY', 'DONE', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(err.is_err());
    }
}
