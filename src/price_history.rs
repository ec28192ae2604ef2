use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::listing::{PriceHistoryRecord, RawListing};
use crate::model::Platform;
use crate::store::ListingStore;
use crate::valuation;

/// Turn sold comparables into history rows. Records without a usable price
/// are dropped; a missing sold date falls back to `now`.
pub fn extract_comparables(
    platform: Platform,
    sold: &[RawListing],
    now: DateTime<Utc>,
) -> Vec<PriceHistoryRecord> {
    sold.iter()
        .filter_map(|raw| {
            let price = raw.price.filter(|p| p.is_finite() && *p > 0.0)?;
            let title = raw.title.as_deref().unwrap_or_default();
            let text = format!("{} {}", title, raw.description.as_deref().unwrap_or_default());
            let category = valuation::resolve_category(raw.category.as_deref(), &text);
            let condition = valuation::resolve_condition(raw.condition.as_deref(), &text);
            Some(PriceHistoryRecord {
                category,
                condition,
                sold_price: price,
                sold_at: raw.sold_at.unwrap_or(now),
                source_platform: platform,
            })
        })
        .collect()
}

/// Append comparables to the store. Returns how many rows were written.
pub async fn record(
    store: &dyn ListingStore,
    platform: Platform,
    sold: &[RawListing],
    now: DateTime<Utc>,
) -> Result<usize> {
    let records = extract_comparables(platform, sold, now);
    if records.is_empty() {
        debug!(%platform, "no sold comparables to record");
        return Ok(0);
    }
    let written = store.append_price_history(&records).await?;
    info!(%platform, written, "price history appended");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Condition;
    use chrono::TimeZone;

    #[test]
    fn comparables_skip_unpriced_and_default_sold_date() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let sold_at = Utc.with_ymd_and_hms(2026, 4, 20, 8, 0, 0).unwrap();
        let sold = vec![
            RawListing {
                title: Some("Nintendo Switch OLED like new".into()),
                price: Some(250.0),
                sold_at: Some(sold_at),
                ..Default::default()
            },
            RawListing {
                title: Some("Oak table".into()),
                price: None,
                ..Default::default()
            },
            RawListing {
                title: Some("Sofa".into()),
                price: Some(90.0),
                condition: Some("Acceptable".into()),
                ..Default::default()
            },
        ];
        let records = extract_comparables(Platform::Mercari, &sold, now);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, "electronics");
        assert_eq!(records[0].condition, Condition::LikeNew);
        assert_eq!(records[0].sold_at, sold_at);
        assert_eq!(records[1].category, "furniture");
        assert_eq!(records[1].condition, Condition::Fair);
        assert_eq!(records[1].sold_at, now);
        assert!(records.iter().all(|r| r.source_platform == Platform::Mercari));
    }
}
