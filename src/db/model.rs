//! Row shapes returned by the repositories. Domain entities that own a state
//! machine (`ScraperJob`, `PostingQueueItem`) live next to their transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{ListingStatus, Platform};

/// Result of a listing upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredListing {
    pub id: i64,
    pub status: ListingStatus,
}

/// Persisted listing slice used by the posting queue and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRow {
    pub id: i64,
    pub platform: Platform,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub asking_price: f64,
    pub condition: String,
    pub category: String,
    pub image_urls: Vec<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub estimated_value: f64,
    pub value_score: i64,
    pub status: ListingStatus,
    pub updated_at: DateTime<Utc>,
}
