use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::adapters::classify::{self, FailureClass};
use crate::adapters::http;
use crate::db::ListingRow;
use crate::model::Platform;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PostFailure {
    /// Worth another attempt after backoff.
    #[error("{0}")]
    Retryable(String),
    /// The target rejected the listing; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl PostFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostFailure::Retryable(_))
    }
}

/// Re-lists one stored listing on a target marketplace and returns the URL
/// of the new posting.
#[async_trait]
pub trait CrossPoster: Send + Sync {
    async fn post(&self, listing: &ListingRow, target: Platform) -> Result<String, PostFailure>;
}

/// Posts through an HTTP relay that owns the marketplace sessions.
pub struct RelayPoster {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(alias = "posted_url")]
    url: String,
}

impl RelayPoster {
    pub fn new(endpoint: Url, token: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client("flip-scout/0.1")?,
            endpoint,
            token,
        })
    }

    pub fn build_request(&self, listing: &ListingRow, target: Platform) -> reqwest::Result<reqwest::Request> {
        let body = json!({
            "target_platform": target,
            "listing": listing,
        });
        let mut request = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.build()
    }
}

#[async_trait]
impl CrossPoster for RelayPoster {
    async fn post(&self, listing: &ListingRow, target: Platform) -> Result<String, PostFailure> {
        let request = self
            .build_request(listing, target)
            .map_err(|e| PostFailure::Rejected(format!("failed to build relay request: {e}")))?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| PostFailure::Retryable(format!("relay unreachable: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PostFailure::Retryable(format!("failed to read relay response: {e}")))?;

        match classify::classify_response(status, &body, true) {
            None => {}
            Some(FailureClass::Fatal) => {
                return Err(PostFailure::Rejected(format!("relay returned {status}: {body}")))
            }
            Some(_) => {
                return Err(PostFailure::Retryable(format!("relay returned {status}: {body}")))
            }
        }

        let parsed: RelayResponse = serde_json::from_str(&body)
            .map_err(|e| PostFailure::Retryable(format!("invalid relay response: {e}")))?;
        info!(listing_id = listing.id, %target, url = %parsed.url, "listing cross-posted");
        Ok(parsed.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::ListingStatus;

    fn listing() -> ListingRow {
        ListingRow {
            id: 7,
            platform: Platform::Craigslist,
            external_id: "7712".into(),
            title: "Oak desk".into(),
            description: "Solid".into(),
            asking_price: 80.0,
            condition: "good".into(),
            category: "furniture".into(),
            image_urls: vec![],
            url: None,
            tags: vec!["furniture".into()],
            estimated_value: 93.6,
            value_score: 40,
            status: ListingStatus::Purchased,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn request_carries_bearer_and_target() {
        let poster = RelayPoster::new(
            Url::parse("https://relay.example.test/post").unwrap(),
            Some("secret".into()),
        )
        .unwrap();
        let req = poster.build_request(&listing(), Platform::Ebay).unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.headers()["authorization"], "Bearer secret");
        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["target_platform"], "EBAY");
        assert_eq!(body["listing"]["title"], "Oak desk");
    }
}
