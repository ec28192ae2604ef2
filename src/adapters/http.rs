use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adapters::classify::{self, FailureClass};
use crate::error::{PipelineError, Result};
use crate::model::Platform;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub fn build_client(user_agent: &str) -> anyhow::Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Body and metadata of one GET, already checked by the classifier.
#[derive(Debug)]
pub struct Fetched {
    pub url: Url,
    pub body: String,
}

/// GET `url`, classify transport and response failures, and return the body.
pub async fn fetch_checked(
    http: &Client,
    platform: Platform,
    url: Url,
    bearer: Option<&str>,
    expects_json: bool,
) -> Result<Fetched> {
    let mut request = http.get(url.clone());
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    if expects_json {
        request = request.header("Accept", "application/json");
    }

    debug!(%platform, url = %url, "adapter request");
    let response = request.send().await.map_err(|err| {
        let class = classify::classify_transport(&err);
        classify::into_error(
            class,
            platform,
            format!("request failed: {err}"),
            crate::error::DEFAULT_RETRY_AFTER_SECS,
        )
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(|err| {
        classify::into_error(
            FailureClass::Transient,
            platform,
            format!("failed to read response body: {err}"),
            crate::error::DEFAULT_RETRY_AFTER_SECS,
        )
    })?;

    classify::check_response(platform, status, &headers, &body, expects_json)?;
    Ok(Fetched { url, body })
}

/// GET a vendor JSON endpoint and decode it. A body that is JSON but not the
/// expected shape is fatal.
pub async fn get_json<T: DeserializeOwned>(
    http: &Client,
    platform: Platform,
    url: Url,
    bearer: Option<&str>,
) -> Result<T> {
    let fetched = fetch_checked(http, platform, url, bearer, true).await?;
    serde_json::from_str(&fetched.body).map_err(|err| PipelineError::FatalAdapter {
        platform,
        message: format!("unexpected response shape: {err}"),
    })
}

/// Join `path` onto a configured base URL and append query pairs.
pub fn endpoint(base: &Url, path: &str, query: &[(&str, String)]) -> Result<Url> {
    let mut url = base.join(path).map_err(|err| {
        PipelineError::Configuration(format!("invalid base URL {base}: {err}"))
    })?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_and_encodes() {
        let base = Url::parse("https://api.example.test/").unwrap();
        let url = endpoint(
            &base,
            "v2/search",
            &[("keyword", "nintendo switch".into()), ("status", "on_sale".into())],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/v2/search?keyword=nintendo+switch&status=on_sale"
        );
    }
}
