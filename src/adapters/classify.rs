//! Maps raw adapter failures onto the three failure classes the pipeline
//! acts on. Everything here is pure and synchronous.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::error::{PipelineError, DEFAULT_RETRY_AFTER_SECS};
use crate::model::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    Transient,
    Fatal,
}

const RATE_LIMIT_VOCABULARY: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "captcha",
    "unusual traffic",
    "are you a robot",
    "access denied",
    "blocked",
    "temporarily restricted",
];

fn mentions_any(text: &str, vocabulary: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    vocabulary.iter().any(|w| lowered.contains(w))
}

/// True when a body that should be JSON is actually markup. Only the first
/// non-blank character counts, so JSON strings holding HTML stay usable.
pub fn looks_like_html(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

/// Classify one HTTP response. `None` means the response is usable.
pub fn classify_response(status: StatusCode, body: &str, expects_json: bool) -> Option<FailureClass> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FailureClass::RateLimited);
    }
    if status.is_server_error() {
        return Some(FailureClass::Transient);
    }
    if status.is_client_error() {
        if mentions_any(body, RATE_LIMIT_VOCABULARY) {
            return Some(FailureClass::RateLimited);
        }
        return Some(FailureClass::Fatal);
    }
    if !status.is_success() {
        return Some(FailureClass::Fatal);
    }
    if expects_json {
        if looks_like_html(body) {
            return Some(FailureClass::RateLimited);
        }
    } else if mentions_any(body, &["captcha", "unusual traffic", "are you a robot"]) {
        return Some(FailureClass::RateLimited);
    }
    None
}

pub fn classify_transport(err: &reqwest::Error) -> FailureClass {
    if err.is_builder() {
        return FailureClass::Fatal;
    }
    if let Some(status) = err.status() {
        return classify_response(status, "", false).unwrap_or(FailureClass::Fatal);
    }
    // connect, timeout, body and redirect errors
    FailureClass::Transient
}

/// Seconds from a `Retry-After` header, or the default when absent or not
/// a plain number.
pub fn retry_after(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

pub fn into_error(
    class: FailureClass,
    platform: Platform,
    message: impl Into<String>,
    retry_after_secs: u64,
) -> PipelineError {
    let message = message.into();
    match class {
        FailureClass::RateLimited => PipelineError::RateLimited {
            platform,
            message,
            retry_after_secs,
        },
        FailureClass::Transient => PipelineError::Transient { platform, message },
        FailureClass::Fatal => PipelineError::FatalAdapter { platform, message },
    }
}

/// Turn an unusable response into the matching `PipelineError`.
pub fn check_response(
    platform: Platform,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    expects_json: bool,
) -> Result<(), PipelineError> {
    let Some(class) = classify_response(status, body, expects_json) else {
        return Ok(());
    };
    let message = match class {
        FailureClass::RateLimited if status.is_success() && expects_json => {
            "HTML returned where JSON was expected; likely blocked or rate limited".to_string()
        }
        FailureClass::RateLimited if status.is_success() => {
            "challenge page returned; likely blocked or rate limited".to_string()
        }
        _ => format!("HTTP {}: {}", status.as_u16(), snippet(body)),
    };
    Err(into_error(class, platform, message, retry_after(headers)))
}

fn snippet(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 160 {
        let cut: String = flat.chars().take(160).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
