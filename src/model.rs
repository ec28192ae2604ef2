use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Craigslist,
    Facebook,
    OfferUp,
    Ebay,
    Mercari,
    Poshmark,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Craigslist,
        Platform::Facebook,
        Platform::OfferUp,
        Platform::Ebay,
        Platform::Mercari,
        Platform::Poshmark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Craigslist => "CRAIGSLIST",
            Platform::Facebook => "FACEBOOK",
            Platform::OfferUp => "OFFERUP",
            Platform::Ebay => "EBAY",
            Platform::Mercari => "MERCARI",
            Platform::Poshmark => "POSHMARK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::parse(s).ok_or_else(|| PipelineError::Validation(format!("unknown platform '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::parse(s).ok_or_else(|| PipelineError::Validation(format!("invalid job status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::InProgress => "IN_PROGRESS",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueueStatus::Pending),
            "IN_PROGRESS" => Some(QueueStatus::InProgress),
            "COMPLETED" => Some(QueueStatus::Completed),
            "FAILED" => Some(QueueStatus::Failed),
            "CANCELLED" => Some(QueueStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueStatus::parse(s)
            .ok_or_else(|| PipelineError::Validation(format!("invalid queue status '{s}'")))
    }
}

/// Where a listing sits in the resale workflow. Scoring only ever yields
/// `New` or `Opportunity`; later states are set by the reseller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    New,
    Opportunity,
    Contacted,
    Purchased,
    Listed,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::New => "NEW",
            ListingStatus::Opportunity => "OPPORTUNITY",
            ListingStatus::Contacted => "CONTACTED",
            ListingStatus::Purchased => "PURCHASED",
            ListingStatus::Listed => "LISTED",
            ListingStatus::Sold => "SOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(ListingStatus::New),
            "OPPORTUNITY" => Some(ListingStatus::Opportunity),
            "CONTACTED" => Some(ListingStatus::Contacted),
            "PURCHASED" => Some(ListingStatus::Purchased),
            "LISTED" => Some(ListingStatus::Listed),
            "SOLD" => Some(ListingStatus::Sold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::LikeNew => "like_new",
            Condition::Excellent => "excellent",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
        }
    }

    /// Human-facing label used in tags and outreach text.
    pub fn label(&self) -> &'static str {
        match self {
            Condition::LikeNew => "like new",
            other => other.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "new" => Some(Condition::New),
            "like_new" => Some(Condition::LikeNew),
            "excellent" => Some(Condition::Excellent),
            "good" => Some(Condition::Good),
            "fair" => Some(Condition::Fair),
            "poor" => Some(Condition::Poor),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResaleDifficulty {
    Easy,
    Moderate,
    Hard,
}

impl ResaleDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResaleDifficulty::Easy => "easy",
            ResaleDifficulty::Moderate => "moderate",
            ResaleDifficulty::Hard => "hard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_is_case_insensitive() {
        assert_eq!(Platform::parse("ebay"), Some(Platform::Ebay));
        assert_eq!(Platform::parse(" OfferUp "), Some(Platform::OfferUp));
        assert!(Platform::parse("etsy").is_none());
        assert!(matches!("etsy".parse::<Platform>(), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for s in ["PENDING", "IN_PROGRESS", "COMPLETED", "FAILED", "CANCELLED"] {
            assert_eq!(QueueStatus::parse(s).unwrap().as_str(), s);
        }
        assert!("in_progress".parse::<QueueStatus>().is_err());
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn condition_labels() {
        assert_eq!(Condition::parse("like new"), Some(Condition::LikeNew));
        assert_eq!(Condition::parse("LIKE_NEW"), Some(Condition::LikeNew));
        assert_eq!(Condition::LikeNew.label(), "like new");
        assert_eq!(Condition::Fair.label(), "fair");
    }
}
