use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::listing::NormalizedListing;
use crate::model::Condition;

/// Output of an external item identifier (for example a vision model run
/// against the listing photos).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub condition: Option<Condition>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Optional identification step. `Ok(None)` means the identifier had
/// nothing to say; errors are logged by the caller and the listing is
/// scored from its text alone.
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, listing: &NormalizedListing) -> Result<Option<Identification>>;
}
