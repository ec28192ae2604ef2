//! flip-scout: finds underpriced secondhand listings, scores them for resale
//! profit and schedules cross-platform re-listing.

pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod identify;
pub mod jobs;
pub mod listing;
pub mod model;
pub mod pipeline;
pub mod poster;
pub mod price_history;
pub mod queue;
pub mod store;
pub mod valuation;

pub use error::{PipelineError, Result};
