//! Database module: row models and SQL repositories.
//!
//! - `model`: row slices returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `flip_scout::db`; the repository API is re-exported
//! here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{ListingRow, StoredListing};
