//! Dataset registry for public CMS healthcare data.
//!
//! Holds descriptors for every dataset the warehouse knows how to fetch:
//! which API platform serves it, its endpoint, its columns, and which
//! columns can be used to join it against other datasets. The registry is
//! read-only at runtime; it is seeded from an embedded JSON catalog.

use thiserror::Error;

mod models;
mod query;
mod registry;

pub use models::{Column, DataDomain, Dataset, Platform};
pub use query::DatasetQuery;
pub use registry::DatasetCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
