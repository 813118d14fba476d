//! Fingerprinted Parquet cache for fetched dataset rows.
//!
//! Every distinct (dataset, query) pair maps to a deterministic SHA-256
//! fingerprint; each fingerprint owns at most one Parquet file under the
//! cache root plus an entry in `cache_index.json`. The directory is the
//! source of truth: when the index file is missing or corrupt the index is
//! rebuilt from the Parquet footers, which carry the dataset id and
//! fingerprint as key-value metadata.
//!
//! The store is the only component that writes to the cache directory.
//! Replacement is atomic (write to a temp sibling, then rename), so a
//! reader never observes a partially written file, and a stale file stays
//! servable until a successful re-fetch replaces it.

use thiserror::Error;

mod fingerprint;
mod store;

pub use fingerprint::fingerprint;
pub use store::{CacheEntry, CacheStats, CacheStore};

/// One row of cached data: column name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("cache index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("refusing to cache an empty record set")]
    EmptyRecordSet,
}
