//! Platform fetchers for CMS data APIs.
//!
//! Each public CMS data source speaks a different query and pagination
//! dialect. This crate normalizes them behind one [`PlatformFetcher`]
//! contract: given a dataset descriptor and a [`DatasetQuery`], return the
//! matching records plus a total-count hint when the platform provides one.
//!
//! Concrete fetchers:
//! - [`SodaClient`] - Socrata/SODA endpoints, `$limit`/`$offset` paging
//! - [`CmsDataApiClient`] - data.cms.gov data-api/v1, `size`/`offset` paging
//! - [`NpiClient`] - NPPES registry identity lookup, single capped request
//! - [`BulkClient`] - full CSV download, filtered locally after decode

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog::{Dataset, DatasetQuery, Platform};

mod bulk;
mod cms_api;
mod error;
mod http;
mod npi;
mod soda;

pub use bulk::BulkClient;
pub use cms_api::CmsDataApiClient;
pub use error::FetchError;
pub use http::RequestBudget;
pub use npi::{NpiClient, ProviderQuery};
pub use soda::SodaClient;

/// One row of fetched data: column name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Result of a platform fetch.
pub struct FetchOutcome {
    pub records: Vec<Record>,
    /// Total matching rows at the source, when the platform reports one.
    pub total_hint: Option<u64>,
}

/// Uniform fetch contract implemented by every platform client.
///
/// Implementations retry transient failures internally (bounded, with
/// exponential backoff) and respect an injected [`RequestBudget`]. Any
/// truncation of the result set is attributable to `query.limit` or to a
/// documented platform cap (the NPI registry returns at most 200 rows).
#[async_trait]
pub trait PlatformFetcher: Send + Sync {
    async fn fetch(
        &self,
        dataset: &Dataset,
        query: &DatasetQuery,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Settings shared by the standard fetcher set.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Optional Socrata application token (raises SODA rate limits).
    pub socrata_app_token: Option<String>,
    /// Directory where bulk CSV downloads land.
    pub download_dir: std::path::PathBuf,
    /// Minimum spacing between requests to any one platform.
    pub request_interval: Duration,
    /// Ceiling on rows fetched when the caller sets no limit.
    pub max_records: usize,
}

/// Dispatch table from a descriptor's platform tag to its fetcher.
pub struct FetcherSet {
    fetchers: HashMap<Platform, Arc<dyn PlatformFetcher>>,
}

impl FetcherSet {
    /// Build the standard set covering all four platforms.
    pub fn standard(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut set = Self::empty();
        set.insert(
            Platform::Soda,
            Arc::new(SodaClient::new(
                config.socrata_app_token.clone(),
                RequestBudget::new(config.request_interval),
                config.max_records,
            )?),
        );
        set.insert(
            Platform::CmsDataApi,
            Arc::new(CmsDataApiClient::new(
                RequestBudget::new(config.request_interval),
                config.max_records,
            )?),
        );
        set.insert(
            Platform::Npi,
            Arc::new(NpiClient::new(RequestBudget::new(config.request_interval))?),
        );
        set.insert(
            Platform::Bulk,
            Arc::new(BulkClient::new(
                config.download_dir.clone(),
                RequestBudget::new(config.request_interval),
            )?),
        );
        Ok(set)
    }

    pub fn empty() -> Self {
        Self {
            fetchers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, platform: Platform, fetcher: Arc<dyn PlatformFetcher>) {
        self.fetchers.insert(platform, fetcher);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformFetcher>> {
        self.fetchers.get(&platform).cloned()
    }
}
