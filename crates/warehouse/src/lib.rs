//! Federated cache-and-query layer over the CMS data platforms.
//!
//! The [`Warehouse`] facade wires the dataset catalog, the platform
//! fetchers, the Parquet cache store and the DuckDB engine together.
//! Callers discover datasets, pull query results through the cache, load
//! cached results as SQL tables and join across them, all through this
//! one type.

use std::sync::Arc;

use cachestore::{CacheError, CacheStats, CacheStore};
use catalog::{CatalogError, Dataset, DatasetCatalog, DatasetQuery};
use diagnostics::emit;
use diagnostics::log_info;
use platforms::{
    FetchError, FetchOutcome, FetcherConfig, FetcherSet, NpiClient, ProviderQuery, RequestBudget,
};
use serde::Serialize;
use thiserror::Error;

mod config;
mod engine;
mod orchestrator;

pub use config::Config;
pub use engine::{LoadedTable, QueryEngine, QueryError, QueryResult};
pub use orchestrator::{FetchOrchestrator, Record, Resolved};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("unknown dataset '{id}'")]
    UnknownDataset { id: String },

    #[error("no fetcher registered for platform '{platform}'")]
    MissingFetcher { platform: String },

    #[error("fetch failed for dataset '{dataset_id}' (fingerprint {fingerprint})")]
    Fetch {
        dataset_id: String,
        fingerprint: String,
        #[source]
        source: FetchError,
    },

    #[error("dataset '{id}' returned no rows; nothing to load")]
    EmptyLoad { id: String },

    #[error("cached file for fingerprint {fingerprint} is missing")]
    MissingCacheFile { fingerprint: String },

    #[error("provider lookup failed")]
    Provider(#[source] FetchError),

    #[error("failed to initialize platform clients")]
    Init(#[source] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// A dataset descriptor plus the datasets it can join with and on what.
#[derive(Debug, Serialize)]
pub struct DatasetDescription {
    pub dataset: Dataset,
    pub joinable: Vec<JoinCandidate>,
}

#[derive(Debug, Serialize)]
pub struct JoinCandidate {
    pub dataset_id: String,
    pub title: String,
    pub join_column: String,
}

/// Cache maintenance requests.
#[derive(Debug, Clone)]
pub enum CacheAction {
    /// Summary counters only.
    Inspect,
    /// Every entry, newest first.
    List,
    /// Drop all entries for one dataset.
    ClearDataset(String),
    /// Drop everything.
    ClearAll,
}

/// Outcome of a [`CacheAction`].
#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub stats: CacheStats,
    /// Present for [`CacheAction::List`].
    pub entries: Option<Vec<cachestore::CacheEntry>>,
    /// Present for the clear actions.
    pub removed: Option<usize>,
}

/// The federated data layer.
pub struct Warehouse {
    config: Config,
    catalog: Arc<DatasetCatalog>,
    store: Arc<CacheStore>,
    orchestrator: FetchOrchestrator,
    engine: QueryEngine,
    npi: NpiClient,
}

impl Warehouse {
    /// Open a warehouse with the built-in catalog and the standard
    /// platform fetchers.
    pub fn open(config: Config) -> Result<Self, WarehouseError> {
        let catalog = Arc::new(DatasetCatalog::from_seed()?);
        let fetchers = FetcherSet::standard(&FetcherConfig {
            socrata_app_token: config.socrata_app_token.clone(),
            download_dir: config.download_dir(),
            request_interval: config.request_interval,
            max_records: config.max_records,
        })
        .map_err(WarehouseError::Init)?;
        Self::with_parts(config, catalog, Arc::new(fetchers))
    }

    /// Assemble a warehouse from explicit parts. The entry point for
    /// tests that substitute the catalog or the fetchers.
    pub fn with_parts(
        config: Config,
        catalog: Arc<DatasetCatalog>,
        fetchers: Arc<FetcherSet>,
    ) -> Result<Self, WarehouseError> {
        let store = Arc::new(CacheStore::open(&config.cache_dir, config.cache_ttl_secs)?);
        let orchestrator =
            FetchOrchestrator::new(catalog.clone(), store.clone(), fetchers);
        let engine = QueryEngine::new()?;
        let npi = NpiClient::new(RequestBudget::new(config.request_interval))
            .map_err(WarehouseError::Init)?;

        let cache_dir = config.cache_dir.display().to_string();
        log_info!("Warehouse open with cache at {cache_dir}", cache_dir: cache_dir);
        Ok(Self {
            config,
            catalog,
            store,
            orchestrator,
            engine,
            npi,
        })
    }

    /// Keyword search over the catalog.
    pub fn search_datasets(
        &self,
        query: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Vec<Dataset> {
        self.catalog
            .search(query, domain.unwrap_or(""), limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Full descriptor for one dataset, plus its join candidates.
    pub fn describe_dataset(&self, dataset_id: &str) -> Result<DatasetDescription, WarehouseError> {
        let dataset = self
            .catalog
            .get(dataset_id)
            .ok_or_else(|| WarehouseError::UnknownDataset {
                id: dataset_id.to_string(),
            })?
            .clone();
        let joinable = self
            .catalog
            .joinable(dataset_id)
            .into_iter()
            .map(|(other, column)| JoinCandidate {
                dataset_id: other.id.clone(),
                title: other.title.clone(),
                join_column: column,
            })
            .collect();
        Ok(DatasetDescription { dataset, joinable })
    }

    /// Query a dataset through the cache. A query without a limit gets
    /// the configured default so an unscoped call cannot pull an entire
    /// multi-million-row feed by accident.
    pub async fn query_dataset(
        &self,
        dataset_id: &str,
        query: &DatasetQuery,
    ) -> Result<Resolved, WarehouseError> {
        let query = self.bounded(query, self.config.default_limit);
        self.orchestrator.resolve(dataset_id, &query).await
    }

    /// Resolve a dataset query and register the cached Parquet as a SQL
    /// table. The alias defaults to a slug of the dataset title.
    pub async fn load_dataset(
        &self,
        dataset_id: &str,
        query: &DatasetQuery,
        alias: Option<&str>,
    ) -> Result<LoadedTable, WarehouseError> {
        let query = self.bounded(query, self.config.max_records);
        let resolved = self.orchestrator.resolve(dataset_id, &query).await?;
        if resolved.row_count == 0 {
            return Err(WarehouseError::EmptyLoad {
                id: dataset_id.to_string(),
            });
        }
        let entry = self.store.lookup(&resolved.fingerprint).ok_or_else(|| {
            WarehouseError::MissingCacheFile {
                fingerprint: resolved.fingerprint.clone(),
            }
        })?;

        let default_alias;
        let alias = match alias {
            Some(a) => a,
            None => {
                // Catalog presence was already established by resolve.
                default_alias = self
                    .catalog
                    .get(dataset_id)
                    .map(|d| d.slug())
                    .unwrap_or_else(|| dataset_id.replace(['-', '.'], "_"));
                &default_alias
            }
        };
        Ok(self.engine.register_parquet(alias, &entry.path)?)
    }

    /// Run SQL across every loaded table.
    pub fn run_sql(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        Ok(self.engine.run_sql(sql)?)
    }

    pub fn list_loaded_tables(&self) -> Vec<LoadedTable> {
        self.engine.list_tables()
    }

    /// Drop a loaded table. Returns false if the alias was not loaded.
    pub fn unload_table(&self, alias: &str) -> Result<bool, WarehouseError> {
        Ok(self.engine.unregister(alias)?)
    }

    /// Column types and a few sample rows from a loaded table.
    pub fn describe_table(&self, alias: &str) -> Result<QueryResult, WarehouseError> {
        Ok(self.engine.describe(alias)?)
    }

    pub fn sample_table(&self, alias: &str, n: usize) -> Result<QueryResult, WarehouseError> {
        Ok(self.engine.sample(alias, n)?)
    }

    /// Identity lookup against the live NPPES registry. Registry data
    /// changes daily, so these results are never cached.
    pub async fn lookup_provider(
        &self,
        query: &ProviderQuery,
    ) -> Result<FetchOutcome, WarehouseError> {
        self.npi.search(query).await.map_err(WarehouseError::Provider)
    }

    /// Inspect or clear the cache.
    pub fn manage_cache(&self, action: CacheAction) -> Result<CacheSummary, WarehouseError> {
        let (entries, removed) = match action {
            CacheAction::Inspect => (None, None),
            CacheAction::List => {
                let mut entries = self.store.list_entries();
                entries.sort_by_key(|e| std::cmp::Reverse(e.fetched_at));
                (Some(entries), None)
            }
            CacheAction::ClearDataset(dataset_id) => {
                let removed = self.store.invalidate_dataset(&dataset_id)?;
                (None, Some(removed))
            }
            CacheAction::ClearAll => (None, Some(self.store.invalidate_all()?)),
        };
        Ok(CacheSummary {
            stats: self.store.stats(),
            entries,
            removed,
        })
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn bounded(&self, query: &DatasetQuery, cap: usize) -> DatasetQuery {
        let mut query = query.clone();
        if query.limit.is_none() {
            query.limit = Some(cap);
        }
        query
    }
}
