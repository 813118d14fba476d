use std::collections::HashMap;
use std::sync::Arc;

use cachestore::{CacheEntry, CacheStore};
use catalog::{DatasetCatalog, DatasetQuery};
use chrono::Utc;
use diagnostics::emit;
use diagnostics::{log_debug, log_info, log_warn};
use platforms::FetcherSet;
use serde::Serialize;

use crate::WarehouseError;

/// One row of resolved data.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Outcome of a resolve: the rows plus enough metadata for callers to
/// see the cache status explicitly rather than infer it.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    pub records: Vec<Record>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub fingerprint: String,
    pub from_cache: bool,
    /// True when a fetch failed and the last good (expired) data was
    /// served instead.
    pub stale: bool,
}

/// Per-fingerprint gate: serializes fetches and carries the winner's
/// outcome to every waiter queued behind it, so results that were never
/// persisted (empty sets) are still shared instead of re-fetched.
struct FetchGate {
    slot: tokio::sync::Mutex<Option<Resolved>>,
}

impl FetchGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: tokio::sync::Mutex::new(None),
        })
    }
}

/// Decides cache-hit vs. re-fetch and drives the platform fetchers.
///
/// Safe under concurrent invocation: the per-fingerprint gate map
/// guarantees at most one in-flight fetch per fingerprint per process.
/// Later requesters wait on the gate and read the first fetch's outcome
/// from it directly; the gate stays in the map until its last holder is
/// done, so a new arrival can never race a still-running fetch.
pub struct FetchOrchestrator {
    catalog: Arc<DatasetCatalog>,
    store: Arc<CacheStore>,
    fetchers: Arc<FetcherSet>,
    inflight: tokio::sync::Mutex<HashMap<String, Arc<FetchGate>>>,
}

impl FetchOrchestrator {
    pub fn new(
        catalog: Arc<DatasetCatalog>,
        store: Arc<CacheStore>,
        fetchers: Arc<FetcherSet>,
    ) -> Self {
        Self {
            catalog,
            store,
            fetchers,
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a query against the cache, fetching from the platform on
    /// a miss. Returns the same record shape either way.
    pub async fn resolve(
        &self,
        dataset_id: &str,
        query: &DatasetQuery,
    ) -> Result<Resolved, WarehouseError> {
        let dataset = self
            .catalog
            .get(dataset_id)
            .ok_or_else(|| WarehouseError::UnknownDataset {
                id: dataset_id.to_string(),
            })?
            .clone();
        let fingerprint = cachestore::fingerprint(dataset_id, query);

        if let Some(entry) = self.fresh_entry(&fingerprint) {
            log_info!("Cache hit for {dataset_id}", dataset_id: dataset_id);
            return self.serve_entry(&entry, &fingerprint, false);
        }

        // Serialize fetches per fingerprint. Whoever wins the gate does
        // the remote work and leaves the outcome in the gate's slot;
        // everyone queued behind it reads that outcome.
        let gate = {
            let mut map = self.inflight.lock().await;
            map.entry(fingerprint.clone())
                .or_insert_with(FetchGate::new)
                .clone()
        };
        let result = {
            let mut slot = gate.slot.lock().await;
            match slot.as_ref() {
                Some(shared) => {
                    log_debug!("Sharing in-flight result for {dataset_id}", dataset_id: dataset_id);
                    Ok(shared.clone())
                }
                None => {
                    let result = self
                        .resolve_gated(&dataset, dataset_id, query, &fingerprint)
                        .await;
                    if let Ok(resolved) = &result {
                        *slot = Some(resolved.clone());
                    }
                    result
                }
            }
        };
        // Drop the map entry only when no other task still holds this
        // gate; otherwise a new arrival could start a second fetch while
        // one is in flight under the old gate.
        let mut map = self.inflight.lock().await;
        if let Some(entry) = map.get(&fingerprint) {
            if Arc::ptr_eq(entry, &gate) && Arc::strong_count(entry) <= 2 {
                map.remove(&fingerprint);
            }
        }
        result
    }

    async fn resolve_gated(
        &self,
        dataset: &catalog::Dataset,
        dataset_id: &str,
        query: &DatasetQuery,
        fingerprint: &str,
    ) -> Result<Resolved, WarehouseError> {
        // Double-check: an earlier gate holder may have filled the cache
        // while this request waited.
        if let Some(entry) = self.fresh_entry(fingerprint) {
            log_debug!("Cache filled while waiting for {dataset_id}", dataset_id: dataset_id);
            return self.serve_entry(&entry, fingerprint, false);
        }

        let fetcher = self.fetchers.get(dataset.platform).ok_or_else(|| {
            WarehouseError::MissingFetcher {
                platform: dataset.platform.as_str().to_string(),
            }
        })?;

        match fetcher.fetch(dataset, query).await {
            Ok(outcome) => {
                let mut records = outcome.records;
                if let Some(limit) = query.limit {
                    records.truncate(limit);
                }
                if records.is_empty() {
                    // A legitimate empty result; nothing worth persisting.
                    return Ok(Resolved {
                        records,
                        columns: query.columns.clone(),
                        row_count: 0,
                        fingerprint: fingerprint.to_string(),
                        from_cache: false,
                        stale: false,
                    });
                }
                self.store.put(fingerprint, dataset_id, &records)?;
                let columns = column_order(&records);
                Ok(Resolved {
                    row_count: records.len(),
                    columns,
                    records,
                    fingerprint: fingerprint.to_string(),
                    from_cache: false,
                    stale: false,
                })
            }
            Err(err) => {
                // Fail open: the last good data beats no data, as long
                // as the caller can see it is stale.
                if let Some(entry) = self.store.lookup(fingerprint) {
                    let reason = err.to_string();
                    log_warn!("Fetch failed for {dataset_id}, serving stale cache: {reason}", dataset_id: dataset_id, reason: reason);
                    return self.serve_entry(&entry, fingerprint, true);
                }
                Err(WarehouseError::Fetch {
                    dataset_id: dataset_id.to_string(),
                    fingerprint: fingerprint.to_string(),
                    source: err,
                })
            }
        }
    }

    fn fresh_entry(&self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = self.store.lookup(fingerprint)?;
        entry.is_fresh(Utc::now().timestamp()).then_some(entry)
    }

    fn serve_entry(
        &self,
        entry: &CacheEntry,
        fingerprint: &str,
        stale: bool,
    ) -> Result<Resolved, WarehouseError> {
        let (columns, records) = self.store.read(entry)?;
        Ok(Resolved {
            row_count: records.len(),
            records,
            columns,
            fingerprint: fingerprint.to_string(),
            from_cache: true,
            stale,
        })
    }
}

/// Union of record keys in first-appearance order.
pub(crate) fn column_order(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
