//! End-to-end behavior of the cache-and-query layer with a scripted
//! platform fetcher standing in for the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog::{Column, DataDomain, Dataset, DatasetCatalog, DatasetQuery, Platform};
use platforms::{FetchError, FetchOutcome, FetcherSet, PlatformFetcher, Record};
use serde_json::json;
use warehouse::{CacheAction, Config, Warehouse, WarehouseError};

/// Scripted fetcher: serves a fixed record set, counts invocations, and
/// starts failing after `fail_after` successful calls.
struct ScriptedFetcher {
    rows: Vec<Record>,
    calls: AtomicUsize,
    fail_after: usize,
}

impl ScriptedFetcher {
    fn new(rows: Vec<Record>) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
            fail_after: usize::MAX,
        }
    }

    fn failing_after(rows: Vec<Record>, fail_after: usize) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
            fail_after,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        _dataset: &Dataset,
        query: &DatasetQuery,
    ) -> Result<FetchOutcome, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent resolvers time to pile up on the gate.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if n >= self.fail_after {
            return Err(FetchError::InvalidRequest("scripted failure".to_string()));
        }
        let mut records: Vec<Record> = self
            .rows
            .iter()
            .filter(|r| {
                query.filters.iter().all(|(k, v)| {
                    r.get(k).and_then(|x| x.as_str()) == Some(v.as_str())
                })
            })
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        let total = records.len() as u64;
        Ok(FetchOutcome {
            records,
            total_hint: Some(total),
        })
    }
}

fn record(pairs: &[(&str, &str)]) -> Record {
    let mut r = Record::new();
    for (k, v) in pairs {
        r.insert((*k).to_string(), json!(v));
    }
    r
}

fn hospital_rows() -> Vec<Record> {
    vec![
        record(&[("facility_id", "050739"), ("facility_name", "CEDARS-SINAI MEDICAL CENTER"), ("state", "CA")]),
        record(&[("facility_id", "050441"), ("facility_name", "UCSF MEDICAL CENTER"), ("state", "CA")]),
        record(&[("facility_id", "050425"), ("facility_name", "STANFORD HEALTH CARE"), ("state", "CA")]),
        record(&[("facility_id", "330101"), ("facility_name", "NEW YORK-PRESBYTERIAN"), ("state", "NY")]),
    ]
}

fn hospital_dataset() -> Dataset {
    Dataset {
        id: "xubh-q36u".to_string(),
        title: "Hospital General Information".to_string(),
        description: "General information on all registered hospitals".to_string(),
        domain: "data.medicare.gov".to_string(),
        platform: Platform::Soda,
        data_domain: DataDomain::HospitalCompare,
        api_endpoint: "https://data.medicare.gov/resource/xubh-q36u.json".to_string(),
        columns: vec![
            Column {
                name: "facility_id".to_string(),
                description: String::new(),
                data_type: "text".to_string(),
                example: "050739".to_string(),
            },
            Column {
                name: "state".to_string(),
                description: String::new(),
                data_type: "text".to_string(),
                example: "CA".to_string(),
            },
        ],
        keywords: vec!["hospital".to_string()],
        modified: String::new(),
        temporal: String::new(),
        record_count: None,
        join_keys: vec!["facility_id".to_string()],
        notes: String::new(),
    }
}

fn scripted_warehouse(
    cache_dir: &std::path::Path,
    ttl_secs: u64,
    fetcher: Arc<ScriptedFetcher>,
) -> Warehouse {
    let catalog = Arc::new(DatasetCatalog::from_datasets(vec![hospital_dataset()]));
    let mut fetchers = FetcherSet::empty();
    fetchers.insert(Platform::Soda, fetcher);
    let config = Config {
        cache_dir: cache_dir.to_path_buf(),
        cache_ttl_secs: ttl_secs,
        ..Config::default()
    };
    Warehouse::with_parts(config, catalog, Arc::new(fetchers)).expect("warehouse")
}

const WEEK_SECS: u64 = 86_400 * 7;

#[tokio::test]
async fn concurrent_identical_queries_fetch_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = Arc::new(scripted_warehouse(dir.path(), WEEK_SECS, fetcher.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let wh = warehouse.clone();
        handles.push(tokio::spawn(async move {
            let query = DatasetQuery::new().with_filter("state", "CA");
            wh.query_dataset("xubh-q36u", &query).await
        }));
    }
    for handle in handles {
        let resolved = handle.await.expect("join").expect("resolve");
        assert_eq!(resolved.row_count, 3);
        assert!(!resolved.stale);
    }
    assert_eq!(fetcher.calls(), 1, "one fetch shared by all waiters");
}

#[tokio::test]
async fn concurrent_empty_queries_share_one_fetch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = Arc::new(scripted_warehouse(dir.path(), WEEK_SECS, fetcher.clone()));

    // Zero-row results are never persisted, so waiters must get the
    // winner's outcome from the gate rather than falling through to
    // their own fetch.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let wh = warehouse.clone();
        handles.push(tokio::spawn(async move {
            let query = DatasetQuery::new().with_filter("state", "ZZ");
            wh.query_dataset("xubh-q36u", &query).await
        }));
    }
    for handle in handles {
        let resolved = handle.await.expect("join").expect("resolve");
        assert_eq!(resolved.row_count, 0);
        assert!(!resolved.stale);
    }
    assert_eq!(fetcher.calls(), 1, "one fetch shared by all waiters");
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher.clone());
    let query = DatasetQuery::new().with_filter("state", "CA");

    let first = warehouse.query_dataset("xubh-q36u", &query).await.expect("first");
    assert!(!first.from_cache);
    assert_eq!(first.columns, vec!["facility_id", "facility_name", "state"]);

    let second = warehouse.query_dataset("xubh-q36u", &query).await.expect("second");
    assert!(second.from_cache);
    assert_eq!(second.records, first.records);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn expired_cache_fails_open_when_refetch_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Succeed exactly once, then fail; TTL zero expires entries at once.
    let fetcher = Arc::new(ScriptedFetcher::failing_after(hospital_rows(), 1));
    let warehouse = scripted_warehouse(dir.path(), 0, fetcher.clone());
    let query = DatasetQuery::new().with_filter("state", "CA");

    let first = warehouse.query_dataset("xubh-q36u", &query).await.expect("first");
    assert!(!first.stale);
    assert_eq!(first.row_count, 3);

    let second = warehouse.query_dataset("xubh-q36u", &query).await.expect("second");
    assert!(second.stale, "expired data served on fetch failure");
    assert!(second.from_cache);
    assert_eq!(second.row_count, 3);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn fetch_failure_without_cache_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::failing_after(hospital_rows(), 0));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher);
    let query = DatasetQuery::new().with_filter("state", "CA");

    let err = warehouse
        .query_dataset("xubh-q36u", &query)
        .await
        .expect_err("no cache to fall back on");
    assert!(matches!(err, WarehouseError::Fetch { .. }));
}

#[tokio::test]
async fn clearing_a_dataset_forces_a_refetch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher.clone());
    let query = DatasetQuery::new().with_filter("state", "CA");

    warehouse.query_dataset("xubh-q36u", &query).await.expect("first");
    warehouse.query_dataset("xubh-q36u", &query).await.expect("cached");
    assert_eq!(fetcher.calls(), 1);

    let summary = warehouse
        .manage_cache(CacheAction::ClearDataset("xubh-q36u".to_string()))
        .expect("clear");
    assert_eq!(summary.removed, Some(1));
    assert_eq!(summary.stats.total_entries, 0);

    let again = warehouse.query_dataset("xubh-q36u", &query).await.expect("refetch");
    assert!(!again.from_cache);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn loaded_dataset_answers_sql() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher);
    let query = DatasetQuery::new().with_filter("state", "CA");

    let table = warehouse
        .load_dataset("xubh-q36u", &query, Some("hospitals"))
        .await
        .expect("load");
    assert_eq!(table.alias, "hospitals");
    assert_eq!(table.row_count, 3);

    let result = warehouse
        .run_sql("SELECT COUNT(*) AS n FROM hospitals")
        .expect("sql");
    assert_eq!(result.rows, vec![vec!["3".to_string()]]);

    let loaded = warehouse.list_loaded_tables();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].alias, "hospitals");
}

#[tokio::test]
async fn load_defaults_alias_to_title_slug() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher);

    let table = warehouse
        .load_dataset("xubh-q36u", &DatasetQuery::new(), None)
        .await
        .expect("load");
    assert_eq!(table.alias, "hospital_general_information");
    assert_eq!(table.row_count, 4);
}

#[tokio::test]
async fn empty_results_do_not_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher);
    let query = DatasetQuery::new().with_filter("state", "ZZ");

    let resolved = warehouse.query_dataset("xubh-q36u", &query).await.expect("query");
    assert_eq!(resolved.row_count, 0);

    let err = warehouse
        .load_dataset("xubh-q36u", &query, Some("empty"))
        .await
        .expect_err("nothing to load");
    assert!(matches!(err, WarehouseError::EmptyLoad { .. }));
    assert!(warehouse.list_loaded_tables().is_empty());
}

#[tokio::test]
async fn unknown_dataset_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(ScriptedFetcher::new(hospital_rows()));
    let warehouse = scripted_warehouse(dir.path(), WEEK_SECS, fetcher);

    let err = warehouse
        .query_dataset("no-such-id", &DatasetQuery::new())
        .await
        .expect_err("unknown dataset");
    assert!(matches!(err, WarehouseError::UnknownDataset { .. }));
}
