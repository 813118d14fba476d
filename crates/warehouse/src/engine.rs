use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use diagnostics::emit;
use diagnostics::{log_debug, log_info};
use duckdb::arrow::array::{Array, StringArray};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::Connection;
use serde::Serialize;
use thiserror::Error;

/// Diagnostics from the analytic engine, classified so callers can tell
/// a typo from a missing table from a genuine execution failure. None of
/// these crash the process.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no table loaded under alias '{name}'")]
    NoSuchTable { name: String },

    #[error("SQL syntax error: {message}")]
    Syntax { message: String },

    #[error("SQL execution error: {message}")]
    Execution { message: String },

    #[error("no tables loaded; load a dataset before running SQL")]
    NoTablesLoaded,

    #[error("invalid table alias '{alias}'")]
    InvalidAlias { alias: String },
}

/// Metadata for one registered table.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedTable {
    pub alias: String,
    pub source: PathBuf,
    pub row_count: usize,
    pub columns: Vec<String>,
}

/// Tabular result of an analytic statement. Values are rendered to text;
/// nulls become empty strings.
#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// DuckDB-backed federation engine.
///
/// Cached Parquet files register as views under caller-chosen aliases;
/// SQL then runs across every registered view, joins included. The
/// engine only ever reads the cache files - their lifecycle belongs to
/// the store - and registrations live no longer than this process.
pub struct QueryEngine {
    conn: Mutex<Connection>,
    tables: Mutex<BTreeMap<String, LoadedTable>>,
}

impl QueryEngine {
    pub fn new() -> Result<Self, QueryError> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: Mutex::new(BTreeMap::new()),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn table_index(&self) -> MutexGuard<'_, BTreeMap<String, LoadedTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a Parquet file as a view under `alias`, replacing any
    /// prior registration of that alias.
    pub fn register_parquet(&self, alias: &str, path: &Path) -> Result<LoadedTable, QueryError> {
        if !valid_alias(alias) {
            return Err(QueryError::InvalidAlias {
                alias: alias.to_string(),
            });
        }
        let escaped = path.display().to_string().replace('\'', "''");
        let ddl = format!(
            "CREATE OR REPLACE VIEW \"{alias}\" AS SELECT * FROM read_parquet('{escaped}')"
        );
        {
            let conn = self.conn();
            conn.execute_batch(&ddl).map_err(classify)?;
        }

        let row_count = self.scalar_count(&format!("SELECT COUNT(*) FROM \"{alias}\""))?;
        let columns = self.view_columns(alias)?;
        let table = LoadedTable {
            alias: alias.to_string(),
            source: path.to_path_buf(),
            row_count,
            columns,
        };
        self.table_index().insert(alias.to_string(), table.clone());

        let rows = table.row_count;
        let source = path.display().to_string();
        log_info!("Registered table '{alias}' ({rows} rows) from {source}", alias: alias, rows: rows, source: source);
        Ok(table)
    }

    /// Drop a registration. Unknown aliases are not an error.
    pub fn unregister(&self, alias: &str) -> Result<bool, QueryError> {
        if !valid_alias(alias) {
            return Err(QueryError::InvalidAlias {
                alias: alias.to_string(),
            });
        }
        let existed = self.table_index().remove(alias).is_some();
        if existed {
            let conn = self.conn();
            conn.execute_batch(&format!("DROP VIEW IF EXISTS \"{alias}\""))
                .map_err(classify)?;
        }
        Ok(existed)
    }

    /// Execute a read-only analytic statement against the loaded tables.
    pub fn run_sql(&self, sql: &str) -> Result<QueryResult, QueryError> {
        if self.table_index().is_empty() {
            return Err(QueryError::NoTablesLoaded);
        }
        log_debug!("Executing SQL: {sql}", sql: sql);
        self.run_sql_unchecked(sql)
    }

    fn run_sql_unchecked(&self, sql: &str) -> Result<QueryResult, QueryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let arrow = stmt.query_arrow([]).map_err(classify)?;
        let schema = arrow.get_schema();
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        let options = FormatOptions::default().with_null("");
        let mut rows = Vec::new();
        for batch in arrow {
            let batch: RecordBatch = batch;
            let formatters: Vec<ArrayFormatter<'_>> = batch
                .columns()
                .iter()
                .map(|c| ArrayFormatter::try_new(c.as_ref(), &options))
                .collect::<Result<_, _>>()
                .map_err(|e| QueryError::Execution {
                    message: e.to_string(),
                })?;
            for row in 0..batch.num_rows() {
                rows.push(
                    formatters
                        .iter()
                        .map(|f| f.value(row).to_string())
                        .collect(),
                );
            }
        }
        Ok(QueryResult { columns, rows })
    }

    pub fn list_tables(&self) -> Vec<LoadedTable> {
        self.table_index().values().cloned().collect()
    }

    /// Column names and types of a registered table.
    pub fn describe(&self, alias: &str) -> Result<QueryResult, QueryError> {
        if !self.table_index().contains_key(alias) {
            return Err(QueryError::NoSuchTable {
                name: alias.to_string(),
            });
        }
        self.run_sql_unchecked(&format!("DESCRIBE \"{alias}\""))
    }

    /// A few rows from a registered table, for inspection.
    pub fn sample(&self, alias: &str, n: usize) -> Result<QueryResult, QueryError> {
        if !self.table_index().contains_key(alias) {
            return Err(QueryError::NoSuchTable {
                name: alias.to_string(),
            });
        }
        self.run_sql_unchecked(&format!("SELECT * FROM \"{alias}\" LIMIT {n}"))
    }

    /// Current row count of a registered table.
    pub fn count(&self, alias: &str) -> Result<usize, QueryError> {
        if !self.table_index().contains_key(alias) {
            return Err(QueryError::NoSuchTable {
                name: alias.to_string(),
            });
        }
        self.scalar_count(&format!("SELECT COUNT(*) FROM \"{alias}\""))
    }

    fn scalar_count(&self, sql: &str) -> Result<usize, QueryError> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(classify)?;
        Ok(count.max(0) as usize)
    }

    fn view_columns(&self, alias: &str) -> Result<Vec<String>, QueryError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("DESCRIBE \"{alias}\""))
            .map_err(classify)?;
        let mut columns = Vec::new();
        for batch in stmt.query_arrow([]).map_err(classify)? {
            let names = batch
                .column(0)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| QueryError::Execution {
                    message: "DESCRIBE returned a non-text column_name".to_string(),
                })?
                .clone();
            for i in 0..names.len() {
                if !names.is_null(i) {
                    columns.push(names.value(i).to_string());
                }
            }
        }
        Ok(columns)
    }
}

fn valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Map a DuckDB diagnostic onto the query error taxonomy by its text;
/// the driver does not expose a structured error class.
fn classify(err: duckdb::Error) -> QueryError {
    let message = err.to_string();
    if message.contains("Parser Error") || message.contains("Syntax Error") {
        return QueryError::Syntax { message };
    }
    if message.contains("Catalog Error") && message.contains("does not exist") {
        let name = message
            .split("with name ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("?")
            .to_string();
        return QueryError::NoSuchTable { name };
    }
    QueryError::Execution { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachestore::CacheStore;
    use serde_json::json;

    fn record(pairs: &[(&str, &str)]) -> cachestore::Record {
        let mut r = cachestore::Record::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), json!(v));
        }
        r
    }

    /// Write a Parquet fixture through the cache store and return its path.
    fn parquet_fixture(
        dir: &std::path::Path,
        name: &str,
        records: &[cachestore::Record],
    ) -> PathBuf {
        let store = CacheStore::open(dir, 3600).expect("store");
        store.put(name, "fixture", records).expect("put").path
    }

    fn hospitals() -> Vec<cachestore::Record> {
        vec![
            record(&[("facility_id", "050739"), ("facility_name", "CEDARS-SINAI"), ("state", "CA")]),
            record(&[("facility_id", "050441"), ("facility_name", "UCSF"), ("state", "CA")]),
            record(&[("facility_id", "330101"), ("facility_name", "NYP"), ("state", "NY")]),
        ]
    }

    fn spending() -> Vec<cachestore::Record> {
        vec![
            record(&[("facility_id", "050739"), ("score", "1.02")]),
            record(&[("facility_id", "330101"), ("score", "0.98")]),
        ]
    }

    #[test]
    fn register_then_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = parquet_fixture(dir.path(), "h1", &hospitals());
        let engine = QueryEngine::new().expect("engine");

        let table = engine.register_parquet("hospitals", &path).expect("register");
        assert_eq!(table.row_count, 3);
        assert_eq!(table.columns, vec!["facility_id", "facility_name", "state"]);

        let result = engine
            .run_sql("SELECT COUNT(*) AS n FROM hospitals WHERE state = 'CA'")
            .expect("count");
        assert_eq!(result.rows, vec![vec!["2".to_string()]]);
        assert_eq!(engine.count("hospitals").expect("count"), 3);
    }

    #[test]
    fn cross_table_join_on_declared_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = QueryEngine::new().expect("engine");
        let h = parquet_fixture(&dir.path().join("h"), "h1", &hospitals());
        let s = parquet_fixture(&dir.path().join("s"), "s1", &spending());
        engine.register_parquet("hospitals", &h).expect("register h");
        engine.register_parquet("spending", &s).expect("register s");

        let result = engine
            .run_sql(
                "SELECT h.facility_name, s.score \
                 FROM hospitals h JOIN spending s ON h.facility_id = s.facility_id \
                 ORDER BY h.facility_name",
            )
            .expect("join");
        assert_eq!(result.columns, vec!["facility_name", "score"]);
        assert_eq!(
            result.rows,
            vec![
                vec!["CEDARS-SINAI".to_string(), "1.02".to_string()],
                vec!["NYP".to_string(), "0.98".to_string()],
            ]
        );
    }

    #[test]
    fn reregistering_an_alias_replaces_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = QueryEngine::new().expect("engine");
        let h = parquet_fixture(&dir.path().join("a"), "h1", &hospitals());
        let s = parquet_fixture(&dir.path().join("b"), "s1", &spending());

        engine.register_parquet("t", &h).expect("first");
        let replaced = engine.register_parquet("t", &s).expect("second");
        assert_eq!(replaced.row_count, 2);
        assert_eq!(engine.list_tables().len(), 1);
    }

    #[test]
    fn errors_are_classified_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = QueryEngine::new().expect("engine");

        assert!(matches!(
            engine.run_sql("SELECT 1"),
            Err(QueryError::NoTablesLoaded)
        ));

        let h = parquet_fixture(dir.path(), "h1", &hospitals());
        engine.register_parquet("hospitals", &h).expect("register");

        assert!(matches!(
            engine.run_sql("SELECT * FROM never_loaded"),
            Err(QueryError::NoSuchTable { .. })
        ));
        assert!(matches!(
            engine.run_sql("SELEKT * FROM hospitals"),
            Err(QueryError::Syntax { .. })
        ));
        // The engine survives failed statements.
        assert!(engine.run_sql("SELECT COUNT(*) FROM hospitals").is_ok());
    }

    #[test]
    fn invalid_aliases_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = QueryEngine::new().expect("engine");
        let h = parquet_fixture(dir.path(), "h1", &hospitals());
        assert!(matches!(
            engine.register_parquet("bad alias; DROP", &h),
            Err(QueryError::InvalidAlias { .. })
        ));
        assert!(matches!(
            engine.register_parquet("1table", &h),
            Err(QueryError::InvalidAlias { .. })
        ));
    }

    #[test]
    fn describe_sample_and_unregister() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = QueryEngine::new().expect("engine");
        let h = parquet_fixture(dir.path(), "h1", &hospitals());
        engine.register_parquet("hospitals", &h).expect("register");

        let described = engine.describe("hospitals").expect("describe");
        assert!(!described.rows.is_empty());

        let sampled = engine.sample("hospitals", 2).expect("sample");
        assert_eq!(sampled.row_count(), 2);

        assert!(engine.unregister("hospitals").expect("unregister"));
        assert!(!engine.unregister("hospitals").expect("second unregister"));
        assert!(matches!(
            engine.describe("hospitals"),
            Err(QueryError::NoSuchTable { .. })
        ));
    }
}
