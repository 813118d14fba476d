use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use arrow_array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::Utc;
use diagnostics::emit;
use diagnostics::{log_debug, log_info, log_warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::FileReader;
use parquet::file::reader::SerializedFileReader;
use parquet::format::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{CacheError, Record};

const INDEX_FILE: &str = "cache_index.json";
const META_DATASET_ID: &str = "cmsdata.dataset_id";
const META_FINGERPRINT: &str = "cmsdata.fingerprint";

/// Index entry for one cached Parquet file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub dataset_id: String,
    pub path: PathBuf,
    pub row_count: usize,
    pub size_bytes: u64,
    /// Unix seconds at fetch completion.
    pub fetched_at: i64,
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Whether the entry is still inside its TTL at `now` (unix seconds).
    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.fetched_at < self.ttl_secs as i64
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.fetched_at
    }
}

/// Summary counters for cache introspection.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub unique_datasets: usize,
    pub total_size_bytes: u64,
    pub cache_dir: PathBuf,
}

/// Owns the cache directory and every file in it.
///
/// All mutation goes through this type; readers elsewhere only ever hold
/// a path handed out by [`CacheStore::lookup`].
pub struct CacheStore {
    root: PathBuf,
    index_path: PathBuf,
    default_ttl_secs: u64,
    index: Mutex<BTreeMap<String, CacheEntry>>,
}

impl CacheStore {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// The JSON index is loaded if present and sane; otherwise it is
    /// rebuilt by scanning the Parquet footers in the directory, since
    /// the directory, not the index, is the source of truth.
    pub fn open(root: impl Into<PathBuf>, default_ttl_secs: u64) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index_path = root.join(INDEX_FILE);

        let index = match std::fs::read_to_string(&index_path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&raw) {
                Ok(index) => index,
                Err(err) => {
                    let reason = err.to_string();
                    log_warn!("Cache index is corrupt, rebuilding from directory: {reason}", reason: reason);
                    Self::rebuild_index(&root, default_ttl_secs)?
                }
            },
            Err(_) => Self::rebuild_index(&root, default_ttl_secs)?,
        };

        let store = Self {
            root,
            index_path,
            default_ttl_secs,
            index: Mutex::new(index),
        };
        store.save_index()?;
        Ok(store)
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, CacheEntry>> {
        // Recover the map on poison; entries are plain data.
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up an entry by fingerprint. Entries whose backing file has
    /// vanished are treated as absent.
    pub fn lookup(&self, fingerprint: &str) -> Option<CacheEntry> {
        let guard = self.guard();
        let entry = guard.get(fingerprint)?;
        if !entry.path.exists() {
            return None;
        }
        Some(entry.clone())
    }

    pub fn list_entries(&self) -> Vec<CacheEntry> {
        self.guard().values().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.guard();
        let mut datasets = std::collections::BTreeSet::new();
        let mut total_size = 0u64;
        for entry in guard.values() {
            datasets.insert(entry.dataset_id.clone());
            total_size += entry.size_bytes;
        }
        CacheStats {
            total_entries: guard.len(),
            unique_datasets: datasets.len(),
            total_size_bytes: total_size,
            cache_dir: self.root.clone(),
        }
    }

    /// Persist records as the Parquet file for `fingerprint`, replacing
    /// any prior file atomically: the bytes land in a `.tmp` sibling
    /// which is renamed over the target, so a concurrent reader sees
    /// either the old complete file or the new one.
    pub fn put(
        &self,
        fingerprint: &str,
        dataset_id: &str,
        records: &[Record],
    ) -> Result<CacheEntry, CacheError> {
        if records.is_empty() {
            return Err(CacheError::EmptyRecordSet);
        }
        let batch = records_to_batch(records)?;
        let path = self.root.join(format!("{fingerprint}.parquet"));
        let tmp = self.root.join(format!("{fingerprint}.parquet.tmp"));

        {
            let file = File::create(&tmp)?;
            let props = WriterProperties::builder()
                .set_key_value_metadata(Some(vec![
                    KeyValue::new(META_DATASET_ID.to_string(), dataset_id.to_string()),
                    KeyValue::new(META_FINGERPRINT.to_string(), fingerprint.to_string()),
                ]))
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
        }
        std::fs::rename(&tmp, &path)?;

        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            dataset_id: dataset_id.to_string(),
            path: path.clone(),
            row_count: records.len(),
            size_bytes: std::fs::metadata(&path)?.len(),
            fetched_at: Utc::now().timestamp(),
            ttl_secs: self.default_ttl_secs,
        };
        self.guard().insert(fingerprint.to_string(), entry.clone());
        self.save_index()?;

        let rows = entry.row_count;
        let dest = path.display().to_string();
        log_info!("Cached {rows} rows for {dataset_id} at {dest}", rows: rows, dataset_id: dataset_id, dest: dest);
        Ok(entry)
    }

    /// Read an entry's rows back, preserving stored row and column order.
    pub fn read(&self, entry: &CacheEntry) -> Result<(Vec<String>, Vec<Record>), CacheError> {
        let file = File::open(&entry.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        let mut records = Vec::with_capacity(entry.row_count);
        for batch in builder.build()? {
            let batch = batch?;
            let arrays: Vec<&StringArray> = batch
                .columns()
                .iter()
                .map(|c| {
                    c.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                        arrow_schema::ArrowError::CastError(
                            "cached column is not Utf8".to_string(),
                        )
                    })
                })
                .collect::<Result<_, _>>()?;
            for row in 0..batch.num_rows() {
                let mut record = Record::new();
                for (i, name) in columns.iter().enumerate() {
                    if !arrays[i].is_null(row) {
                        record.insert(name.clone(), Value::String(arrays[i].value(row).to_string()));
                    }
                }
                records.push(record);
            }
        }
        Ok((columns, records))
    }

    /// Delete every entry (and file) belonging to a dataset.
    pub fn invalidate_dataset(&self, dataset_id: &str) -> Result<usize, CacheError> {
        let victims: Vec<String> = {
            let guard = self.guard();
            guard
                .values()
                .filter(|e| e.dataset_id == dataset_id)
                .map(|e| e.fingerprint.clone())
                .collect()
        };
        for fingerprint in &victims {
            self.invalidate_fingerprint(fingerprint)?;
        }
        Ok(victims.len())
    }

    /// Delete a single entry and its file.
    pub fn invalidate_fingerprint(&self, fingerprint: &str) -> Result<(), CacheError> {
        let removed = self.guard().remove(fingerprint);
        if let Some(entry) = removed {
            match std::fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.save_index()
    }

    /// Delete everything.
    pub fn invalidate_all(&self) -> Result<usize, CacheError> {
        let victims: Vec<String> = self.guard().keys().cloned().collect();
        for fingerprint in &victims {
            self.invalidate_fingerprint(fingerprint)?;
        }
        Ok(victims.len())
    }

    fn save_index(&self) -> Result<(), CacheError> {
        let serialized = {
            let guard = self.guard();
            serde_json::to_string_pretty(&*guard)?
        };
        let tmp = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }

    fn rebuild_index(
        root: &Path,
        default_ttl_secs: u64,
    ) -> Result<BTreeMap<String, CacheEntry>, CacheError> {
        let mut index = BTreeMap::new();
        for dir_entry in std::fs::read_dir(root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            match Self::entry_from_footer(&path, default_ttl_secs) {
                Ok(Some(entry)) => {
                    index.insert(entry.fingerprint.clone(), entry);
                }
                Ok(None) => {
                    let stray = path.display().to_string();
                    log_warn!("Skipping Parquet file without cache metadata: {stray}", stray: stray);
                }
                Err(err) => {
                    let stray = path.display().to_string();
                    let reason = err.to_string();
                    log_warn!("Skipping unreadable Parquet file {stray}: {reason}", stray: stray, reason: reason);
                }
            }
        }
        let count = index.len();
        log_info!("Rebuilt cache index with {count} entries", count: count);
        Ok(index)
    }

    /// Reconstruct an index entry from a Parquet footer. Returns None
    /// for files that were not written by this store.
    fn entry_from_footer(
        path: &Path,
        default_ttl_secs: u64,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let file_meta = reader.metadata().file_metadata();

        let mut dataset_id = None;
        let mut fingerprint = None;
        if let Some(kv) = file_meta.key_value_metadata() {
            for item in kv {
                match item.key.as_str() {
                    META_DATASET_ID => dataset_id = item.value.clone(),
                    META_FINGERPRINT => fingerprint = item.value.clone(),
                    _ => {}
                }
            }
        }
        let (Some(dataset_id), Some(fingerprint)) = (dataset_id, fingerprint) else {
            return Ok(None);
        };

        let fs_meta = std::fs::metadata(path)?;
        let fetched_at = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(|| Utc::now().timestamp());

        Ok(Some(CacheEntry {
            fingerprint,
            dataset_id,
            path: path.to_path_buf(),
            row_count: file_meta.num_rows() as usize,
            size_bytes: fs_meta.len(),
            fetched_at,
            ttl_secs: default_ttl_secs,
        }))
    }
}

/// Convert records to one all-text Arrow batch.
///
/// Column order is first-appearance order across the record set; rows
/// keep their input order. Values are normalized to strings (JSON
/// scalars via their literal form), matching how the stringly CMS feeds
/// are queried downstream.
fn records_to_batch(records: &[Record]) -> Result<RecordBatch, CacheError> {
    let mut column_order: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !column_order.iter().any(|c| c == key) {
                column_order.push(key.clone());
            }
        }
    }

    let mut fields = Vec::with_capacity(column_order.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(column_order.len());
    for name in &column_order {
        let values: Vec<Option<String>> = records
            .iter()
            .map(|record| record.get(name).and_then(value_to_string))
            .collect();
        fields.push(Field::new(name, DataType::Utf8, true));
        arrays.push(Arc::new(StringArray::from(values)) as ArrayRef);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema, arrays)?;
    let rows = batch.num_rows();
    let cols = batch.num_columns();
    log_debug!("Built cache batch with {rows} rows and {cols} columns", rows: rows, cols: cols);
    Ok(batch)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
