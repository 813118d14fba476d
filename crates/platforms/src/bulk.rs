use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, StringArray};
use arrow_csv::reader::Format;
use arrow_csv::ReaderBuilder;
use arrow_schema::{ArrowError, DataType, Field, Schema};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use catalog::{Dataset, DatasetQuery};
use diagnostics::emit;
use diagnostics::{log_debug, log_info, log_warn};
use serde_json::Value;

use crate::error::FetchError;
use crate::http::{self, RequestBudget};
use crate::{FetchOutcome, PlatformFetcher, Record};

const SCHEMA_SAMPLE_ROWS: usize = 100;
const BATCH_SIZE: usize = 8_192;
const MAX_RETRIES: usize = 3;

/// Client for bulk CSV extracts.
///
/// These sources have no server-side query dialect at all: the full file
/// is downloaded once into the download directory (skipped when already
/// present), then `filters`, `columns`, and `limit` apply locally as a
/// post-filter over the decoded rows. Every column is read as text so
/// equality filters compare the literal CSV cell, zero-padded codes
/// included.
pub struct BulkClient {
    client: reqwest::Client,
    budget: RequestBudget,
    download_dir: PathBuf,
}

impl BulkClient {
    pub fn new(download_dir: PathBuf, budget: RequestBudget) -> Result<Self, FetchError> {
        std::fs::create_dir_all(&download_dir)?;
        Ok(Self {
            client: http::build_client(None)?,
            budget,
            download_dir,
        })
    }

    fn local_path(&self, dataset_id: &str) -> PathBuf {
        let stem: String = dataset_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.download_dir.join(format!("{stem}.csv"))
    }

    /// Download the extract unless a prior download is already on disk.
    /// The write goes to a temp sibling and is renamed into place, so a
    /// failed download never leaves a half-written file to be reused.
    async fn ensure_downloaded(&self, dataset: &Dataset) -> Result<PathBuf, FetchError> {
        let path = self.local_path(&dataset.id);
        if path.exists() {
            let cached = path.display().to_string();
            log_info!("Using previously downloaded bulk file {cached}", cached: cached);
            return Ok(path);
        }

        let url = dataset.api_endpoint.clone();
        let bytes = (|| async { self.try_download(&url).await })
            .retry(ExponentialBuilder::default().with_max_times(MAX_RETRIES))
            .when(FetchError::is_transient)
            .notify(|err: &FetchError, dur: Duration| {
                let message = err.to_string();
                let wait_ms = dur.as_millis() as u64;
                log_warn!("Bulk download failed, retrying in {wait_ms}ms: {message}", wait_ms: wait_ms, message: message);
            })
            .await?;

        let tmp = path.with_extension("csv.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;
        let size = bytes.len();
        let dest = path.display().to_string();
        log_info!("Downloaded {size} bytes to {dest}", size: size, dest: dest);
        Ok(path)
    }

    async fn try_download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.budget.acquire().await;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| String::new());
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Decode the CSV and apply the query as a local post-filter.
    fn decode_filtered(path: &PathBuf, query: &DatasetQuery) -> Result<Vec<Record>, FetchError> {
        let mut file = File::open(path)?;
        let format = Format::default().with_header(true);
        let (inferred, _) = format.infer_schema(&mut file, Some(SCHEMA_SAMPLE_ROWS))?;
        file.seek(SeekFrom::Start(0))?;

        // Re-declare every column as text; inference would otherwise turn
        // zero-padded provider codes into integers and break equality.
        let fields: Vec<Field> = inferred
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let reader = ReaderBuilder::new(schema.clone())
            .with_format(format)
            .with_batch_size(BATCH_SIZE)
            .build(file)?;

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut records = Vec::new();
        'scan: for batch in reader {
            let batch = batch?;
            let columns: Vec<&StringArray> = batch
                .columns()
                .iter()
                .map(|c| {
                    c.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                        ArrowError::CastError("bulk CSV column is not Utf8".to_string())
                    })
                })
                .collect::<Result<_, _>>()?;

            for row in 0..batch.num_rows() {
                let matches = query.filters.iter().all(|(key, value)| {
                    match schema.index_of(key) {
                        Ok(i) => !columns[i].is_null(row) && columns[i].value(row) == value,
                        // A filter on a column the file lacks matches nothing.
                        Err(_) => false,
                    }
                });
                if !matches {
                    continue;
                }

                let mut record = Record::new();
                if query.columns.is_empty() {
                    for (i, field) in schema.fields().iter().enumerate() {
                        if !columns[i].is_null(row) {
                            record.insert(
                                field.name().clone(),
                                Value::String(columns[i].value(row).to_string()),
                            );
                        }
                    }
                } else {
                    for name in &query.columns {
                        if let Ok(i) = schema.index_of(name) {
                            if !columns[i].is_null(row) {
                                record.insert(
                                    name.clone(),
                                    Value::String(columns[i].value(row).to_string()),
                                );
                            }
                        }
                    }
                }
                records.push(record);
                if records.len() >= limit {
                    break 'scan;
                }
            }
        }
        let kept = records.len();
        log_debug!("Bulk post-filter kept {kept} rows", kept: kept);
        Ok(records)
    }
}

#[async_trait]
impl PlatformFetcher for BulkClient {
    async fn fetch(
        &self,
        dataset: &Dataset,
        query: &DatasetQuery,
    ) -> Result<FetchOutcome, FetchError> {
        let path = self.ensure_downloaded(dataset).await?;
        let records = Self::decode_filtered(&path, query)?;
        Ok(FetchOutcome {
            records,
            total_hint: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{DataDomain, Platform};

    fn bulk_dataset(id: &str) -> Dataset {
        Dataset {
            id: id.to_string(),
            title: "Test Extract".to_string(),
            description: String::new(),
            domain: String::new(),
            platform: Platform::Bulk,
            data_domain: DataDomain::MedicareProvider,
            api_endpoint: "https://example.invalid/extract.csv".to_string(),
            columns: vec![],
            keywords: vec![],
            modified: String::new(),
            temporal: String::new(),
            record_count: None,
            join_keys: vec![],
            notes: String::new(),
        }
    }

    fn seed_csv(client: &BulkClient, id: &str, contents: &str) {
        std::fs::write(client.local_path(id), contents).expect("seed csv");
    }

    const SAMPLE: &str = "\
provider_id,provider_name,state
001,ALPHA HOSPITAL,NY
002,BETA CLINIC,CA
003,GAMMA CENTER,NY
004,DELTA HOME,NY
005,EPSILON CARE,TX
006,ZETA HEALTH,NY
007,ETA PAVILION,NY
008,THETA WARD,NY
";

    #[tokio::test]
    async fn post_filter_applies_filters_and_limit_locally() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = BulkClient::new(
            dir.path().to_path_buf(),
            RequestBudget::new(Duration::from_millis(0)),
        )
        .expect("client");
        seed_csv(&client, "extract-a", SAMPLE);

        // The pre-seeded file means no network request happens.
        let query = DatasetQuery::new().with_filter("state", "NY").with_limit(5);
        let outcome = client
            .fetch(&bulk_dataset("extract-a"), &query)
            .await
            .expect("fetch");

        assert_eq!(outcome.records.len(), 5);
        for record in &outcome.records {
            assert_eq!(record["state"], Value::String("NY".to_string()));
        }
    }

    #[tokio::test]
    async fn projection_and_text_decoding_preserve_padded_codes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = BulkClient::new(
            dir.path().to_path_buf(),
            RequestBudget::new(Duration::from_millis(0)),
        )
        .expect("client");
        seed_csv(&client, "extract-b", SAMPLE);

        let query = DatasetQuery::new()
            .with_filter("provider_id", "001")
            .with_columns(vec!["provider_id".to_string(), "provider_name".to_string()]);
        let outcome = client
            .fetch(&bulk_dataset("extract-b"), &query)
            .await
            .expect("fetch");

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.len(), 2);
        assert_eq!(record["provider_id"], Value::String("001".to_string()));
    }

    #[tokio::test]
    async fn filter_on_missing_column_matches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = BulkClient::new(
            dir.path().to_path_buf(),
            RequestBudget::new(Duration::from_millis(0)),
        )
        .expect("client");
        seed_csv(&client, "extract-c", SAMPLE);

        let query = DatasetQuery::new().with_filter("no_such_column", "x");
        let outcome = client
            .fetch(&bulk_dataset("extract-c"), &query)
            .await
            .expect("fetch");
        assert!(outcome.records.is_empty());
    }
}
