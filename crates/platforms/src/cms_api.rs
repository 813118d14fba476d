use async_trait::async_trait;
use catalog::{Dataset, DatasetQuery};
use diagnostics::emit;
use diagnostics::log_debug;

use crate::error::FetchError;
use crate::http::{self, RequestBudget};
use crate::{FetchOutcome, PlatformFetcher, Record};

/// Page size for data-api/v1; larger requests get rejected or truncated.
const PAGE_SIZE: usize = 5_000;

/// Client for data.cms.gov data-api/v1 endpoints.
///
/// A different dialect than SODA: pagination is `size`/`offset`, equality
/// filters become `filter[Column]=value`, and the raw query fragment maps
/// to the API's `keyword` full-text parameter. The API has no column
/// projection, so `query.columns` is applied client-side after decoding.
pub struct CmsDataApiClient {
    client: reqwest::Client,
    budget: RequestBudget,
    max_records: usize,
}

impl CmsDataApiClient {
    pub fn new(budget: RequestBudget, max_records: usize) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(None)?,
            budget,
            max_records,
        })
    }

    fn page_params(query: &DatasetQuery, size: usize, offset: usize) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("size".to_string(), size.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        for (key, value) in &query.filters {
            if key.starts_with("filter[") {
                params.push((key.clone(), value.clone()));
            } else {
                params.push((format!("filter[{key}]"), value.clone()));
            }
        }
        if let Some(keyword) = &query.raw_query {
            params.push(("keyword".to_string(), keyword.clone()));
        }
        params
    }

    fn project(records: Vec<Record>, columns: &[String]) -> Vec<Record> {
        if columns.is_empty() {
            return records;
        }
        records
            .into_iter()
            .map(|mut record| {
                let mut projected = Record::new();
                for column in columns {
                    if let Some(value) = record.remove(column) {
                        projected.insert(column.clone(), value);
                    }
                }
                projected
            })
            .collect()
    }
}

#[async_trait]
impl PlatformFetcher for CmsDataApiClient {
    async fn fetch(
        &self,
        dataset: &Dataset,
        query: &DatasetQuery,
    ) -> Result<FetchOutcome, FetchError> {
        let url = &dataset.api_endpoint;
        let cap = query.limit.unwrap_or(self.max_records);

        let mut records: Vec<Record> = Vec::new();
        let mut offset = 0usize;
        loop {
            let want = http::page_budget(PAGE_SIZE, cap, records.len());
            if want == 0 {
                break;
            }
            let params = Self::page_params(query, want, offset);
            let payload = http::get_json(&self.client, &self.budget, url, &params).await?;
            let page = http::parse_rows(payload, url)?;
            let page_len = page.len();
            records.extend(page);
            let total = records.len();
            log_debug!("CMS Data API page fetched, {total} records so far", total: total);
            if page_len < want {
                break;
            }
            offset += page_len;
        }

        Ok(FetchOutcome {
            records: Self::project(records, &query.columns),
            total_hint: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_are_bracketed_and_keyword_passes_through() {
        let query = DatasetQuery::new()
            .with_filter("Rndrng_Prvdr_State_Abrvtn", "MD")
            .with_filter("filter[Rndrng_Prvdr_Type]", "Internal Medicine")
            .with_raw_query("cardiology");

        let params = CmsDataApiClient::page_params(&query, 500, 0);
        assert!(params.contains(&(
            "filter[Rndrng_Prvdr_State_Abrvtn]".to_string(),
            "MD".to_string()
        )));
        // Already-bracketed keys pass through untouched.
        assert!(params.contains(&(
            "filter[Rndrng_Prvdr_Type]".to_string(),
            "Internal Medicine".to_string()
        )));
        assert!(params.contains(&("keyword".to_string(), "cardiology".to_string())));
    }

    #[test]
    fn projection_is_applied_client_side() {
        let record = |npi: &str, state: &str| {
            let mut r = Record::new();
            r.insert("Rndrng_NPI".to_string(), json!(npi));
            r.insert("Rndrng_Prvdr_State_Abrvtn".to_string(), json!(state));
            r.insert("Tot_Srvcs".to_string(), json!(12));
            r
        };
        let projected = CmsDataApiClient::project(
            vec![record("1003000126", "MD")],
            &["Rndrng_NPI".to_string(), "not_a_column".to_string()],
        );
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].len(), 1);
        assert!(projected[0].contains_key("Rndrng_NPI"));
    }
}
