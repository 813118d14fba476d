use async_trait::async_trait;
use catalog::{Dataset, DatasetQuery};
use diagnostics::emit;
use diagnostics::log_debug;

use crate::error::FetchError;
use crate::http::{self, RequestBudget};
use crate::{FetchOutcome, PlatformFetcher, Record};

/// Largest page the SODA API will serve in one request.
const PAGE_SIZE: usize = 50_000;

/// Client for Socrata SODA endpoints.
///
/// Covers data.medicare.gov, data.medicaid.gov, openpaymentsdata.cms.gov,
/// and SODA-hosted data.cms.gov datasets. Filters map to simple `col=value`
/// parameters, projections to `$select`, and the raw query fragment is a
/// SoQL `$where` clause. Pagination is `$limit`/`$offset` until the
/// caller's limit is satisfied or the source returns a short page, so any
/// truncation is server-side.
pub struct SodaClient {
    client: reqwest::Client,
    budget: RequestBudget,
    max_records: usize,
}

impl SodaClient {
    pub fn new(
        app_token: Option<String>,
        budget: RequestBudget,
        max_records: usize,
    ) -> Result<Self, FetchError> {
        let headers = match app_token {
            Some(token) if !token.is_empty() => {
                let mut headers = reqwest::header::HeaderMap::new();
                let value = reqwest::header::HeaderValue::from_str(&token)
                    .map_err(|e| FetchError::InvalidRequest(format!("bad app token: {e}")))?;
                headers.insert("X-App-Token", value);
                Some(headers)
            }
            _ => None,
        };
        Ok(Self {
            client: http::build_client(headers)?,
            budget,
            max_records,
        })
    }

    fn page_params(query: &DatasetQuery, limit: usize, offset: usize) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("$limit".to_string(), limit.to_string()),
            ("$offset".to_string(), offset.to_string()),
        ];
        for (key, value) in &query.filters {
            params.push((key.clone(), value.clone()));
        }
        if !query.columns.is_empty() {
            params.push(("$select".to_string(), query.columns.join(",")));
        }
        if let Some(where_clause) = &query.raw_query {
            params.push(("$where".to_string(), where_clause.clone()));
        }
        params
    }
}

#[async_trait]
impl PlatformFetcher for SodaClient {
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
            log_debug!("SODA page fetched, {total} records so far", total: total);
            if page_len < want {
                break;
            }
            offset += page_len;
        }

        Ok(FetchOutcome {
            records,
            total_hint: None,
        })
    }
}
