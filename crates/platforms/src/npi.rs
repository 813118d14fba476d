use async_trait::async_trait;
use catalog::{Dataset, DatasetQuery};
use serde_json::Value;

use crate::error::FetchError;
use crate::http::{self, RequestBudget};
use crate::{FetchOutcome, PlatformFetcher, Record};

const BASE_URL: &str = "https://npiregistry.cms.hhs.gov/api/";
const API_VERSION: &str = "2.1";
/// Hard cap imposed by the registry; it does not paginate past this.
const MAX_RESULTS: usize = 200;

/// Filter keys the registry's fixed identity schema accepts.
const SEARCH_FIELDS: &[&str] = &[
    "number",
    "first_name",
    "last_name",
    "organization_name",
    "city",
    "state",
    "postal_code",
    "taxonomy_description",
    "enumeration_type",
];

/// Identity search parameters for the provider lookup surface.
#[derive(Debug, Clone, Default)]
pub struct ProviderQuery {
    pub npi: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub taxonomy_description: Option<String>,
    pub enumeration_type: Option<String>,
    pub limit: Option<usize>,
}

impl ProviderQuery {
    pub fn is_empty(&self) -> bool {
        self.npi.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.organization_name.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.postal_code.is_none()
            && self.taxonomy_description.is_none()
            && self.enumeration_type.is_none()
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("version".to_string(), API_VERSION.to_string()),
            (
                "limit".to_string(),
                self.limit.unwrap_or(MAX_RESULTS).min(MAX_RESULTS).to_string(),
            ),
        ];
        let fields = [
            ("number", &self.npi),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("organization_name", &self.organization_name),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
            ("taxonomy_description", &self.taxonomy_description),
            ("enumeration_type", &self.enumeration_type),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                if !v.is_empty() {
                    params.push((key.to_string(), v.clone()));
                }
            }
        }
        params
    }
}

/// Client for the NPPES NPI Registry.
///
/// Identity lookup, not a tabular feed: filters are restricted to the
/// fixed search schema, there is no raw query dialect, and the registry
/// returns at most 200 results per query. Nested responses are flattened
/// into `basic_*`, `practice_*` (LOCATION address), and `taxonomy_*`
/// (primary taxonomy) columns.
pub struct NpiClient {
    client: reqwest::Client,
    budget: RequestBudget,
}

impl NpiClient {
    pub fn new(budget: RequestBudget) -> Result<Self, FetchError> {
        Ok(Self {
            client: http::build_client(None)?,
            budget,
        })
    }

    /// Run an identity search against the live registry.
    pub async fn search(&self, query: &ProviderQuery) -> Result<FetchOutcome, FetchError> {
        if query.is_empty() {
            return Err(FetchError::InvalidRequest(
                "provider lookup requires at least one search parameter".to_string(),
            ));
        }
        let params = query.params();
        let payload = http::get_json(&self.client, &self.budget, BASE_URL, &params).await?;

        let total_hint = payload
            .get("result_count")
            .and_then(Value::as_u64);
        let records = match payload.get("results") {
            Some(Value::Array(results)) => results.iter().map(flatten_result).collect(),
            _ => Vec::new(),
        };
        Ok(FetchOutcome {
            records,
            total_hint,
        })
    }

    fn provider_query_from(query: &DatasetQuery) -> Result<ProviderQuery, FetchError> {
        if query.raw_query.is_some() {
            return Err(FetchError::InvalidRequest(
                "the NPI registry does not support a raw query fragment".to_string(),
            ));
        }
        let mut pq = ProviderQuery {
            limit: query.limit,
            ..ProviderQuery::default()
        };
        for (key, value) in &query.filters {
            match key.as_str() {
                "number" | "npi" => pq.npi = Some(value.clone()),
                "first_name" => pq.first_name = Some(value.clone()),
                "last_name" => pq.last_name = Some(value.clone()),
                "organization_name" => pq.organization_name = Some(value.clone()),
                "city" => pq.city = Some(value.clone()),
                "state" => pq.state = Some(value.clone()),
                "postal_code" => pq.postal_code = Some(value.clone()),
                "taxonomy_description" | "specialty" => {
                    pq.taxonomy_description = Some(value.clone())
                }
                "enumeration_type" => pq.enumeration_type = Some(value.clone()),
                other => {
                    return Err(FetchError::InvalidRequest(format!(
                        "filter '{other}' is not part of the NPI search schema (expected one of: {})",
                        SEARCH_FIELDS.join(", ")
                    )));
                }
            }
        }
        Ok(pq)
    }
}

#[async_trait]
impl PlatformFetcher for NpiClient {
    async fn fetch(
        &self,
        _dataset: &Dataset,
        query: &DatasetQuery,
    ) -> Result<FetchOutcome, FetchError> {
        let provider_query = Self::provider_query_from(query)?;
        let mut outcome = self.search(&provider_query).await?;
        if !query.columns.is_empty() {
            outcome.records = outcome
                .records
                .into_iter()
                .map(|mut record| {
                    let mut projected = Record::new();
                    for column in &query.columns {
                        if let Some(value) = record.remove(column) {
                            projected.insert(column.clone(), value);
                        }
                    }
                    projected
                })
                .collect();
        }
        Ok(outcome)
    }
}

/// Flatten one nested registry result into a flat record.
fn flatten_result(result: &Value) -> Record {
    let mut record = Record::new();
    record.insert(
        "npi".to_string(),
        result.get("number").cloned().unwrap_or(Value::String(String::new())),
    );

    if let Some(Value::Object(basic)) = result.get("basic") {
        for (key, value) in basic {
            record.insert(format!("basic_{key}"), value.clone());
        }
    }

    if let Some(Value::Array(addresses)) = result.get("addresses") {
        for address in addresses {
            if address.get("address_purpose").and_then(Value::as_str) == Some("LOCATION") {
                if let Value::Object(fields) = address {
                    for (key, value) in fields {
                        record.insert(format!("practice_{key}"), value.clone());
                    }
                }
                break;
            }
        }
    }

    if let Some(Value::Array(taxonomies)) = result.get("taxonomies") {
        if let Some(Value::Object(first)) = taxonomies.first() {
            for (key, value) in first {
                record.insert(format!("taxonomy_{key}"), value.clone());
            }
        }
    }

    record.insert(
        "enumeration_type".to_string(),
        result
            .get("enumeration_type")
            .cloned()
            .unwrap_or(Value::String(String::new())),
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_pulls_basic_location_and_primary_taxonomy() {
        let result = json!({
            "number": "1003000126",
            "enumeration_type": "NPI-1",
            "basic": {"first_name": "ARDALAN", "last_name": "ENKESHAFI", "credential": "M.D."},
            "addresses": [
                {"address_purpose": "MAILING", "city": "PO BOX TOWN", "state": "VA"},
                {"address_purpose": "LOCATION", "city": "BETHESDA", "state": "MD"}
            ],
            "taxonomies": [
                {"desc": "Internal Medicine", "primary": true},
                {"desc": "Hospitalist", "primary": false}
            ]
        });
        let record = flatten_result(&result);
        assert_eq!(record["npi"], json!("1003000126"));
        assert_eq!(record["basic_last_name"], json!("ENKESHAFI"));
        assert_eq!(record["practice_city"], json!("BETHESDA"));
        assert_eq!(record["practice_state"], json!("MD"));
        assert_eq!(record["taxonomy_desc"], json!("Internal Medicine"));
        assert_eq!(record["enumeration_type"], json!("NPI-1"));
    }

    #[test]
    fn dataset_query_maps_onto_fixed_search_schema() {
        let query = DatasetQuery::new()
            .with_filter("state", "CA")
            .with_filter("specialty", "Cardiology")
            .with_limit(10);
        let pq = NpiClient::provider_query_from(&query).expect("valid mapping");
        assert_eq!(pq.state.as_deref(), Some("CA"));
        assert_eq!(pq.taxonomy_description.as_deref(), Some("Cardiology"));
        assert_eq!(pq.limit, Some(10));
    }

    #[test]
    fn unknown_filter_and_raw_query_are_rejected() {
        let bad_filter = DatasetQuery::new().with_filter("hospital_type", "Acute");
        assert!(matches!(
            NpiClient::provider_query_from(&bad_filter),
            Err(FetchError::InvalidRequest(_))
        ));

        let raw = DatasetQuery::new()
            .with_filter("state", "CA")
            .with_raw_query("state='CA'");
        assert!(matches!(
            NpiClient::provider_query_from(&raw),
            Err(FetchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn limit_is_capped_at_registry_maximum() {
        let pq = ProviderQuery {
            last_name: Some("SMITH".to_string()),
            limit: Some(5_000),
            ..ProviderQuery::default()
        };
        let params = pq.params();
        assert!(params.contains(&("limit".to_string(), "200".to_string())));
    }
}
