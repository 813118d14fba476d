use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use diagnostics::emit;
use diagnostics::log_warn;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::Record;

const TIMEOUT_SECONDS: u64 = 60;
const MAX_RETRIES: usize = 3;
/// Ceiling on how long a Retry-After hint is honored.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Build the shared HTTP client used by all fetchers.
pub(crate) fn build_client(
    default_headers: Option<reqwest::header::HeaderMap>,
) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(TIMEOUT_SECONDS));
    if let Some(headers) = default_headers {
        builder = builder.default_headers(headers);
    }
    Ok(builder.build()?)
}

/// Paces requests so a platform's rate thresholds are never exceeded.
///
/// Callers `acquire` before each request; acquisition sleeps until the
/// next slot opens. Waiters queue on the internal lock, so concurrent
/// callers are spaced out rather than released in a burst.
pub struct RequestBudget {
    min_interval: Duration,
    next_slot: tokio::sync::Mutex<Instant>,
}

impl RequestBudget {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) {
        let mut slot = self.next_slot.lock().await;
        let now = Instant::now();
        if *slot > now {
            tokio::time::sleep_until(*slot).await;
        }
        let base = if *slot > now { *slot } else { now };
        *slot = base + self.min_interval;
    }
}

/// GET a JSON document, retrying transient failures with exponential
/// backoff. Rate-limit responses sleep out any Retry-After hint before
/// the next attempt.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    budget: &RequestBudget,
    url: &str,
    params: &[(String, String)],
) -> Result<serde_json::Value, FetchError> {
    (|| async { try_get_json(client, budget, url, params).await })
        .retry(ExponentialBuilder::default().with_max_times(MAX_RETRIES))
        .when(FetchError::is_transient)
        .notify(|err: &FetchError, dur: Duration| {
            let message = err.to_string();
            let wait_ms = dur.as_millis() as u64;
            log_warn!("Request failed, retrying in {wait_ms}ms: {message}", wait_ms: wait_ms, message: message);
        })
        .await
}

async fn try_get_json(
    client: &reqwest::Client,
    budget: &RequestBudget,
    url: &str,
    params: &[(String, String)],
) -> Result<serde_json::Value, FetchError> {
    budget.acquire().await;

    let response = client.get(url).query(params).send().await?;
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        if let Some(hint) = retry_after {
            tokio::time::sleep(hint.min(MAX_RETRY_AFTER)).await;
        }
        return Err(FetchError::RateLimited {
            url: url.to_string(),
            retry_after,
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| String::new());
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }

    response.json().await.map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Rows to request next, given the caller's cap and what arrived so
/// far. Saturates so a server that over-delivers a page cannot push the
/// running total past the cap and underflow.
pub(crate) fn page_budget(page_size: usize, cap: usize, fetched: usize) -> usize {
    page_size.min(cap.saturating_sub(fetched))
}

/// Decode a tabular API payload into records.
///
/// SODA returns a bare JSON array; the CMS Data API sometimes wraps rows
/// in `{"data": [...]}`. Anything else is a malformed payload, not an
/// empty result.
pub(crate) fn parse_rows(value: serde_json::Value, url: &str) -> Result<Vec<Record>, FetchError> {
    let rows = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(FetchError::Decode {
                    url: url.to_string(),
                    message: "expected a JSON array of rows or a {\"data\": [...]} envelope"
                        .to_string(),
                })
            }
        },
        _ => {
            return Err(FetchError::Decode {
                url: url.to_string(),
                message: "expected a JSON array of rows".to_string(),
            })
        }
    };

    rows.into_iter()
        .map(|row| match row {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(FetchError::Decode {
                url: url.to_string(),
                message: format!("expected row object, got {other}"),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rows_accepts_bare_array_and_data_envelope() {
        let bare = json!([{"a": "1"}, {"a": "2"}]);
        assert_eq!(parse_rows(bare, "http://x").expect("bare").len(), 2);

        let wrapped = json!({"data": [{"a": "1"}]});
        assert_eq!(parse_rows(wrapped, "http://x").expect("wrapped").len(), 1);
    }

    #[test]
    fn page_budget_saturates_when_a_server_over_delivers() {
        assert_eq!(page_budget(5_000, 10_000, 0), 5_000);
        assert_eq!(page_budget(5_000, 10_000, 9_900), 100);
        assert_eq!(page_budget(5_000, 10_000, 10_000), 0);
        // A page larger than requested must not underflow the budget.
        assert_eq!(page_budget(5_000, 10_000, 10_250), 0);
    }

    #[test]
    fn parse_rows_rejects_malformed_payloads() {
        assert!(parse_rows(json!("nope"), "http://x").is_err());
        assert!(parse_rows(json!({"rows": []}), "http://x").is_err());
        assert!(parse_rows(json!([1, 2]), "http://x").is_err());
    }

    #[tokio::test]
    async fn budget_spaces_out_acquisitions() {
        let budget = RequestBudget::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await;
        // First slot is immediate; the next two wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
