use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Platform-agnostic request shape for fetching dataset rows.
///
/// Filters are equality predicates on declared columns; unknown keys are
/// passed through to the platform and may simply match nothing. The
/// `raw_query` fragment is layered on top of `filters` when the platform
/// dialect supports one (SoQL `$where` for SODA, `keyword` for the CMS
/// Data API); it is not a replacement for them.
///
/// Filter keys sort naturally in the `BTreeMap` and values are plain
/// strings, so two queries that differ only in argument order are equal
/// and hash to the same cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetQuery {
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Optional ordered projection; empty means all columns.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Platform-specific filter fragment, used verbatim where supported.
    #[serde(default)]
    pub raw_query: Option<String>,
}

impl DatasetQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_raw_query(mut self, fragment: impl Into<String>) -> Self {
        self.raw_query = Some(fragment.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.columns.is_empty()
            && self.limit.is_none()
            && self.raw_query.is_none()
    }
}
