use serde::{Deserialize, Serialize};

/// API platform that hosts a dataset. Each variant maps to a concrete
/// fetcher with its own query and pagination dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Socrata/SODA endpoints (data.medicare.gov, data.medicaid.gov, ...)
    Soda,
    /// data.cms.gov data-api/v1 endpoints
    CmsDataApi,
    /// NPPES NPI Registry provider lookup
    Npi,
    /// Direct CSV download, filtered locally after decode
    Bulk,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Soda => "soda",
            Platform::CmsDataApi => "cms_data_api",
            Platform::Npi => "npi",
            Platform::Bulk => "bulk",
        }
    }
}

/// CMS program area a dataset belongs to, used for catalog search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    HospitalCompare,
    NursingHome,
    PhysicianCompare,
    MedicareProvider,
    MedicarePartD,
    ProgramStatistics,
    OpenPayments,
    Medicaid,
    NpiRegistry,
    CostReports,
    HospitalReadmissions,
    QualityMeasures,
    Spending,
}

impl DataDomain {
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    pub fn as_str(&self) -> String {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => s,
            _ => String::new(),
        }
    }
}

/// Metadata for a dataset column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Column::default_type")]
    pub data_type: String,
    #[serde(default)]
    pub example: String,
}

impl Column {
    fn default_type() -> String {
        "text".to_string()
    }
}

/// Descriptor for a single dataset.
///
/// `id` is immutable and unique within a catalog snapshot: a four-by-four
/// for SODA datasets, a UUID for the CMS Data API, or a slug for bulk
/// downloads and the NPI registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Hosting domain, e.g. "data.cms.gov".
    #[serde(default)]
    pub domain: String,
    pub platform: Platform,
    pub data_domain: DataDomain,
    /// Full URL used to query data.
    pub api_endpoint: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub modified: String,
    /// Date range description.
    #[serde(default)]
    pub temporal: String,
    #[serde(default)]
    pub record_count: Option<u64>,
    /// Columns usable to relate rows across datasets, e.g. ["npi"].
    #[serde(default)]
    pub join_keys: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl Dataset {
    /// SQL-friendly name derived from the title, used as a default table
    /// alias when the caller does not pick one.
    pub fn slug(&self) -> String {
        let mut slug: String = self
            .title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        slug.truncate(40);
        while slug.contains("__") {
            slug = slug.replace("__", "_");
        }
        slug.trim_matches('_').to_string()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
