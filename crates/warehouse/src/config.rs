use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local cache (CMSDATA_CACHE_DIR). Bulk downloads live
    /// in a `downloads/` subdirectory.
    pub cache_dir: PathBuf,
    /// Optional Socrata application token (SOCRATA_APP_TOKEN).
    pub socrata_app_token: Option<String>,
    /// Row cap applied when a direct query sets no limit.
    pub default_limit: usize,
    /// Row cap applied when a table load sets no limit.
    pub max_records: usize,
    /// How long a cache entry stays fresh.
    pub cache_ttl_secs: u64,
    /// Minimum spacing between requests to any one platform.
    pub request_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let cache_dir = std::env::var("CMSDATA_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_dir());
        let socrata_app_token = std::env::var("SOCRATA_APP_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Self {
            cache_dir,
            socrata_app_token,
            ..Self::default()
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            socrata_app_token: None,
            default_limit: 1_000,
            max_records: 50_000,
            cache_ttl_secs: 86_400 * 7,
            request_interval: Duration::from_millis(200),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".cache").join("cmsdata"),
        Err(_) => PathBuf::from(".cmsdata-cache"),
    }
}
