use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends before the compactor rewrites the file.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub stats_cache_ttl: Duration,
    /// Period of the statistics summary logged by the binary.
    pub report_interval: Duration,
    /// JSON file of rooms and users loaded into the directory at startup.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            stats_cache_ttl: Duration::from_secs(30),
            report_interval: Duration::from_secs(300),
            seed_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            parsed::<u64>(&lookup, key).map_or(default, Duration::from_secs)
        };
        // Timer periods feed `tokio::time::interval`, which rejects zero.
        let period = |key: &str, default: Duration| match parsed::<u64>(&lookup, key) {
            Some(0) => {
                tracing::warn!("ignoring {key}=0, a period must be positive; using the default");
                default
            }
            Some(n) => Duration::from_secs(n),
            None => default,
        };
        Self {
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            compact_interval: period("ROOMBOOK_COMPACT_INTERVAL_SECS", defaults.compact_interval),
            stats_cache_ttl: secs("ROOMBOOK_STATS_CACHE_TTL_SECS", defaults.stats_cache_ttl),
            report_interval: period("ROOMBOOK_REPORT_INTERVAL_SECS", defaults.report_interval),
            seed_file: lookup("ROOMBOOK_SEED_FILE").map(PathBuf::from),
        }
    }
}

/// `None` when unset. A malformed value is logged and also yields `None`.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring malformed {key}={raw:?}, using the default");
            None
        }
    }
}
