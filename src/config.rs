use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::calendar::{CalendarError, OfferedDates};
use crate::sync::SyncConfig;

/// Process configuration, read from `ALMOCO_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub table: String,
    pub dates: OfferedDates,
    pub store_timeout: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Dates(CalendarError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: `{value}`"),
            ConfigError::Dates(e) => write!(f, "invalid ALMOCO_DATES: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match lookup("ALMOCO_DATA_DIR").as_deref() {
            Some("memory") => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(PathBuf::from("./data")),
        };
        let table = lookup("ALMOCO_TABLE").unwrap_or_else(|| "lunch_bookings".into());
        let dates = match lookup("ALMOCO_DATES") {
            Some(list) => OfferedDates::parse_list(&list),
            None => OfferedDates::weekends_of(2025, 9),
        }
        .map_err(ConfigError::Dates)?;
        let store_timeout = parse(&lookup, "ALMOCO_STORE_TIMEOUT_MS")?
            .map_or(Duration::from_secs(10), Duration::from_millis);
        let compact_threshold = parse(&lookup, "ALMOCO_COMPACT_THRESHOLD")?.unwrap_or(1000);
        let metrics_port = parse(&lookup, "ALMOCO_METRICS_PORT")?;

        Ok(Self {
            data_dir,
            table,
            dates,
            store_timeout,
            compact_threshold,
            metrics_port,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            table: self.table.clone(),
            store_timeout: self.store_timeout,
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
