/// Resolved run parameters for one sync run
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::types::{ListStatus, SinkKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    // Worker pool
    pub workers: usize,
    pub max_attempts: u32,
    pub fetch_timeout_secs: u64,

    // Run control
    pub dry_run: bool,
    pub list_status: ListStatus,
    pub deadline_secs: Option<u64>,

    /// Timezone used for the date stamp on output files
    pub timezone: String,
    pub report_dir: Option<PathBuf>,

    pub rate_limit: RateLimitConfig,
    pub csv: CsvSinkConfig,
    pub database: DatabaseSinkConfig,
    pub persist: PersistConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            workers: 6,
            max_attempts: 3,
            fetch_timeout_secs: 30,
            dry_run: false,
            list_status: ListStatus::Listed,
            deadline_secs: None,
            timezone: "Asia/Shanghai".to_string(),
            report_dir: None,
            rate_limit: RateLimitConfig::default(),
            csv: CsvSinkConfig::default(),
            database: DatabaseSinkConfig::default(),
            persist: PersistConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| SyncError::ConfigError(format!("Invalid timezone {}: {}", self.timezone, e)))
    }

    pub fn enabled_sinks(&self) -> Vec<SinkKind> {
        let mut sinks = Vec::new();
        if self.csv.enabled {
            sinks.push(SinkKind::Csv);
        }
        if self.database.enabled {
            sinks.push(SinkKind::Database);
        }
        sinks
    }

    pub fn batch_size(&self, kind: SinkKind) -> usize {
        match kind {
            SinkKind::Csv => self.csv.batch_size,
            SinkKind::Database => self.database.batch_size,
        }
    }
}

/// Provider call budget. `calls_per_period <= 0` disables limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub calls_per_period: i64,
    pub period_ms: u64,
    pub scope: LimiterScope,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            calls_per_period: 50,
            period_ms: 1000,
            scope: LimiterScope::Global,
        }
    }
}

impl RateLimitConfig {
    pub fn is_unlimited(&self) -> bool {
        self.calls_per_period <= 0
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    /// One window shared by every worker
    Global,
    /// Independent window per worker
    PerWorker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSinkConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub output_dir: PathBuf,
}

impl Default for CsvSinkConfig {
    fn default() -> Self {
        CsvSinkConfig {
            enabled: true,
            batch_size: 150,
            output_dir: PathBuf::from("data/csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSinkConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub batch_size: usize,
    pub pool_size: u32,
    pub checkout_timeout_secs: u64,
    pub upsert_policy: UpsertPolicy,
}

impl Default for DatabaseSinkConfig {
    fn default() -> Self {
        DatabaseSinkConfig {
            enabled: true,
            path: PathBuf::from("data/fundamentals.db"),
            batch_size: 150,
            pool_size: 4,
            checkout_timeout_secs: 30,
            upsert_policy: UpsertPolicy::MergePresent,
        }
    }
}

impl DatabaseSinkConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }
}

/// How an upsert treats absent fields of an incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertPolicy {
    /// Absent incoming values keep the stored value
    MergePresent,
    /// Every non-key column takes the incoming value, nulls included
    Overwrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub max_flush_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            max_flush_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

impl PersistConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
