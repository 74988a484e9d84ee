/// Configuration loading: optional TOML file layered with FUNDSYNC_* environment variables
use std::path::Path;

use crate::config::settings::SyncConfig;
use crate::error::{Result, SyncError};

pub const ENV_PREFIX: &str = "FUNDSYNC";

/// Largest accepted `rate_limit.calls_per_period`
pub const MAX_CALLS_PER_PERIOD: i64 = 1_000_000;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path = path.as_ref();

    let config: SyncConfig = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| SyncError::ConfigError(format!("Failed to read config {}: {}", path.display(), e)))?
        .try_deserialize()
        .map_err(|e| SyncError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &SyncConfig) -> Result<()> {
    if config.workers == 0 {
        return Err(SyncError::ConfigError("workers must be >= 1".to_string()));
    }

    if config.max_attempts == 0 {
        return Err(SyncError::ConfigError("max_attempts must be >= 1".to_string()));
    }

    if !config.rate_limit.is_unlimited() && config.rate_limit.period_ms == 0 {
        return Err(SyncError::ConfigError(
            "rate_limit.period_ms must be > 0 when limiting is enabled".to_string(),
        ));
    }

    if config.rate_limit.calls_per_period > MAX_CALLS_PER_PERIOD {
        return Err(SyncError::ConfigError(format!(
            "rate_limit.calls_per_period must be <= {} (use 0 to disable limiting)",
            MAX_CALLS_PER_PERIOD
        )));
    }

    if config.csv.enabled && config.csv.batch_size == 0 {
        return Err(SyncError::ConfigError("csv.batch_size must be >= 1".to_string()));
    }

    if config.database.enabled {
        if config.database.batch_size == 0 {
            return Err(SyncError::ConfigError("database.batch_size must be >= 1".to_string()));
        }
        if config.database.pool_size == 0 {
            return Err(SyncError::ConfigError("database.pool_size must be >= 1".to_string()));
        }
    }

    if config.persist.max_flush_attempts == 0 {
        return Err(SyncError::ConfigError(
            "persist.max_flush_attempts must be >= 1".to_string(),
        ));
    }

    config.timezone()?;

    if config.enabled_sinks().is_empty() && !config.dry_run {
        return Err(SyncError::ConfigError(
            "No sink enabled; enable csv or database, or run with dry_run".to_string(),
        ));
    }

    Ok(())
}
