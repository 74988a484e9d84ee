pub mod loader;
pub mod settings;

pub use loader::{load_config, validate_config};
pub use settings::{
    CsvSinkConfig, DatabaseSinkConfig, LimiterScope, PersistConfig, RateLimitConfig, SyncConfig,
    UpsertPolicy,
};
