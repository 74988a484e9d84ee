pub mod types;
pub mod error;
pub mod config;
pub mod utils;
pub mod db;
pub mod sink;
pub mod provider;
pub mod sync;

pub use types::*;
pub use error::{ProviderError, Result, SyncError};
pub use crate::config::SyncConfig;
pub use sync::{run_sync_blocking, RunStatistics, SyncOrchestrator};
