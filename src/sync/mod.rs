/// Synchronization engine
pub mod collector;
pub mod orchestrator;
pub mod persister;
pub mod queue;
pub mod stats;

pub use collector::{Collector, CollectorReport};
pub use orchestrator::{run_sync_blocking, write_report, SyncOrchestrator};
pub use persister::{flush_with_retry, BatchPersister, FlushPolicy, PersistFailure};
pub use queue::WorkQueue;
pub use stats::{FetchFailure, RunStatistics, SinkStats, StatsAggregator, StatsEvent};
