/// Persistence targets for completed fundamentals records
pub mod csv;
pub mod sqlite;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;
use crate::types::{FundamentalRecord, SinkKind};

pub use self::csv::{CsvSink, FundamentalRow};
pub use self::sqlite::{SqliteSink, StoredFundamentals};

/// One flushable persistence target
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// File the most recent successful flush landed in, for sinks that write files
    fn location(&self) -> Option<PathBuf> {
        None
    }

    /// Persist one batch, returning rows written. A failed flush must leave
    /// the target as if the batch was never attempted, or be safe to repeat.
    async fn flush(&self, batch: &[FundamentalRecord]) -> Result<usize>;
}
