/// External collaborators: the data provider and the instrument universe
pub mod snapshot;
pub mod universe;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{FundamentalRecord, InstrumentId};

pub use snapshot::SnapshotGateway;
pub use universe::{SqliteUniverse, StaticUniverse, UniverseProvider};

/// One fetch per instrument. `Ok(None)` means the provider has no data for it.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, id: &InstrumentId) -> Result<Option<FundamentalRecord>, ProviderError>;
}
