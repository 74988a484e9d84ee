/// Gateway serving fundamentals from a local CSV snapshot
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{ProviderError, Result};
use crate::provider::ProviderGateway;
use crate::sink::csv::read_rows;
use crate::types::{FundamentalRecord, InstrumentId, ReportPeriod};
use crate::utils::time::market_date;

pub struct SnapshotGateway {
    rows: HashMap<InstrumentId, Vec<FundamentalRecord>>,
    today: NaiveDate,
}

impl SnapshotGateway {
    /// Load a snapshot in the file sink's column layout
    pub fn from_csv(path: &Path, tz: Tz) -> Result<Self> {
        let today = market_date(Utc::now(), tz);
        let records = read_rows(path)?
            .into_iter()
            .map(|row| row.into_record(Utc::now()));
        let gateway = Self::from_records(records, today);

        info!(
            "📂 Loaded snapshot {} ({} instruments)",
            path.display(),
            gateway.rows.len()
        );
        Ok(gateway)
    }

    pub fn from_records(records: impl IntoIterator<Item = FundamentalRecord>, today: NaiveDate) -> Self {
        let mut rows: HashMap<InstrumentId, Vec<FundamentalRecord>> = HashMap::new();
        for record in records {
            rows.entry(record.ts_code.clone()).or_default().push(record);
        }
        SnapshotGateway { rows, today }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest recent quarter first, then the newest period on file
    fn select(&self, id: &InstrumentId) -> Option<&FundamentalRecord> {
        let candidates = self.rows.get(id)?;

        for period in ReportPeriod::recent_candidates(self.today) {
            if let Some(hit) = candidates.iter().find(|r| r.report_period == Some(period)) {
                return Some(hit);
            }
        }

        candidates.iter().max_by_key(|r| r.report_period)
    }
}

#[async_trait]
impl ProviderGateway for SnapshotGateway {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn fetch(&self, id: &InstrumentId) -> std::result::Result<Option<FundamentalRecord>, ProviderError> {
        Ok(self.select(id).map(|record| FundamentalRecord {
            fetched_at: Utc::now(),
            ..record.clone()
        }))
    }
}
