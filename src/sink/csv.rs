/// Append-only CSV audit trail, one file per market day
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};

use crate::error::{Result, SyncError};
use crate::sink::Sink;
use crate::types::{FundamentalRecord, InstrumentId, ReportPeriod, SinkKind};
use crate::utils::time::{date_stamp, market_date};

pub const DATA_TYPE: &str = "base_fundamentals_info";

/// Column layout shared by the file sink and snapshot files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRow {
    pub ts_code: String,
    pub stock_name: Option<String>,
    pub disclosure_date: Option<NaiveDate>,
    pub report_period: Option<ReportPeriod>,
    pub total_share: Option<f64>,
    pub float_share: Option<f64>,
}

impl FundamentalRow {
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> FundamentalRecord {
        FundamentalRecord {
            ts_code: InstrumentId::from(self.ts_code),
            stock_name: self.stock_name,
            disclosure_date: self.disclosure_date,
            report_period: self.report_period,
            total_share: self.total_share,
            float_share: self.float_share,
            fetched_at,
        }
    }
}

impl From<&FundamentalRecord> for FundamentalRow {
    fn from(record: &FundamentalRecord) -> Self {
        FundamentalRow {
            ts_code: record.ts_code.to_string(),
            stock_name: record.stock_name.clone(),
            disclosure_date: record.disclosure_date,
            report_period: record.report_period,
            total_share: record.total_share,
            float_share: record.float_share,
        }
    }
}

pub struct CsvSink {
    output_dir: PathBuf,
    tz: Tz,
    last_written: Mutex<Option<PathBuf>>,
}

impl CsvSink {
    pub fn new(output_dir: impl Into<PathBuf>, tz: Tz) -> Self {
        CsvSink {
            output_dir: output_dir.into(),
            tz,
            last_written: Mutex::new(None),
        }
    }

    /// `{output_dir}/base_fundamentals_info/base_fundamentals_info_YYYYMMDD.csv`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.output_dir
            .join(DATA_TYPE)
            .join(format!("{}_{}.csv", DATA_TYPE, date_stamp(date)))
    }

    pub fn current_path(&self) -> PathBuf {
        self.path_for(market_date(Utc::now(), self.tz))
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Csv
    }

    fn location(&self) -> Option<PathBuf> {
        self.last_written.lock().ok().and_then(|last| last.clone())
    }

    async fn flush(&self, batch: &[FundamentalRecord]) -> Result<usize> {
        let path = self.current_path();
        let rows: Vec<FundamentalRow> = batch.iter().map(FundamentalRow::from).collect();

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || append_rows(&target, &rows)).await??;
        if let Ok(mut last) = self.last_written.lock() {
            *last = Some(path);
        }
        Ok(written)
    }
}

/// Append rows in arrival order; the header goes in only when the file is new
pub fn append_rows(path: &Path, rows: &[FundamentalRow]) -> Result<usize> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let written = append_batch(&mut file, rows)?;

    debug!("Appended {} rows to {}", written, path.display());
    Ok(written)
}

/// File that a batch can be appended to and cut back to an earlier length
pub trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Encode the whole batch first, then append it in one write. A failed write
/// is cut back to the original length so a retry cannot duplicate rows.
pub fn append_batch<T: AppendTarget>(target: &mut T, rows: &[FundamentalRow]) -> Result<usize> {
    let original = target.current_len()?;
    let bytes = encode_rows(rows, original == 0)?;

    if let Err(e) = target.write_all(&bytes).and_then(|()| target.sync()) {
        if let Err(rollback) = target.truncate_to(original) {
            error!("❌ Could not roll back partial CSV batch: {}", rollback);
        }
        return Err(e.into());
    }
    Ok(rows.len())
}

fn encode_rows(rows: &[FundamentalRow], with_header: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| SyncError::from(e.into_error()))
}

/// Read every row of a fundamentals CSV
pub fn read_rows(path: &Path) -> Result<Vec<FundamentalRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}
