/// Keyed upsert into base_fundamentals_info
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::config::UpsertPolicy;
use crate::db::DbPool;
use crate::error::Result;
use crate::sink::Sink;
use crate::types::{FundamentalRecord, InstrumentId, ReportPeriod, SinkKind};

/// Absent incoming values keep whatever is stored
const UPSERT_MERGE_PRESENT: &str = "
    INSERT INTO base_fundamentals_info
        (ts_code, stock_code, stock_name, disclosure_date, report_period,
         total_share, float_share, create_time, update_time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
    ON CONFLICT (ts_code) DO UPDATE SET
        stock_code      = excluded.stock_code,
        stock_name      = COALESCE(excluded.stock_name, base_fundamentals_info.stock_name),
        disclosure_date = COALESCE(excluded.disclosure_date, base_fundamentals_info.disclosure_date),
        report_period   = COALESCE(excluded.report_period, base_fundamentals_info.report_period),
        total_share     = COALESCE(excluded.total_share, base_fundamentals_info.total_share),
        float_share     = COALESCE(excluded.float_share, base_fundamentals_info.float_share),
        update_time     = excluded.update_time
";

const UPSERT_OVERWRITE: &str = "
    INSERT INTO base_fundamentals_info
        (ts_code, stock_code, stock_name, disclosure_date, report_period,
         total_share, float_share, create_time, update_time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
    ON CONFLICT (ts_code) DO UPDATE SET
        stock_code      = excluded.stock_code,
        stock_name      = excluded.stock_name,
        disclosure_date = excluded.disclosure_date,
        report_period   = excluded.report_period,
        total_share     = excluded.total_share,
        float_share     = excluded.float_share,
        update_time     = excluded.update_time
";

/// Row as stored, including bookkeeping timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFundamentals {
    pub ts_code: InstrumentId,
    pub stock_code: Option<String>,
    pub stock_name: Option<String>,
    pub disclosure_date: Option<NaiveDate>,
    pub report_period: Option<ReportPeriod>,
    pub total_share: Option<f64>,
    pub float_share: Option<f64>,
    pub create_time: String,
    pub update_time: String,
}

pub struct SqliteSink {
    pool: DbPool,
    policy: UpsertPolicy,
}

impl SqliteSink {
    pub fn new(pool: DbPool, policy: UpsertPolicy) -> Self {
        SqliteSink { pool, policy }
    }

    pub fn count_rows(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM base_fundamentals_info", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn fetch_row(&self, id: &InstrumentId) -> Result<Option<StoredFundamentals>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT ts_code, stock_code, stock_name, disclosure_date, report_period,
                        total_share, float_share, create_time, update_time
                 FROM base_fundamentals_info WHERE ts_code = ?1",
                params![id.as_str()],
                |row| {
                    let period: Option<String> = row.get(4)?;
                    Ok(StoredFundamentals {
                        ts_code: InstrumentId::from(row.get::<_, String>(0)?),
                        stock_code: row.get(1)?,
                        stock_name: row.get(2)?,
                        disclosure_date: row.get(3)?,
                        report_period: period.and_then(|p| p.parse().ok()),
                        total_share: row.get(5)?,
                        float_share: row.get(6)?,
                        create_time: row.get(7)?,
                        update_time: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

/// Upsert one batch inside a single transaction; on error nothing is committed
pub fn upsert_batch(pool: &DbPool, batch: &[FundamentalRecord], policy: UpsertPolicy) -> Result<usize> {
    let sql = match policy {
        UpsertPolicy::MergePresent => UPSERT_MERGE_PRESENT,
        UpsertPolicy::Overwrite => UPSERT_OVERWRITE,
    };

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let mut affected = 0;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for record in batch {
            affected += stmt.execute(params![
                record.ts_code.as_str(),
                record.ts_code.code(),
                record.stock_name.as_deref(),
                record.disclosure_date,
                record.report_period.map(|p| p.to_string()),
                record.total_share,
                record.float_share,
                now,
            ])?;
        }
    }
    tx.commit()?;

    debug!("Upserted {} fundamentals rows", affected);
    Ok(affected)
}

#[async_trait]
impl Sink for SqliteSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Database
    }

    async fn flush(&self, batch: &[FundamentalRecord]) -> Result<usize> {
        let pool = self.pool.clone();
        let policy = self.policy;
        let batch = batch.to_vec();

        let affected = tokio::task::spawn_blocking(move || upsert_batch(&pool, &batch, policy)).await??;
        Ok(affected)
    }
}
