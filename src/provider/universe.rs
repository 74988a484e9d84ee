/// Sources for the instrument universe of a run
use async_trait::async_trait;
use rusqlite::params;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::db::DbPool;
use crate::error::{Result, SyncError};
use crate::types::{InstrumentId, ListStatus};

#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Ordered identifiers matching `status`
    async fn list_instruments(&self, status: ListStatus) -> Result<Vec<InstrumentId>>;

    /// Display names for instruments matching `status`; may be partial
    async fn instrument_names(&self, _status: ListStatus) -> Result<HashMap<InstrumentId, String>> {
        Ok(HashMap::new())
    }
}

/// Fixed universe, optionally keyed by listing status
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    by_status: HashMap<ListStatus, Vec<InstrumentId>>,
    names: HashMap<InstrumentId, String>,
}

#[derive(Debug, Deserialize)]
struct UniverseRow {
    ts_code: String,
    #[serde(default)]
    list_status: Option<ListStatus>,
    #[serde(default)]
    stock_name: Option<String>,
}

impl StaticUniverse {
    /// Every identifier counts as listed
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        Self::default().with_status(ListStatus::Listed, ids)
    }

    pub fn with_status<I, S>(mut self, status: ListStatus, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        self.by_status
            .entry(status)
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = (S, String)>,
        S: Into<InstrumentId>,
    {
        self.names
            .extend(names.into_iter().map(|(id, name)| (id.into(), name)));
        self
    }

    /// Read `ts_code[,list_status][,stock_name]` rows; a missing status means listed
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| {
            SyncError::UniverseFailed(format!("Cannot open universe file {}: {}", path.display(), e))
        })?;

        let mut universe = StaticUniverse::default();
        for row in reader.deserialize::<UniverseRow>() {
            let row = row.map_err(|e| {
                SyncError::UniverseFailed(format!("Bad row in {}: {}", path.display(), e))
            })?;
            let status = row.list_status.unwrap_or_default();
            let id = InstrumentId::from(row.ts_code.trim());
            if let Some(name) = row.stock_name.filter(|name| !name.trim().is_empty()) {
                universe.names.insert(id.clone(), name.trim().to_string());
            }
            universe.by_status.entry(status).or_default().push(id);
        }
        Ok(universe)
    }
}

#[async_trait]
impl UniverseProvider for StaticUniverse {
    async fn list_instruments(&self, status: ListStatus) -> Result<Vec<InstrumentId>> {
        Ok(self.by_status.get(&status).cloned().unwrap_or_default())
    }

    async fn instrument_names(&self, status: ListStatus) -> Result<HashMap<InstrumentId, String>> {
        let Some(ids) = self.by_status.get(&status) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.names.get(id).map(|name| (id.clone(), name.clone())))
            .collect())
    }
}

/// `base_stock_info` table in the shared database
pub struct SqliteUniverse {
    pool: DbPool,
}

impl SqliteUniverse {
    pub fn new(pool: DbPool) -> Self {
        SqliteUniverse { pool }
    }
}

fn query_instruments(pool: &DbPool, status: ListStatus) -> Result<Vec<InstrumentId>> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT ts_code FROM base_stock_info WHERE list_status = ?1 ORDER BY ts_code")?;
    let ids = stmt
        .query_map(params![status.as_code()], |row| row.get::<_, String>(0))?
        .map(|code| code.map(InstrumentId::from))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn query_names(pool: &DbPool, status: ListStatus) -> Result<HashMap<InstrumentId, String>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT ts_code, stock_name FROM base_stock_info
         WHERE list_status = ?1 AND stock_name IS NOT NULL AND stock_name != ''",
    )?;
    let names = stmt
        .query_map(params![status.as_code()], |row| {
            Ok((InstrumentId::from(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(names)
}

#[async_trait]
impl UniverseProvider for SqliteUniverse {
    async fn list_instruments(&self, status: ListStatus) -> Result<Vec<InstrumentId>> {
        let pool = self.pool.clone();
        let ids = tokio::task::spawn_blocking(move || query_instruments(&pool, status))
            .await?
            .map_err(|e| SyncError::UniverseFailed(e.to_string()))?;

        info!("📋 Universe: {} instruments with status {}", ids.len(), status);
        Ok(ids)
    }

    async fn instrument_names(&self, status: ListStatus) -> Result<HashMap<InstrumentId, String>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || query_names(&pool, status)).await?
    }
}
