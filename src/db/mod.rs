/// SQLite connection pool and schema shared by the database sink and universe query
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseSinkConfig;
use crate::error::Result;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS base_fundamentals_info (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        ts_code         TEXT NOT NULL,
        stock_code      TEXT,
        stock_name      TEXT,
        disclosure_date TEXT,
        report_period   TEXT,
        total_share     REAL,
        float_share     REAL,
        create_time     TEXT NOT NULL,
        update_time     TEXT NOT NULL,
        CONSTRAINT uk_base_fundamentals_info_code UNIQUE (ts_code)
    );

    CREATE TABLE IF NOT EXISTS base_stock_info (
        ts_code     TEXT PRIMARY KEY,
        stock_code  TEXT,
        stock_name  TEXT,
        list_status TEXT NOT NULL DEFAULT 'L'
    );

    CREATE INDEX IF NOT EXISTS idx_base_stock_info_status ON base_stock_info(list_status);
";

/// Build the pool. Checkout blocks up to `checkout_timeout` when every
/// connection is in use, then fails.
pub fn create_pool(config: &DatabaseSinkConfig) -> Result<DbPool> {
    if let Some(dir) = config.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(30))
    });

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .min_idle(Some(1))
        .connection_timeout(config.checkout_timeout())
        .build(manager)?;

    debug!(
        "Created SQLite pool for {} (max {} connections)",
        config.path.display(),
        config.pool_size
    );
    Ok(pool)
}

pub fn init_schema(pool: &DbPool) -> Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    info!("Database schema ready");
    Ok(())
}

/// Open a pool on `path` with default settings and make sure the schema exists
pub fn open(path: &Path) -> Result<DbPool> {
    let config = DatabaseSinkConfig {
        path: path.to_path_buf(),
        ..DatabaseSinkConfig::default()
    };
    let pool = create_pool(&config)?;
    init_schema(&pool)?;
    Ok(pool)
}
