/// Fundamentals sync: fetch per-instrument fundamentals and persist them to CSV and SQLite
/// Usage: cargo run --release -- --snapshot data/snapshot.csv
use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fundsync::config::{load_config, validate_config};
use fundsync::db::{self, DbPool};
use fundsync::provider::{ProviderGateway, SnapshotGateway, SqliteUniverse, StaticUniverse, UniverseProvider};
use fundsync::sink::{CsvSink, Sink, SqliteSink};
use fundsync::{ListStatus, SyncConfig, SyncOrchestrator};

#[derive(Debug, Parser)]
#[command(name = "fundsync", version, about = "Concurrent fundamentals sync into CSV and SQLite")]
struct Cli {
    /// Config file (TOML); missing file means defaults plus environment
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[arg(long)]
    workers: Option<usize>,

    /// Batch size for both sinks
    #[arg(long)]
    batch_size: Option<usize>,

    /// Fetch everything but persist nothing
    #[arg(long)]
    dry_run: bool,

    /// L (listed), D (delisted) or P (suspended)
    #[arg(long)]
    list_status: Option<ListStatus>,

    /// Provider calls per second; 0 or less disables limiting
    #[arg(long, allow_hyphen_values = true)]
    qps_limit: Option<i64>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    no_csv: bool,

    #[arg(long)]
    no_db: bool,

    #[arg(long)]
    deadline_secs: Option<u64>,

    /// CSV of ts_code[,list_status] used instead of the base_stock_info table
    #[arg(long)]
    universe_file: Option<PathBuf>,

    /// Provider snapshot CSV served by the bundled gateway
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.csv.batch_size = batch_size;
            config.database.batch_size = batch_size;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(status) = self.list_status {
            config.list_status = status;
        }
        if let Some(qps) = self.qps_limit {
            config.rate_limit.calls_per_period = qps;
            config.rate_limit.period_ms = 1000;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if self.no_csv {
            config.csv.enabled = false;
        }
        if self.no_db {
            config.database.enabled = false;
        }
        if let Some(deadline) = self.deadline_secs {
            config.deadline_secs = Some(deadline);
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    info!("🚀 Fundamentals Sync");
    info!("============================================");

    match run(cli).await {
        Ok(()) => {
            info!("✅ All done!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Sync failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("📋 Loading configuration from {}", cli.config.display());
    let mut config = load_config(&cli.config)?;
    cli.apply(&mut config);
    validate_config(&config)?;
    let tz = config.timezone()?;

    let pool = open_database(&config, cli.universe_file.is_none())?;

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    if config.csv.enabled {
        sinks.push(Arc::new(CsvSink::new(&config.csv.output_dir, tz)));
    }
    if let (true, Some(pool)) = (writes_database(&config), &pool) {
        sinks.push(Arc::new(SqliteSink::new(pool.clone(), config.database.upsert_policy)));
    }

    let universe: Arc<dyn UniverseProvider> = match (&cli.universe_file, pool) {
        (Some(path), _) => Arc::new(StaticUniverse::from_csv(path)?),
        (None, Some(pool)) => Arc::new(SqliteUniverse::new(pool)),
        (None, None) => bail!("no universe source: pass --universe-file or enable the database"),
    };

    let gateway: Arc<dyn ProviderGateway> = match &cli.snapshot {
        Some(path) => Arc::new(
            SnapshotGateway::from_csv(path, tz)
                .with_context(|| format!("loading snapshot {}", path.display()))?,
        ),
        None => bail!("no provider configured: pass --snapshot <csv>"),
    };

    let orchestrator = SyncOrchestrator::new(config, universe, gateway, sinks);
    let stats = orchestrator.run().await?;

    info!(
        "📊 {} of {} instruments synced ({:.1}%), {} persist failures",
        stats.succeeded,
        stats.total_targeted,
        stats.success_rate(),
        stats.persist_failed()
    );
    Ok(())
}

fn writes_database(config: &SyncConfig) -> bool {
    config.database.enabled && !config.dry_run
}

/// Open the pool only when something reads or writes the database. The schema
/// is created only for runs that persist, so a dry run leaves no tables behind.
fn open_database(config: &SyncConfig, universe_from_db: bool) -> anyhow::Result<Option<DbPool>> {
    if !writes_database(config) && !universe_from_db {
        return Ok(None);
    }

    info!("🗄️  Opening database {}", config.database.path.display());
    let pool = db::create_pool(&config.database)?;
    if writes_database(config) {
        db::init_schema(&pool)?;
    }
    Ok(Some(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.database.path = dir.join("fundamentals.db");
        config
    }

    fn has_table(pool: &DbPool, table: &str) -> bool {
        pool.get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            > 0
    }

    #[test]
    fn test_dry_run_with_file_universe_skips_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.dry_run = true;

        assert!(open_database(&config, false).unwrap().is_none());
        assert!(!config.database.path.exists());
    }

    #[test]
    fn test_dry_run_with_database_universe_creates_no_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.dry_run = true;

        let pool = open_database(&config, true).unwrap().unwrap();
        assert!(!has_table(&pool, "base_fundamentals_info"));
        assert!(!writes_database(&config));
    }

    #[test]
    fn test_persisting_run_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let pool = open_database(&config, false).unwrap().unwrap();
        assert!(has_table(&pool, "base_fundamentals_info"));
        assert!(has_table(&pool, "base_stock_info"));
    }
}
