/// Sync orchestrator: universe → queue → collector → persister → statistics
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::provider::{ProviderGateway, UniverseProvider};
use crate::sink::Sink;
use crate::sync::collector::Collector;
use crate::sync::persister::{BatchPersister, FlushPolicy};
use crate::sync::queue::WorkQueue;
use crate::sync::stats::{RunStatistics, StatsAggregator};
use crate::types::{InstrumentId, RunState};
use crate::utils::{config_fingerprint, limiters_for, Clock, TokioClock};

/// Outcome buffer per worker between the pool and the persister
const OUTCOME_BUFFER_PER_WORKER: usize = 64;

pub struct SyncOrchestrator {
    config: SyncConfig,
    universe: Arc<dyn UniverseProvider>,
    gateway: Arc<dyn ProviderGateway>,
    sinks: Vec<Arc<dyn Sink>>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<RunState>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        universe: Arc<dyn UniverseProvider>,
        gateway: Arc<dyn ProviderGateway>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        SyncOrchestrator {
            config,
            universe,
            gateway,
            sinks,
            clock: Arc::new(TokioClock),
            state,
        }
    }

    /// Replace the time source used by rate limiters and the deadline timer
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        info!("🔄 Run state: {} → {}", previous.as_str(), next.as_str());
    }

    /// Execute one run. Per-record failures are folded into the returned
    /// statistics; only precondition and session failures return `Err`.
    pub async fn run(&self) -> Result<RunStatistics> {
        if self.state() != RunState::Idle {
            return Err(SyncError::InvalidParameter(format!(
                "orchestrator already used (state {})",
                self.state().as_str()
            )));
        }

        let started = Instant::now();
        let tz = self.config.timezone()?;
        let fingerprint = config_fingerprint(&self.config)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        self.transition(RunState::Running);

        info!("🚀 Starting fundamentals sync {}", run_id);
        info!(
            "   Workers: {}, max attempts: {}, status: {}, dry run: {}",
            self.config.workers, self.config.max_attempts, self.config.list_status, self.config.dry_run
        );
        info!("   Gateway: {}, config fingerprint: {}", self.gateway.name(), fingerprint);

        let ids = match self.universe.list_instruments(self.config.list_status).await {
            Ok(ids) => dedupe(ids),
            Err(e) => {
                error!("❌ Universe resolution failed: {}", e);
                self.transition(RunState::Failed);
                return Err(match e {
                    SyncError::UniverseFailed(_) => e,
                    other => SyncError::UniverseFailed(other.to_string()),
                });
            }
        };

        let names = if ids.is_empty() {
            HashMap::new()
        } else {
            match self.universe.instrument_names(self.config.list_status).await {
                Ok(names) => names,
                Err(e) => {
                    warn!("⚠️  Could not load instrument names, records keep provider names: {}", e);
                    HashMap::new()
                }
            }
        };

        let mut stats = RunStatistics::new(run_id, fingerprint, ids.len(), self.config.dry_run);
        for kind in self.lane_sinks().iter().map(|s| s.kind()) {
            stats.sinks.entry(kind).or_default();
        }

        if ids.is_empty() {
            info!("Universe is empty, nothing to sync");
            self.transition(RunState::Draining);
            let stats = StatsAggregator::new(stats).finish(RunState::Completed, started.elapsed());
            self.transition(RunState::Completed);
            self.report(&stats, tz);
            return Ok(stats);
        }

        let workers = self.config.workers.max(1).min(ids.len());
        let queue = Arc::new(WorkQueue::new(ids));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let aggregator = StatsAggregator::new(stats).spawn(events_rx);

        let (outcomes_tx, outcomes_rx) = mpsc::channel(workers * OUTCOME_BUFFER_PER_WORKER);
        let persister = self.build_persister().spawn(outcomes_rx, events_tx.clone());

        let deadline = self.config.deadline().map(|limit| {
            let queue = Arc::clone(&queue);
            let sleep = self.clock.sleep(limit);
            tokio::spawn(async move {
                sleep.await;
                warn!("⏰ Run deadline of {:?} reached, no new items will start", limit);
                queue.halt();
            })
        });

        let limiters = limiters_for(&self.config.rate_limit, workers, Arc::clone(&self.clock));
        let collector = Collector::new(Arc::clone(&self.gateway), limiters)
            .with_max_attempts(self.config.max_attempts)
            .with_fetch_timeout(self.config.fetch_timeout())
            .with_names(Arc::new(names))
            .with_timings(events_tx);

        let collected = collector.run(Arc::clone(&queue), outcomes_tx).await;
        if let Some(timer) = deadline {
            timer.abort();
        }

        self.transition(RunState::Draining);
        let persisted = persister.await.map_err(SyncError::from).and_then(|r| r);
        let aggregator = aggregator.await?;

        let fatal = match (collected.fatal, persisted) {
            (Some(e), _) => Some(e),
            (None, Err(e)) => Some(e),
            (None, Ok(())) => None,
        };
        let final_state = if fatal.is_some() { RunState::Failed } else { RunState::Completed };

        let mut stats = aggregator.finish(final_state, started.elapsed());
        stats.fetch_attempts = collected.fetch_attempts;
        stats.fatal_error = fatal.as_ref().map(|e| e.to_string());
        self.transition(final_state);

        self.report(&stats, tz);
        match fatal {
            Some(e) => {
                error!("❌ Sync aborted [{}]: {}", e.error_code(), e);
                Err(e)
            }
            None => Ok(stats),
        }
    }

    fn lane_sinks(&self) -> Vec<Arc<dyn Sink>> {
        let enabled = self.config.enabled_sinks();
        self.sinks
            .iter()
            .filter(|sink| enabled.contains(&sink.kind()))
            .cloned()
            .collect()
    }

    fn build_persister(&self) -> BatchPersister {
        let policy = FlushPolicy {
            max_attempts: self.config.persist.max_flush_attempts,
            retry_delay: self.config.persist.retry_delay(),
        };
        self.lane_sinks()
            .into_iter()
            .fold(BatchPersister::new(policy, self.config.dry_run), |persister, sink| {
                let batch_size = self.config.batch_size(sink.kind());
                persister.with_sink(sink, batch_size)
            })
    }

    fn report(&self, stats: &RunStatistics, tz: Tz) {
        for line in stats.summary().lines() {
            info!("{}", line);
        }

        if let Some(dir) = &self.config.report_dir {
            match write_report(dir, stats, tz) {
                Ok(path) => info!("📝 Run report written to {}", path.display()),
                Err(e) => warn!("⚠️  Could not write run report: {}", e),
            }
        }
    }
}

/// Drop repeated identifiers, keeping first-seen order
fn dedupe(ids: Vec<InstrumentId>) -> Vec<InstrumentId> {
    let total = ids.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<InstrumentId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    if unique.len() < total {
        warn!("Universe listed {} duplicate identifiers, ignoring repeats", total - unique.len());
    }
    unique
}

/// `{dir}/sync_report_YYYYMMDD_HHMMSS.json`, stamped in market time
pub fn write_report(dir: &Path, stats: &RunStatistics, tz: Tz) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = stats.started_at.with_timezone(&tz).format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("sync_report_{}.json", stamp));
    let json = serde_json::to_string_pretty(stats)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Blocking entry point: builds a runtime and drives one run to a terminal state
pub fn run_sync_blocking(orchestrator: &SyncOrchestrator) -> Result<RunStatistics> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(orchestrator.run())
}
