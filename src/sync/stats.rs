/// Run statistics, owned by the orchestrator and fed over a channel
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::sync::persister::PersistFailure;
use crate::types::{InstrumentId, RunState, SinkKind};

/// Everything that moves a counter. Workers never touch counters directly.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    Succeeded(InstrumentId),
    Empty(InstrumentId),
    Failed { id: InstrumentId, attempts: u32, cause: String },
    Skipped(InstrumentId),
    /// One provider call finished, whatever its result
    Fetched { id: InstrumentId, elapsed: Duration },
    Flushed {
        sink: SinkKind,
        records: usize,
        elapsed: Duration,
        location: Option<PathBuf>,
    },
    Discarded { sink: SinkKind, records: usize },
    PersistFailed(PersistFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkStats {
    pub batches: usize,
    pub persisted: usize,
    pub discarded: usize,
    pub persist_failed: usize,
    /// Wall time spent in successful flushes, retries included
    pub flush_ms: f64,
    /// Distinct files written, in first-write order
    pub files: Vec<PathBuf>,
}

impl SinkStats {
    pub fn avg_flush_ms(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.flush_ms / self.batches as f64
    }
}

/// Fetch failure kept for the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub id: InstrumentId,
    pub attempts: u32,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: String,
    pub config_fingerprint: String,
    pub state: RunState,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,

    pub total_targeted: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
    pub skipped: usize,
    pub fetch_attempts: u64,
    pub provider_calls: u64,
    pub provider_time_ms: f64,

    pub batches_flushed: usize,
    pub sinks: BTreeMap<SinkKind, SinkStats>,
    pub fetch_failures: Vec<FetchFailure>,
    pub persist_failures: Vec<PersistFailure>,
    pub fatal_error: Option<String>,
}

impl RunStatistics {
    pub fn new(run_id: String, config_fingerprint: String, total_targeted: usize, dry_run: bool) -> Self {
        RunStatistics {
            run_id,
            config_fingerprint,
            state: RunState::Running,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_ms: 0,
            total_targeted,
            succeeded: 0,
            empty: 0,
            failed: 0,
            skipped: 0,
            fetch_attempts: 0,
            provider_calls: 0,
            provider_time_ms: 0.0,
            batches_flushed: 0,
            sinks: BTreeMap::new(),
            fetch_failures: Vec::new(),
            persist_failures: Vec::new(),
            fatal_error: None,
        }
    }

    /// Items that reached a terminal classification
    pub fn terminal(&self) -> usize {
        self.succeeded + self.empty + self.failed + self.skipped
    }

    /// Records lost on persist, across sinks
    pub fn persist_failed(&self) -> usize {
        self.sinks.values().map(|s| s.persist_failed).sum()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Mean provider call time, timeouts included
    pub fn avg_provider_ms(&self) -> f64 {
        if self.provider_calls == 0 {
            return 0.0;
        }
        self.provider_time_ms / self.provider_calls as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_targeted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total_targeted as f64 * 100.0
    }

    /// Share of the universe that got an answer from the provider (data or empty)
    pub fn completion_rate(&self) -> f64 {
        if self.total_targeted == 0 {
            return 100.0;
        }
        (self.succeeded + self.empty) as f64 / self.total_targeted as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "═══════════════════════════════════════");
        let _ = writeln!(out, "📊 SYNC SUMMARY ({})", self.state.as_str());
        let _ = writeln!(out, "═══════════════════════════════════════");
        let _ = writeln!(out, "   Run:            {}", self.run_id);
        let _ = writeln!(out, "   Targeted:       {}", self.total_targeted);
        let _ = writeln!(out, "   Succeeded:      {}", self.succeeded);
        let _ = writeln!(out, "   Empty:          {}", self.empty);
        let _ = writeln!(out, "   Failed:         {}", self.failed);
        if self.skipped > 0 {
            let _ = writeln!(out, "   Skipped:        {}", self.skipped);
        }
        let _ = writeln!(out, "   Persist failed: {}", self.persist_failed());
        let _ = writeln!(out, "   Fetch attempts: {}", self.fetch_attempts);
        let _ = writeln!(
            out,
            "   Provider time:  {:.1}s over {} calls (avg {:.0}ms)",
            self.provider_time_ms / 1000.0,
            self.provider_calls,
            self.avg_provider_ms()
        );
        let _ = writeln!(out, "   Batches:        {}", self.batches_flushed);
        for (sink, stats) in &self.sinks {
            if self.dry_run {
                let _ = writeln!(out, "   [{}] discarded {} (dry run)", sink.as_str(), stats.discarded);
                continue;
            }
            let _ = writeln!(
                out,
                "   [{}] persisted {} in {} batches, lost {}",
                sink.as_str(),
                stats.persisted,
                stats.batches,
                stats.persist_failed
            );
            let _ = writeln!(
                out,
                "   [{}] flush time {:.1}s (avg {:.0}ms per batch)",
                sink.as_str(),
                stats.flush_ms / 1000.0,
                stats.avg_flush_ms()
            );
            for file in &stats.files {
                let _ = writeln!(out, "   [{}] file {}", sink.as_str(), file.display());
            }
        }
        let _ = writeln!(out, "   Success rate:   {:.1}%", self.success_rate());
        let _ = writeln!(out, "   Elapsed:        {:.1}s", self.elapsed().as_secs_f64());
        if let Some(error) = &self.fatal_error {
            let _ = writeln!(out, "   Fatal:          {}", error);
        }
        let _ = write!(out, "═══════════════════════════════════════");
        out
    }
}

/// Sole writer of [`RunStatistics`] while a run is live
pub struct StatsAggregator {
    stats: RunStatistics,
    next_quartile: usize,
}

impl StatsAggregator {
    pub fn new(stats: RunStatistics) -> Self {
        StatsAggregator { stats, next_quartile: 1 }
    }

    pub fn apply(&mut self, event: StatsEvent) {
        match event {
            StatsEvent::Succeeded(_) => self.stats.succeeded += 1,
            StatsEvent::Empty(_) => self.stats.empty += 1,
            StatsEvent::Failed { id, attempts, cause } => {
                self.stats.failed += 1;
                self.stats.fetch_failures.push(FetchFailure { id, attempts, cause });
            }
            StatsEvent::Skipped(_) => self.stats.skipped += 1,
            StatsEvent::Fetched { elapsed, .. } => {
                self.stats.provider_calls += 1;
                self.stats.provider_time_ms += elapsed.as_secs_f64() * 1000.0;
                return;
            }
            StatsEvent::Flushed { sink, records, elapsed, location } => {
                self.stats.batches_flushed += 1;
                let entry = self.stats.sinks.entry(sink).or_default();
                entry.batches += 1;
                entry.persisted += records;
                entry.flush_ms += elapsed.as_secs_f64() * 1000.0;
                if let Some(path) = location.filter(|path| !entry.files.contains(path)) {
                    entry.files.push(path);
                }
                return;
            }
            StatsEvent::Discarded { sink, records } => {
                self.stats.sinks.entry(sink).or_default().discarded += records;
                return;
            }
            StatsEvent::PersistFailed(failure) => {
                self.stats.sinks.entry(failure.sink).or_default().persist_failed += failure.ids.len();
                self.stats.persist_failures.push(failure);
                return;
            }
        }
        self.log_progress();
    }

    fn log_progress(&mut self) {
        let total = self.stats.total_targeted;
        if total == 0 || self.next_quartile > 4 {
            return;
        }
        let done = self.stats.terminal();
        if done * 4 >= total * self.next_quartile {
            info!(
                "📈 Progress: {}/{} ({}%) - {} ok, {} empty, {} failed",
                done,
                total,
                done * 100 / total,
                self.stats.succeeded,
                self.stats.empty,
                self.stats.failed
            );
            while self.next_quartile <= 4 && done * 4 >= total * self.next_quartile {
                self.next_quartile += 1;
            }
        }
    }

    /// Consume events until every sender is gone
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<StatsEvent>) -> JoinHandle<StatsAggregator> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.apply(event);
            }
            self
        })
    }

    pub fn finish(mut self, state: RunState, elapsed: Duration) -> RunStatistics {
        self.stats.state = state;
        self.stats.finished_at = Some(Utc::now());
        self.stats.elapsed_ms = elapsed.as_millis() as u64;
        self.stats
    }
}
