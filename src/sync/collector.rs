/// Concurrent collector: fixed worker pool draining the shared queue
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, Result, SyncError};
use crate::provider::ProviderGateway;
use crate::sync::queue::WorkQueue;
use crate::sync::stats::StatsEvent;
use crate::types::{InstrumentId, Outcome, WorkItem};
use crate::utils::RateLimiter;

/// What the pool reports once every worker is done
#[derive(Debug, Default)]
pub struct CollectorReport {
    pub fetch_attempts: u64,
    /// Items never attempted because admission stopped
    pub skipped: usize,
    /// Items waiting on a retry when admission stopped
    pub abandoned: usize,
    pub fatal: Option<SyncError>,
}

pub struct Collector {
    gateway: Arc<dyn ProviderGateway>,
    limiters: Vec<RateLimiter>,
    max_attempts: u32,
    fetch_timeout: Duration,
    names: Arc<HashMap<InstrumentId, String>>,
    timings: Option<mpsc::UnboundedSender<StatsEvent>>,
}

struct WorkerContext {
    gateway: Arc<dyn ProviderGateway>,
    queue: Arc<WorkQueue>,
    outcomes: mpsc::Sender<Outcome>,
    max_attempts: u32,
    fetch_timeout: Duration,
    names: Arc<HashMap<InstrumentId, String>>,
    timings: Option<mpsc::UnboundedSender<StatsEvent>>,
}

impl Collector {
    /// One worker per limiter
    pub fn new(gateway: Arc<dyn ProviderGateway>, limiters: Vec<RateLimiter>) -> Self {
        Collector {
            gateway,
            limiters,
            max_attempts: 3,
            fetch_timeout: Duration::from_secs(30),
            names: Arc::new(HashMap::new()),
            timings: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Names filled into records the provider returns without one
    pub fn with_names(mut self, names: Arc<HashMap<InstrumentId, String>>) -> Self {
        self.names = names;
        self
    }

    /// Report every provider call's duration as [`StatsEvent::Fetched`]
    pub fn with_timings(mut self, events: mpsc::UnboundedSender<StatsEvent>) -> Self {
        self.timings = Some(events);
        self
    }

    /// Run the pool to completion. `outcomes` is dropped only after every
    /// worker exited and leftover items were classified.
    pub async fn run(self, queue: Arc<WorkQueue>, outcomes: mpsc::Sender<Outcome>) -> CollectorReport {
        let ctx = Arc::new(WorkerContext {
            gateway: self.gateway,
            queue: Arc::clone(&queue),
            outcomes: outcomes.clone(),
            max_attempts: self.max_attempts,
            fetch_timeout: self.fetch_timeout,
            names: self.names,
            timings: self.timings,
        });

        info!("👷 Starting {} workers", self.limiters.len());
        let mut workers = JoinSet::new();
        for (worker_id, limiter) in self.limiters.into_iter().enumerate() {
            workers.spawn(run_worker(worker_id, Arc::clone(&ctx), limiter));
        }
        drop(ctx);

        let mut report = CollectorReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(attempts)) => report.fetch_attempts += attempts,
                Ok(Err(e)) => {
                    queue.halt();
                    report.fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!("❌ Worker task failed: {}", e);
                    queue.halt();
                    report.fatal.get_or_insert(SyncError::from(e));
                }
            }
        }

        for item in queue.drain_remaining() {
            let outcome = if item.attempts == 0 {
                report.skipped += 1;
                Outcome::Skipped(item.id)
            } else {
                report.abandoned += 1;
                Outcome::Failed {
                    id: item.id,
                    attempts: item.attempts,
                    cause: "run stopped before retry".to_string(),
                }
            };
            if outcomes.send(outcome).await.is_err() {
                error!("❌ Outcome channel closed while draining the queue");
                break;
            }
        }

        if report.skipped + report.abandoned > 0 {
            warn!(
                "⏹️  Admission stopped: {} never attempted, {} pending retry",
                report.skipped, report.abandoned
            );
        }
        report
    }
}

/// Returns the number of fetches this worker made
async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>, limiter: RateLimiter) -> Result<u64> {
    let mut attempts_made = 0u64;

    while let Some(mut item) = ctx.queue.next().await {
        limiter.acquire().await;

        item.attempts += 1;
        attempts_made += 1;

        let started = Instant::now();
        let result = match tokio::time::timeout(ctx.fetch_timeout, ctx.gateway.fetch(&item.id)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(ctx.fetch_timeout.as_secs())),
        };
        if let Some(timings) = &ctx.timings {
            let _ = timings.send(StatsEvent::Fetched {
                id: item.id.clone(),
                elapsed: started.elapsed(),
            });
        }

        match result {
            Ok(Some(mut record)) => {
                if record.stock_name.is_none() {
                    record.stock_name = ctx.names.get(&item.id).cloned();
                }
                debug!("[worker {}] ✓ {}", worker_id, item.id);
                emit(&ctx, Outcome::Success(record)).await?;
            }
            Ok(None) => {
                debug!("[worker {}] ∅ {} has no data", worker_id, item.id);
                emit(&ctx, Outcome::Empty(item.id)).await?;
            }
            Err(ProviderError::Session(message)) => {
                error!("🔒 [worker {}] provider session invalid: {}", worker_id, message);
                ctx.queue.halt();
                emit(&ctx, failed(item, format!("session error: {}", message))).await?;
                return Err(SyncError::Session(message));
            }
            Err(e) if e.is_retryable() && item.attempts < ctx.max_attempts => {
                debug!(
                    "[worker {}] {} attempt {}/{} failed: {}, requeued",
                    worker_id, item.id, item.attempts, ctx.max_attempts, e
                );
                ctx.queue.retry(item);
            }
            Err(e) => {
                warn!(
                    "⚠️  [worker {}] {} failed after {} attempts: {}",
                    worker_id, item.id, item.attempts, e
                );
                emit(&ctx, failed(item, e.to_string())).await?;
            }
        }
    }

    debug!("[worker {}] done after {} fetches", worker_id, attempts_made);
    Ok(attempts_made)
}

fn failed(item: WorkItem, cause: String) -> Outcome {
    Outcome::Failed {
        id: item.id,
        attempts: item.attempts,
        cause,
    }
}

/// Forward a terminal outcome, then release the item's in-flight slot
async fn emit(ctx: &WorkerContext, outcome: Outcome) -> Result<()> {
    let sent = ctx.outcomes.send(outcome).await;
    ctx.queue.complete();
    sent.map_err(|mpsc::error::SendError(lost)| {
        SyncError::TaskFailed(format!("outcome channel closed, {} dropped", lost.id()))
    })
}
