/// Batch persister: per-sink buffers flushed at their own thresholds
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::sink::Sink;
use crate::sync::stats::StatsEvent;
use crate::types::{FundamentalRecord, InstrumentId, Outcome, SinkKind};

/// Records a sink could not persist after every flush attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistFailure {
    pub sink: SinkKind,
    pub ids: Vec<InstrumentId>,
    pub cause: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

struct Lane {
    sink: Arc<dyn Sink>,
    batch_size: usize,
}

pub struct BatchPersister {
    lanes: Vec<Lane>,
    policy: FlushPolicy,
    dry_run: bool,
}

impl BatchPersister {
    pub fn new(policy: FlushPolicy, dry_run: bool) -> Self {
        BatchPersister {
            lanes: Vec::new(),
            policy,
            dry_run,
        }
    }

    /// Add a sink with its own buffer and threshold
    pub fn with_sink(mut self, sink: Arc<dyn Sink>, batch_size: usize) -> Self {
        self.lanes.push(Lane {
            sink,
            batch_size: batch_size.max(1),
        });
        self
    }

    /// Start the router and one task per sink. The returned handle resolves
    /// once `outcomes` is closed and every sink has drained its last batch.
    pub fn spawn(
        self,
        mut outcomes: mpsc::Receiver<Outcome>,
        events: mpsc::UnboundedSender<StatsEvent>,
    ) -> JoinHandle<Result<()>> {
        let BatchPersister { lanes, policy, dry_run } = self;

        tokio::spawn(async move {
            let mut senders = Vec::with_capacity(lanes.len());
            let mut handles = Vec::with_capacity(lanes.len());
            for lane in lanes {
                // unbounded: a slow sink must not hold back the others
                let (tx, rx) = mpsc::unbounded_channel();
                senders.push((lane.sink.kind(), tx));
                handles.push(tokio::spawn(run_lane(lane, rx, events.clone(), policy, dry_run)));
            }

            while let Some(outcome) = outcomes.recv().await {
                let event = match outcome {
                    Outcome::Success(record) => {
                        let event = StatsEvent::Succeeded(record.ts_code.clone());
                        for (kind, tx) in &senders {
                            if tx.send(record.clone()).is_err() {
                                error!("❌ Sink lane {} closed early, record {} lost", kind.as_str(), record.ts_code);
                                let _ = events.send(StatsEvent::PersistFailed(PersistFailure {
                                    sink: *kind,
                                    ids: vec![record.ts_code.clone()],
                                    cause: "sink lane closed".to_string(),
                                }));
                            }
                        }
                        event
                    }
                    Outcome::Empty(id) => StatsEvent::Empty(id),
                    Outcome::Failed { id, attempts, cause } => StatsEvent::Failed { id, attempts, cause },
                    Outcome::Skipped(id) => StatsEvent::Skipped(id),
                };
                let _ = events.send(event);
            }

            debug!("Outcome stream closed, draining {} sink buffers", senders.len());
            drop(senders);

            let mut first_error = None;
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("❌ Sink lane task failed: {}", e);
                    first_error.get_or_insert(SyncError::from(e));
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

async fn run_lane(
    lane: Lane,
    mut records: mpsc::UnboundedReceiver<FundamentalRecord>,
    events: mpsc::UnboundedSender<StatsEvent>,
    policy: FlushPolicy,
    dry_run: bool,
) {
    let mut buffer = Vec::with_capacity(lane.batch_size);

    while let Some(record) = records.recv().await {
        buffer.push(record);
        if buffer.len() >= lane.batch_size {
            flush_buffer(&lane, &mut buffer, &events, policy, dry_run).await;
        }
    }

    // final partial batch, exactly once
    if !buffer.is_empty() {
        flush_buffer(&lane, &mut buffer, &events, policy, dry_run).await;
    }
    debug!("Sink lane {} drained", lane.sink.name());
}

async fn flush_buffer(
    lane: &Lane,
    buffer: &mut Vec<FundamentalRecord>,
    events: &mpsc::UnboundedSender<StatsEvent>,
    policy: FlushPolicy,
    dry_run: bool,
) {
    let kind = lane.sink.kind();

    if dry_run {
        debug!("Dry run: discarding {} records for {}", buffer.len(), lane.sink.name());
        let _ = events.send(StatsEvent::Discarded { sink: kind, records: buffer.len() });
        buffer.clear();
        return;
    }

    let started = Instant::now();
    match flush_with_retry(lane.sink.as_ref(), buffer.as_slice(), policy).await {
        Ok(_) => {
            let elapsed = started.elapsed();
            info!("💾 Flushed {} records to {} in {:?}", buffer.len(), lane.sink.name(), elapsed);
            let _ = events.send(StatsEvent::Flushed {
                sink: kind,
                records: buffer.len(),
                elapsed,
                location: lane.sink.location(),
            });
        }
        Err(e) => {
            error!(
                "❌ Giving up on {} records for {} after {} attempts: {}",
                buffer.len(),
                lane.sink.name(),
                policy.max_attempts,
                e
            );
            let _ = events.send(StatsEvent::PersistFailed(PersistFailure {
                sink: kind,
                ids: buffer.iter().map(|r| r.ts_code.clone()).collect(),
                cause: e.to_string(),
            }));
        }
    }
    buffer.clear();
}

/// Flush one batch, retrying up to `policy.max_attempts` times in total
pub async fn flush_with_retry(sink: &dyn Sink, batch: &[FundamentalRecord], policy: FlushPolicy) -> Result<usize> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match sink.flush(batch).await {
            Ok(written) => return Ok(written),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "⚠️  {} flush attempt {}/{} failed: {}, retrying in {:?}",
                    sink.name(),
                    attempt,
                    max_attempts,
                    e,
                    policy.retry_delay
                );
                tokio::time::sleep(policy.retry_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
