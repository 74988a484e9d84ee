//! Fakes shared by the integration scenarios
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fundsync::provider::ProviderGateway;
use fundsync::sink::Sink;
use fundsync::{FundamentalRecord, InstrumentId, ProviderError, SinkKind, SyncConfig, SyncError};

#[derive(Debug, Clone)]
pub enum Reply {
    Data(f64),
    Empty,
    Transient,
    Permanent,
    Session,
}

/// Per-instrument reply script; the last reply repeats
#[derive(Default)]
pub struct ScriptedGateway {
    scripts: HashMap<String, Vec<Reply>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, code: &str, replies: Vec<Reply>) -> Self {
        self.scripts.insert(code.to_string(), replies);
        self
    }

    pub fn calls(&self, code: &str) -> usize {
        self.calls.lock().unwrap().get(code).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

pub fn record(code: &str, total_share: f64) -> FundamentalRecord {
    FundamentalRecord {
        stock_name: Some(format!("Stock {}", code)),
        total_share: Some(total_share),
        float_share: Some(total_share / 2.0),
        ..FundamentalRecord::new(InstrumentId::from(code))
    }
}

#[async_trait]
impl ProviderGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, id: &InstrumentId) -> Result<Option<FundamentalRecord>, ProviderError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(id.to_string()).or_default();
            *n += 1;
            *n
        };
        tokio::task::yield_now().await;

        let reply = self
            .scripts
            .get(id.as_str())
            .and_then(|s| s.get(n - 1).or_else(|| s.last()))
            .cloned()
            .unwrap_or(Reply::Empty);

        match reply {
            Reply::Data(total) => Ok(Some(record(id.as_str(), total))),
            Reply::Empty => Ok(None),
            Reply::Transient => Err(ProviderError::Transient("connection reset".into())),
            Reply::Permanent => Err(ProviderError::Permanent("unsupported code".into())),
            Reply::Session => Err(ProviderError::Session("token expired".into())),
        }
    }
}

/// In-memory sink recording every flushed batch; can fail the first N flushes
pub struct MemorySink {
    kind: SinkKind,
    batches: Mutex<Vec<Vec<FundamentalRecord>>>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl MemorySink {
    pub fn new(kind: SinkKind) -> Arc<Self> {
        Self::flaky(kind, 0)
    }

    pub fn flaky(kind: SinkKind, failures: u32) -> Arc<Self> {
        Arc::new(MemorySink {
            kind,
            batches: Mutex::new(Vec::new()),
            failures_left: Mutex::new(failures),
            attempts: Mutex::new(0),
        })
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|r| r.ts_code.to_string())
            .collect()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn flush(&self, batch: &[FundamentalRecord]) -> fundsync::Result<usize> {
        *self.attempts.lock().unwrap() += 1;
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::FlushFailed {
                    sink: self.kind.as_str().to_string(),
                    message: "database is locked".to_string(),
                });
            }
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(batch.len())
    }
}

/// Unlimited, fast-retrying config with only the database sink enabled
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.workers = 2;
    config.max_attempts = 2;
    config.rate_limit.calls_per_period = 0;
    config.csv.enabled = false;
    config.persist.retry_delay_ms = 1;
    config
}

pub fn ids(codes: &[&str]) -> Vec<InstrumentId> {
    codes.iter().map(|c| InstrumentId::from(*c)).collect()
}
