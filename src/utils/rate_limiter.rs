/// Sliding-window rate limiter for provider calls
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{LimiterScope, RateLimitConfig};
use crate::utils::time::{Clock, TokioClock};

/// Window slots allocated up front; larger budgets grow on demand
const PREALLOCATED_SLOTS: usize = 1024;

/// Log of admission times over the last `period`.
/// Admits at most `budget` calls inside any interval of length `period`.
#[derive(Debug)]
pub struct SlidingWindow {
    budget: usize,
    period: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(budget: usize, period: Duration) -> Self {
        SlidingWindow {
            budget,
            period,
            admitted: VecDeque::with_capacity(budget.min(PREALLOCATED_SLOTS)),
        }
    }

    /// Admit a call at `now`, or return how long until a slot frees up.
    /// `now` must not go backwards between calls.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        match self.admitted.front() {
            Some(&oldest) if self.admitted.len() >= self.budget => {
                Err((oldest + self.period).saturating_duration_since(now))
            }
            _ => {
                self.admitted.push_back(now);
                Ok(())
            }
        }
    }

    pub fn in_window(&self) -> usize {
        self.admitted.len()
    }
}

/// Cloning shares the window: clones draw from one budget
#[derive(Clone)]
pub struct RateLimiter {
    window: Option<Arc<Mutex<SlidingWindow>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// `calls_per_period <= 0` disables limiting
    pub fn new(calls_per_period: i64, period: Duration) -> Self {
        Self::with_clock(calls_per_period, period, Arc::new(TokioClock))
    }

    pub fn with_clock(calls_per_period: i64, period: Duration, clock: Arc<dyn Clock>) -> Self {
        let window = (calls_per_period > 0).then(|| {
            Arc::new(Mutex::new(SlidingWindow::new(calls_per_period as usize, period)))
        });
        RateLimiter { window, clock }
    }

    pub fn unlimited() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(config.calls_per_period, config.period(), clock)
    }

    pub fn is_unlimited(&self) -> bool {
        self.window.is_none()
    }

    /// Try to take a slot without waiting
    pub async fn try_acquire(&self) -> bool {
        match &self.window {
            None => true,
            Some(window) => {
                let mut window = window.lock().await;
                window.try_admit(self.clock.now()).is_ok()
            }
        }
    }

    /// Wait until a slot is available, then take it
    pub async fn acquire(&self) {
        let Some(window) = &self.window else {
            return;
        };

        loop {
            // Read the clock under the lock so admissions stay ordered
            let wait = {
                let mut window = window.lock().await;
                match window.try_admit(self.clock.now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };

            debug!("Rate limit window full, waiting {:?}", wait);
            self.clock.sleep(wait).await;
        }
    }

    /// Calls admitted in the current window
    pub async fn in_window(&self) -> usize {
        match &self.window {
            None => 0,
            Some(window) => window.lock().await.in_window(),
        }
    }
}

/// One limiter per worker: the same shared instance for a global quota,
/// independent instances for per-connection quotas.
pub fn limiters_for(config: &RateLimitConfig, workers: usize, clock: Arc<dyn Clock>) -> Vec<RateLimiter> {
    match config.scope {
        LimiterScope::Global => {
            let shared = RateLimiter::from_config(config, clock);
            vec![shared; workers]
        }
        LimiterScope::PerWorker => (0..workers)
            .map(|_| RateLimiter::from_config(config, Arc::clone(&clock)))
            .collect(),
    }
}
