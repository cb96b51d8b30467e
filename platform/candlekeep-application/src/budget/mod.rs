mod ledger;

pub use ledger::BudgetLedger;

use async_trait::async_trait;
use candlekeep_domain::errors::IngestError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MAX_WEIGHT_PER_WINDOW: u32 = 6_000;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.8;

/// Admission gate every provider call goes through.
#[async_trait]
pub trait WeightGate: Send + Sync {
    /// Waits until `cost` fits the trailing window, records it and returns the
    /// time spent waiting.
    async fn acquire(&self, cost: u32) -> Result<Duration, IngestError>;

    fn ceiling(&self) -> u32;

    /// Total weight admitted since construction.
    fn total_consumed(&self) -> u64;
}

pub fn ceiling_for(max_weight_per_window: u32, safety_margin: f64) -> Result<u32, IngestError> {
    if !(safety_margin > 0.0 && safety_margin <= 1.0) {
        return Err(IngestError::Config(format!(
            "safety_margin must be in (0, 1], got {safety_margin}"
        )));
    }
    let ceiling = (f64::from(max_weight_per_window) * safety_margin).floor() as u32;
    if ceiling == 0 {
        return Err(IngestError::Config(format!(
            "budget ceiling is zero (max_weight_per_window={max_weight_per_window}, safety_margin={safety_margin})"
        )));
    }
    Ok(ceiling)
}

/// Sliding-window weight budget. The ledger lock is held only while checking and
/// recording; waiting happens outside it.
#[derive(Debug)]
pub struct SlidingWindowBudget {
    ledger: Mutex<BudgetLedger>,
    ceiling: u32,
    total_consumed: AtomicU64,
}

impl SlidingWindowBudget {
    pub fn new(
        max_weight_per_window: u32,
        window: Duration,
        safety_margin: f64,
    ) -> Result<Self, IngestError> {
        if window.is_zero() {
            return Err(IngestError::Config("budget window must be positive".to_string()));
        }
        let ceiling = ceiling_for(max_weight_per_window, safety_margin)?;
        tracing::info!(
            ceiling,
            window_secs = window.as_secs_f64(),
            "weight budget initialised"
        );
        Ok(Self::with_ceiling(ceiling, window))
    }

    pub fn with_ceiling(ceiling: u32, window: Duration) -> Self {
        Self {
            ledger: Mutex::new(BudgetLedger::new(window, ceiling)),
            ceiling,
            total_consumed: AtomicU64::new(0),
        }
    }

    /// Weight currently counted inside the trailing window.
    pub fn window_sum(&self) -> u64 {
        self.ledger.lock().window_sum(Instant::now())
    }
}

#[async_trait]
impl WeightGate for SlidingWindowBudget {
    async fn acquire(&self, cost: u32) -> Result<Duration, IngestError> {
        if cost > self.ceiling {
            return Err(IngestError::CostExceedsCeiling {
                cost,
                ceiling: self.ceiling,
            });
        }

        let started = Instant::now();
        loop {
            let verdict = self.ledger.lock().try_admit(Instant::now(), cost);
            match verdict {
                Ok(()) => {
                    let total = self
                        .total_consumed
                        .fetch_add(u64::from(cost), Ordering::Relaxed)
                        + u64::from(cost);
                    let waited = started.elapsed();
                    metrics::counter!("candlekeep.budget.weight_consumed_total")
                        .increment(u64::from(cost));
                    metrics::gauge!("candlekeep.budget.total_consumed").set(total as f64);
                    metrics::histogram!("candlekeep.budget.wait_ms")
                        .record(waited.as_secs_f64() * 1000.0);
                    return Ok(waited);
                }
                Err(wait) => {
                    tracing::debug!(
                        cost,
                        wait_ms = wait.as_millis() as u64,
                        "weight budget exhausted, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn ceiling(&self) -> u32 {
        self.ceiling
    }

    fn total_consumed(&self) -> u64 {
        self.total_consumed.load(Ordering::Relaxed)
    }
}
