mod worker;

pub use worker::BatchOutcome;

use crate::budget::WeightGate;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::repositories::market_data::MarketDataProvider;
use candlekeep_domain::repositories::progress::{ProgressSink, ProgressUpdate};
use candlekeep_domain::services::batching::plan_batches;
use candlekeep_domain::services::cost_model::{request_weight, DEFAULT_MAX_ROWS_PER_REQUEST};
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::time_range::TimeRange;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use worker::BatchWorker;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub fetch_timeout: Duration,
    pub max_rows_per_request: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_rows_per_request: DEFAULT_MAX_ROWS_PER_REQUEST,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub window: TimeRange,
    pub attempts: u32,
    pub error: IngestError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub batches_total: usize,
    pub batches_attempted: usize,
    pub batches_completed: usize,
    pub rows_fetched: u64,
    pub rows_persisted: u64,
    pub failed_batches: usize,
    pub failures: Vec<BatchFailure>,
    /// Submission stopped early because the run was cancelled.
    pub cancelled: bool,
}

/// Splits planned ranges into windows and drives them through a bounded pool of
/// workers. Batch failures are collected, never propagated.
pub struct BatchScheduler {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn CandleStore>,
    budget: Arc<dyn WeightGate>,
    progress: Arc<dyn ProgressSink>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CandleStore>,
        budget: Arc<dyn WeightGate>,
        progress: Arc<dyn ProgressSink>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            store,
            budget,
            progress,
            settings,
            cancel,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        symbol: &str,
        interval: Interval,
        ranges: &[TimeRange],
    ) -> Result<RunSummary, IngestError> {
        let span = tracing::info_span!(
            "scheduler.run",
            symbol = %symbol,
            interval = %interval,
            ranges = ranges.len()
        );
        self.run_batches(symbol, interval, ranges)
            .instrument(span)
            .await
    }

    async fn run_batches(
        &self,
        symbol: &str,
        interval: Interval,
        ranges: &[TimeRange],
    ) -> Result<RunSummary, IngestError> {
        let batches = plan_batches(symbol, interval, ranges, self.settings.max_rows_per_request);
        let ceiling = self.budget.ceiling();
        if let Some(cost) = batches.iter().map(|b| request_weight(b.limit)).max() {
            if cost > ceiling {
                return Err(IngestError::CostExceedsCeiling { cost, ceiling });
            }
        }

        let mut summary = RunSummary {
            batches_total: batches.len(),
            ..RunSummary::default()
        };
        if batches.is_empty() {
            tracing::info!("nothing to fetch");
            return Ok(summary);
        }
        tracing::info!(
            batches = batches.len(),
            concurrency = self.settings.concurrency,
            "dispatching batches"
        );

        let worker = BatchWorker {
            provider: self.provider.clone(),
            store: self.store.clone(),
            budget: self.budget.clone(),
            cancel: self.cancel.clone(),
            max_retries: self.settings.max_retries,
            fetch_timeout: self.settings.fetch_timeout,
        };
        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut in_flight: HashMap<Id, TimeRange> = HashMap::new();

        for batch in batches {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            summary.batches_attempted += 1;
            let window = batch.window;
            let worker = worker.clone();
            let handle = workers.spawn(
                async move {
                    let _permit = permit;
                    worker.execute(batch).await
                }
                .in_current_span(),
            );
            in_flight.insert(handle.id(), window);

            while let Some(joined) = workers.try_join_next() {
                self.absorb(symbol, interval, &mut summary, &mut in_flight, joined);
            }
        }

        if summary.cancelled {
            tracing::warn!(
                submitted = summary.batches_attempted,
                total = summary.batches_total,
                "run cancelled, waiting for in-flight batches"
            );
        }
        while let Some(joined) = workers.join_next().await {
            self.absorb(symbol, interval, &mut summary, &mut in_flight, joined);
        }

        tracing::info!(
            completed = summary.batches_completed,
            failed = summary.failed_batches,
            rows_persisted = summary.rows_persisted,
            budget_consumed = self.budget.total_consumed(),
            "run finished"
        );
        Ok(summary)
    }

    fn absorb(
        &self,
        symbol: &str,
        interval: Interval,
        summary: &mut RunSummary,
        in_flight: &mut HashMap<Id, TimeRange>,
        joined: Result<BatchOutcome, JoinError>,
    ) {
        summary.batches_completed += 1;
        match joined {
            Ok(outcome) => {
                in_flight.retain(|_, window| *window != outcome.window);
                summary.rows_fetched += outcome.rows_fetched as u64;
                summary.rows_persisted += outcome.rows_persisted;
                match outcome.error {
                    None => {
                        metrics::counter!("candlekeep.scheduler.batches_total", "result" => "ok")
                            .increment(1);
                        metrics::counter!("candlekeep.scheduler.rows_persisted_total")
                            .increment(outcome.rows_persisted);
                    }
                    Some(error) => {
                        self.record_failure(summary, outcome.window, outcome.attempts, error)
                    }
                }
            }
            Err(err) => {
                let window = in_flight.remove(&err.id()).unwrap_or_default();
                self.record_failure(summary, window, 0, IngestError::WorkerAborted(err.to_string()));
            }
        }

        self.progress.report(&ProgressUpdate {
            symbol: symbol.to_string(),
            interval,
            batches_done: summary.batches_completed,
            batches_total: summary.batches_total,
            rows_persisted: summary.rows_persisted,
            budget_consumed: self.budget.total_consumed(),
        });
    }

    fn record_failure(
        &self,
        summary: &mut RunSummary,
        window: TimeRange,
        attempts: u32,
        error: IngestError,
    ) {
        metrics::counter!(
            "candlekeep.scheduler.batches_total",
            "result" => "err",
            "kind" => error.kind()
        )
        .increment(1);
        tracing::warn!(window = %window, attempts, error = %error, "batch failed");
        summary.failed_batches += 1;
        summary.failures.push(BatchFailure {
            window,
            attempts,
            error,
        });
    }
}
