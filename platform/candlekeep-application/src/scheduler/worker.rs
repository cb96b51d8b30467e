use crate::budget::WeightGate;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::repositories::market_data::MarketDataProvider;
use candlekeep_domain::services::cost_model::request_weight;
use candlekeep_domain::value_objects::fetch_batch::FetchBatch;
use candlekeep_domain::value_objects::time_range::TimeRange;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub window: TimeRange,
    pub attempts: u32,
    pub rows_fetched: usize,
    pub rows_persisted: u64,
    pub error: Option<IngestError>,
}

/// Everything one batch needs, cloned into each spawned task.
#[derive(Clone)]
pub(crate) struct BatchWorker {
    pub(crate) provider: Arc<dyn MarketDataProvider>,
    pub(crate) store: Arc<dyn CandleStore>,
    pub(crate) budget: Arc<dyn WeightGate>,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_retries: u32,
    pub(crate) fetch_timeout: Duration,
}

impl BatchWorker {
    pub(crate) async fn execute(&self, batch: FetchBatch) -> BatchOutcome {
        let started = Instant::now();
        let cost = request_weight(batch.limit);
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;
            match self.attempt(&batch, cost).await {
                Ok((rows_fetched, rows_persisted)) => {
                    break BatchOutcome {
                        window: batch.window,
                        attempts,
                        rows_fetched,
                        rows_persisted,
                        error: None,
                    };
                }
                Err(err)
                    if err.is_retryable()
                        && attempts <= self.max_retries
                        && !self.cancel.is_cancelled() =>
                {
                    metrics::counter!("candlekeep.scheduler.retries_total").increment(1);
                    tracing::warn!(
                        window = %batch.window,
                        attempt = attempts,
                        error = %err,
                        "batch failed, re-queueing"
                    );
                }
                Err(err) => {
                    break BatchOutcome {
                        window: batch.window,
                        attempts,
                        rows_fetched: 0,
                        rows_persisted: 0,
                        error: Some(err),
                    };
                }
            }
        };

        metrics::histogram!("candlekeep.scheduler.batch_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn attempt(&self, batch: &FetchBatch, cost: u32) -> Result<(usize, u64), IngestError> {
        let waited = self.budget.acquire(cost).await?;
        if !waited.is_zero() {
            tracing::debug!(
                window = %batch.window,
                waited_ms = waited.as_millis() as u64,
                "batch throttled by weight budget"
            );
        }

        let fetch = self.provider.fetch_candles(
            &batch.symbol,
            batch.interval,
            batch.window.start,
            batch.window.end,
            batch.limit,
        );
        let candles = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(IngestError::TransientFetch(format!(
                    "fetch timed out after {} ms",
                    self.fetch_timeout.as_millis()
                )))
            }
        };

        if candles.is_empty() {
            return Ok((0, 0));
        }
        let persisted = self.store.upsert_candles(&candles).await?;
        tracing::debug!(
            window = %batch.window,
            fetched = candles.len(),
            persisted,
            "batch persisted"
        );
        Ok((candles.len(), persisted))
    }
}
