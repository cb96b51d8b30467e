use candlekeep_domain::repositories::progress::{ProgressSink, ProgressUpdate};

/// Logs scheduler progress. Every update goes out at debug; every `every`-th
/// batch and the last one at info.
#[derive(Debug, Clone)]
pub struct TracingProgressSink {
    every: usize,
}

impl TracingProgressSink {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }

    fn is_milestone(&self, update: &ProgressUpdate) -> bool {
        update.batches_done == update.batches_total || update.batches_done % self.every == 0
    }
}

impl Default for TracingProgressSink {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressSink for TracingProgressSink {
    fn report(&self, update: &ProgressUpdate) {
        metrics::gauge!(
            "candlekeep.ingest.batches_done",
            "symbol" => update.symbol.clone(),
            "interval" => update.interval.code()
        )
        .set(update.batches_done as f64);

        if self.is_milestone(update) {
            tracing::info!(
                symbol = %update.symbol,
                interval = %update.interval,
                done = update.batches_done,
                total = update.batches_total,
                rows_persisted = update.rows_persisted,
                budget_consumed = update.budget_consumed,
                "progress"
            );
        } else {
            tracing::debug!(
                symbol = %update.symbol,
                interval = %update.interval,
                done = update.batches_done,
                total = update.batches_total,
                "progress"
            );
        }
    }
}
