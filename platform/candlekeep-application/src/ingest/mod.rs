mod report;

pub use report::{IngestFailure, IngestResult, IntervalCoverage, IntervalReport, IntervalSelection};

use crate::budget::WeightGate;
use crate::scheduler::{BatchScheduler, SchedulerSettings};
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::repositories::market_data::MarketDataProvider;
use candlekeep_domain::repositories::progress::ProgressSink;
use candlekeep_domain::services::cost_model::{earliest_probe_weight, LIST_SYMBOLS_WEIGHT};
use candlekeep_domain::services::range_planner::plan_ranges_for;
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::symbol::SymbolInfo;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const MAX_SUGGESTIONS: usize = 10;

/// Ingests one symbol at a time: plans missing ranges per interval and hands them
/// to the scheduler. All provider calls share the one budget.
pub struct Ingestor {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn CandleStore>,
    budget: Arc<dyn WeightGate>,
    scheduler: BatchScheduler,
    all_intervals: Vec<Interval>,
    cancel: CancellationToken,
}

enum Probe {
    Found(DateTime<Utc>),
    Empty,
    Unreachable(IngestError),
    Failed(IngestError),
}

impl Ingestor {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CandleStore>,
        budget: Arc<dyn WeightGate>,
        progress: Arc<dyn ProgressSink>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let scheduler = BatchScheduler::new(
            provider.clone(),
            store.clone(),
            budget.clone(),
            progress,
            settings,
            cancel.clone(),
        );
        Self {
            provider,
            store,
            budget,
            scheduler,
            all_intervals: Interval::ALL.to_vec(),
            cancel,
        }
    }

    /// Restricts what `IntervalSelection::All` expands to.
    pub fn with_intervals(mut self, intervals: Vec<Interval>) -> Self {
        if !intervals.is_empty() {
            self.all_intervals = intervals;
        }
        self
    }

    pub fn budget(&self) -> &Arc<dyn WeightGate> {
        &self.budget
    }

    pub async fn ingest(
        &self,
        symbol: &str,
        selection: IntervalSelection,
    ) -> Result<IngestResult, IngestError> {
        self.ingest_until(symbol, selection, Utc::now()).await
    }

    /// Same as [`Ingestor::ingest`] with an explicit upper bound for forward ranges.
    pub async fn ingest_until(
        &self,
        symbol: &str,
        selection: IntervalSelection,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, IngestError> {
        let intervals = match selection {
            IntervalSelection::One(interval) => vec![interval],
            IntervalSelection::All => self.all_intervals.clone(),
        };
        let span = tracing::info_span!("ingest", symbol = %symbol, intervals = intervals.len());
        self.ingest_intervals(symbol, &intervals, now)
            .instrument(span)
            .await
    }

    async fn ingest_intervals(
        &self,
        symbol: &str,
        intervals: &[Interval],
        now: DateTime<Utc>,
    ) -> Result<IngestResult, IngestError> {
        match self.store.distinct_intervals(symbol).await {
            Ok(loaded) if loaded.is_empty() => {
                tracing::info!("no intervals loaded yet");
            }
            Ok(loaded) => {
                let codes: Vec<&str> = loaded.iter().map(|i| i.code()).collect();
                tracing::info!(loaded = %codes.join(","), "intervals already loaded");
            }
            Err(err) => tracing::warn!(error = %err, "failed to list loaded intervals"),
        }

        let mut result = IngestResult {
            symbol: symbol.to_string(),
            ..IngestResult::default()
        };
        let mut unreachable: Vec<IngestError> = Vec::new();

        for &interval in intervals {
            let mut report = IntervalReport::default();
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                result.per_interval.insert(interval, report);
                continue;
            }

            let earliest = match self.probe_earliest(symbol, interval).await? {
                Probe::Found(ts) => Some(ts),
                Probe::Empty => None,
                Probe::Unreachable(err) => {
                    tracing::warn!(interval = %interval, error = %err, "earliest candle probe failed");
                    result.errors.push(IngestFailure {
                        interval,
                        window: None,
                        error: err.clone(),
                    });
                    unreachable.push(err);
                    result.per_interval.insert(interval, report);
                    continue;
                }
                Probe::Failed(err) => {
                    tracing::warn!(interval = %interval, error = %err, "earliest candle probe failed");
                    result.errors.push(IngestFailure {
                        interval,
                        window: None,
                        error: err,
                    });
                    result.per_interval.insert(interval, report);
                    continue;
                }
            };

            let coverage = match self.store.coverage(symbol, interval).await {
                Ok(coverage) => coverage,
                Err(err) => {
                    tracing::warn!(interval = %interval, error = %err, "failed to read coverage");
                    result.errors.push(IngestFailure {
                        interval,
                        window: None,
                        error: err,
                    });
                    result.per_interval.insert(interval, report);
                    continue;
                }
            };

            let ranges = match plan_ranges_for(symbol, interval, coverage.as_ref(), earliest, now) {
                Ok(ranges) => ranges,
                Err(IngestError::NoDataAvailable { .. }) => {
                    tracing::info!(interval = %interval, "provider has no data, skipping");
                    report.skipped_no_data = true;
                    result.per_interval.insert(interval, report);
                    continue;
                }
                Err(err) => return Err(err),
            };
            for range in &ranges {
                tracing::info!(interval = %interval, range = %range, "planned range");
            }

            let summary = self.scheduler.run(symbol, interval, &ranges).await?;
            report.rows = summary.rows_persisted;
            report.batches = summary.batches_total;
            report.failed_batches = summary.failed_batches;
            report.cancelled = summary.cancelled;
            report.ranges = ranges;
            result.total_rows_persisted += summary.rows_persisted;
            result
                .errors
                .extend(summary.failures.into_iter().map(|failure| IngestFailure {
                    interval,
                    window: Some(failure.window),
                    error: failure.error,
                }));
            result.per_interval.insert(interval, report);
        }

        if !intervals.is_empty() && unreachable.len() == intervals.len() {
            let last = unreachable
                .last()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(IngestError::ProviderUnreachable(format!(
                "earliest candle probe failed for every interval of {symbol}: {last}"
            )));
        }

        tracing::info!(
            rows_persisted = result.total_rows_persisted,
            failed_batches = result.failed_batches(),
            errors = result.errors.len(),
            budget_consumed = self.budget.total_consumed(),
            "ingest finished"
        );
        Ok(result)
    }

    /// Finds the earliest candle through the budget, retrying transport errors
    /// like any batch would.
    async fn probe_earliest(&self, symbol: &str, interval: Interval) -> Result<Probe, IngestError> {
        let max_retries = self.scheduler.settings().max_retries;
        let timeout = self.scheduler.settings().fetch_timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            self.budget.acquire(earliest_probe_weight()).await?;
            let probe = tokio::time::timeout(timeout, self.provider.earliest_candle(symbol, interval));
            let outcome = match probe.await {
                Ok(outcome) => outcome,
                Err(_) => Err(IngestError::TransientFetch(format!(
                    "earliest candle probe timed out after {} ms",
                    timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(Some(candle)) => return Ok(Probe::Found(candle.open_time)),
                Ok(None) => return Ok(Probe::Empty),
                Err(err)
                    if err.is_retryable()
                        && attempts <= max_retries
                        && !self.cancel.is_cancelled() =>
                {
                    tracing::debug!(interval = %interval, attempt = attempts, error = %err, "retrying probe");
                }
                Err(err @ IngestError::ProviderUnreachable(_)) => {
                    return Ok(Probe::Unreachable(err))
                }
                Err(err) if err.is_retryable() => return Ok(Probe::Unreachable(err)),
                Err(err) => return Ok(Probe::Failed(err)),
            }
        }
    }

    /// Looks `symbol` up in the provider's listing, case-insensitively. Unknown
    /// symbols come back with up to ten tradable near matches.
    pub async fn resolve_symbol(&self, symbol: &str) -> Result<SymbolInfo, IngestError> {
        let symbols = self.list_symbols().await?;
        let wanted = symbol.trim().to_uppercase();
        if let Some(info) = symbols.iter().find(|info| info.symbol == wanted) {
            return Ok(info.clone());
        }

        let needle = wanted.to_lowercase();
        let suggestions = symbols
            .iter()
            .filter(|info| info.symbol.to_lowercase().contains(&needle))
            .map(|info| info.symbol.clone())
            .take(MAX_SUGGESTIONS)
            .collect();
        Err(IngestError::UnknownSymbol {
            symbol: symbol.to_string(),
            suggestions,
        })
    }

    /// Tradable symbols, sorted by name.
    pub async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, IngestError> {
        self.budget.acquire(LIST_SYMBOLS_WEIGHT).await?;
        let mut symbols: Vec<SymbolInfo> = self
            .provider
            .list_symbols()
            .await?
            .into_iter()
            .filter(SymbolInfo::is_trading)
            .collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(symbols)
    }

    /// Row count and stored span for every interval loaded for `symbol`.
    pub async fn verify(&self, symbol: &str) -> Result<Vec<IntervalCoverage>, IngestError> {
        let intervals = self.store.distinct_intervals(symbol).await?;
        let mut out = Vec::with_capacity(intervals.len());
        for interval in intervals {
            let rows = self.store.count_candles(symbol, interval).await?;
            let coverage = self.store.coverage(symbol, interval).await?;
            out.push(IntervalCoverage {
                interval,
                rows,
                coverage,
            });
        }
        Ok(out)
    }
}
