mod support;

use async_trait::async_trait;
use candlekeep_application::budget::{SlidingWindowBudget, WeightGate};
use candlekeep_application::config::parse_config;
use candlekeep_application::scheduler::{BatchScheduler, SchedulerSettings};
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::repositories::progress::{NoopProgressSink, ProgressSink, ProgressUpdate};
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::coverage::CoverageRange;
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::time_range::TimeRange;
use candlekeep_infrastructure::persistence::memory::InMemoryCandleStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use support::{minutes, ts, RecordingSink, ScriptedProvider};
use tokio_util::sync::CancellationToken;

const SYMBOL: &str = "BTCUSDT";

fn roomy_budget() -> Arc<SlidingWindowBudget> {
    Arc::new(SlidingWindowBudget::with_ceiling(1_000_000, Duration::from_secs(60)))
}

fn scheduler(
    provider: Arc<ScriptedProvider>,
    store: Arc<dyn CandleStore>,
    budget: Arc<SlidingWindowBudget>,
    progress: Arc<dyn ProgressSink>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
) -> BatchScheduler {
    BatchScheduler::new(provider, store, budget, progress, settings, cancel)
}

/// `n` full one-minute windows starting at zero.
fn minute_windows(n: i64) -> TimeRange {
    TimeRange::new(ts(0), ts(minutes(1_000 * n)))
}

#[tokio::test]
async fn one_bad_window_does_not_fail_its_siblings() {
    let mut provider = ScriptedProvider::with_earliest(Interval::Minute1, 0);
    provider.malformed_at.push(minutes(3_000));
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryCandleStore::new());

    let summary = scheduler(
        provider,
        store.clone(),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(10)])
    .await
    .expect("run completes");

    assert_eq!(summary.batches_total, 10);
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.rows_persisted, 9_000);
    assert_eq!(store.len(), 9_000);
    let failure = &summary.failures[0];
    assert_eq!(failure.window.start, ts(minutes(3_000)));
    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, IngestError::MalformedResponse(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_five_fetches_in_flight() {
    let mut provider = ScriptedProvider::with_earliest(Interval::Minute1, 0);
    provider.delay = Duration::from_millis(15);
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryCandleStore::new());

    let summary = scheduler(
        provider.clone(),
        store,
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings {
            concurrency: 5,
            ..SchedulerSettings::default()
        },
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(50)])
    .await
    .unwrap();

    assert_eq!(summary.batches_total, 50);
    assert_eq!(summary.batches_completed, 50);
    assert_eq!(summary.failed_batches, 0);
    assert!(provider.max_in_flight() <= 5, "saw {}", provider.max_in_flight());
    assert!(provider.max_in_flight() >= 2, "pool never overlapped fetches");
}

#[tokio::test]
async fn transient_failures_are_retried_up_to_the_limit() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    provider.fail_transiently(0, 2);
    provider.fail_transiently(minutes(1_000), 3);
    let store = Arc::new(InMemoryCandleStore::new());

    let summary = scheduler(
        provider.clone(),
        store,
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings {
            max_retries: 2,
            ..SchedulerSettings::default()
        },
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(2)])
    .await
    .unwrap();

    // First window recovers on its third attempt, the second exhausts retries.
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.rows_persisted, 1_000);
    assert_eq!(summary.failures[0].window.start, ts(minutes(1_000)));
    assert_eq!(summary.failures[0].attempts, 3);
    assert!(summary.failures[0].error.is_retryable());
    assert_eq!(provider.fetch_calls(), 6);
}

#[tokio::test]
async fn every_attempt_is_charged_to_the_budget() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    provider.fail_transiently(0, 1);
    let budget = roomy_budget();

    scheduler(
        provider,
        Arc::new(InMemoryCandleStore::new()),
        budget.clone(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(3)])
    .await
    .unwrap();

    // Four full-size requests at weight 10.
    assert_eq!(budget.total_consumed(), 40);
}

#[tokio::test]
async fn cost_above_ceiling_fails_before_dispatch() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let budget = Arc::new(SlidingWindowBudget::with_ceiling(5, Duration::from_secs(60)));

    let err = scheduler(
        provider.clone(),
        Arc::new(InMemoryCandleStore::new()),
        budget,
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(2)])
    .await
    .expect_err("full windows weigh 10");

    assert_eq!(err, IngestError::CostExceedsCeiling { cost: 10, ceiling: 5 });
    assert_eq!(provider.fetch_calls(), 0);
}

#[tokio::test]
async fn short_windows_fit_a_small_budget() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let budget = Arc::new(SlidingWindowBudget::with_ceiling(5, Duration::from_secs(60)));

    let summary = scheduler(
        provider,
        Arc::new(InMemoryCandleStore::new()),
        budget.clone(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[TimeRange::new(ts(0), ts(minutes(50)))])
    .await
    .unwrap();

    assert_eq!(summary.rows_persisted, 50);
    assert_eq!(budget.total_consumed(), 1);
}

#[tokio::test]
async fn cancelled_token_submits_nothing() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = scheduler(
        provider.clone(),
        Arc::new(InMemoryCandleStore::new()),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        cancel,
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(4)])
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.batches_total, 4);
    assert_eq!(summary.batches_attempted, 0);
    assert_eq!(provider.fetch_calls(), 0);
}

struct CancelOnFirstReport {
    token: CancellationToken,
}

impl ProgressSink for CancelOnFirstReport {
    fn report(&self, _update: &ProgressUpdate) {
        self.token.cancel();
    }
}

#[tokio::test]
async fn cancellation_stops_submission_but_drains_in_flight() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let store = Arc::new(InMemoryCandleStore::new());
    let cancel = CancellationToken::new();

    let summary = scheduler(
        provider.clone(),
        store.clone(),
        roomy_budget(),
        Arc::new(CancelOnFirstReport {
            token: cancel.clone(),
        }),
        SchedulerSettings {
            concurrency: 1,
            ..SchedulerSettings::default()
        },
        cancel,
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(20)])
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert!(summary.batches_attempted < summary.batches_total);
    assert_eq!(summary.batches_completed, summary.batches_attempted);
    assert_eq!(summary.failed_batches, 0);
    assert_eq!(store.len() as u64, summary.rows_persisted);
    assert_eq!(provider.fetch_calls(), summary.batches_attempted);
}

#[tokio::test]
async fn rerunning_the_same_ranges_persists_nothing_new() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let store = Arc::new(InMemoryCandleStore::new());
    let run = || {
        scheduler(
            provider.clone(),
            store.clone(),
            roomy_budget(),
            Arc::new(NoopProgressSink),
            SchedulerSettings::default(),
            CancellationToken::new(),
        )
    };

    let first = run()
        .run(SYMBOL, Interval::Minute1, &[minute_windows(3)])
        .await
        .unwrap();
    let second = run()
        .run(SYMBOL, Interval::Minute1, &[minute_windows(3)])
        .await
        .unwrap();

    assert_eq!(first.rows_persisted, 3_000);
    assert_eq!(second.rows_fetched, 3_000);
    assert_eq!(second.rows_persisted, 0);
    assert_eq!(store.len(), 3_000);
}

#[tokio::test]
async fn progress_is_reported_after_every_window() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let sink = Arc::new(RecordingSink::default());

    scheduler(
        provider,
        Arc::new(InMemoryCandleStore::new()),
        roomy_budget(),
        sink.clone(),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(6)])
    .await
    .unwrap();

    let updates = sink.updates.lock();
    assert_eq!(updates.len(), 6);
    let done: Vec<usize> = updates.iter().map(|u| u.batches_done).collect();
    assert_eq!(done, vec![1, 2, 3, 4, 5, 6]);
    let last = updates.last().unwrap();
    assert_eq!(last.batches_total, 6);
    assert_eq!(last.rows_persisted, 6_000);
    assert_eq!(last.budget_consumed, 60);
}

#[tokio::test]
async fn empty_plan_is_a_no_op() {
    let provider = Arc::new(ScriptedProvider::default());
    let summary = scheduler(
        provider.clone(),
        Arc::new(InMemoryCandleStore::new()),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Hour1, &[])
    .await
    .unwrap();

    assert_eq!(summary.batches_total, 0);
    assert!(!summary.cancelled);
    assert_eq!(provider.fetch_calls(), 0);
}

#[tokio::test]
async fn small_row_cap_still_loads_every_candle() {
    let config = parse_config("[provider]\nmax_rows_per_request = 500").unwrap();
    config.validate().unwrap();
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let store = Arc::new(InMemoryCandleStore::new());

    let summary = scheduler(
        provider,
        store.clone(),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        config.scheduler_settings(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(2)])
    .await
    .unwrap();

    assert_eq!(summary.batches_total, 4);
    assert_eq!(summary.failed_batches, 0);
    assert_eq!(summary.rows_persisted, 2_000);
    assert_eq!(store.len(), 2_000);
}

#[tokio::test(start_paused = true)]
async fn timed_out_fetch_fails_only_its_window() {
    let mut provider = ScriptedProvider::with_earliest(Interval::Minute1, 0);
    provider.stall_at.push(minutes(1_000));
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryCandleStore::new());

    let summary = scheduler(
        provider.clone(),
        store.clone(),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings {
            max_retries: 1,
            fetch_timeout: Duration::from_secs(2),
            ..SchedulerSettings::default()
        },
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(3)])
    .await
    .expect("timeouts are batch failures, not run errors");

    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.rows_persisted, 2_000);
    assert_eq!(store.len(), 2_000);
    let failure = &summary.failures[0];
    assert_eq!(failure.window.start, ts(minutes(1_000)));
    assert_eq!(failure.attempts, 2);
    assert!(matches!(&failure.error, IngestError::TransientFetch(msg) if msg.contains("timed out")));
    assert_eq!(provider.fetch_calls(), 4);
}

/// Store that rejects any batch containing the given open time.
struct RejectingStore {
    inner: InMemoryCandleStore,
    reject_open_ms: i64,
}

#[async_trait]
impl CandleStore for RejectingStore {
    async fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<CoverageRange>, IngestError> {
        self.inner.coverage(symbol, interval).await
    }

    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64, IngestError> {
        if candles
            .iter()
            .any(|c| c.open_time.timestamp_millis() == self.reject_open_ms)
        {
            return Err(IngestError::Persistence("unique violation".to_string()));
        }
        self.inner.upsert_candles(candles).await
    }

    async fn distinct_intervals(&self, symbol: &str) -> Result<BTreeSet<Interval>, IngestError> {
        self.inner.distinct_intervals(symbol).await
    }

    async fn count_candles(&self, symbol: &str, interval: Interval) -> Result<u64, IngestError> {
        self.inner.count_candles(symbol, interval).await
    }
}

#[tokio::test]
async fn persistence_error_fails_the_window_without_retry() {
    let provider = Arc::new(ScriptedProvider::with_earliest(Interval::Minute1, 0));
    let store = Arc::new(RejectingStore {
        inner: InMemoryCandleStore::new(),
        reject_open_ms: minutes(2_500),
    });

    let summary = scheduler(
        provider.clone(),
        store.clone(),
        roomy_budget(),
        Arc::new(NoopProgressSink),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(4)])
    .await
    .unwrap();

    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.failures[0].window.start, ts(minutes(2_000)));
    assert_eq!(summary.failures[0].attempts, 1);
    assert!(matches!(summary.failures[0].error, IngestError::Persistence(_)));
    assert_eq!(provider.fetch_calls(), 4);
    assert_eq!(store.inner.len(), 3_000);
}

#[tokio::test]
async fn panicking_worker_is_reported_against_its_window() {
    let mut provider = ScriptedProvider::with_earliest(Interval::Minute1, 0);
    provider.panic_at.push(minutes(1_000));
    let store = Arc::new(InMemoryCandleStore::new());
    let sink = Arc::new(RecordingSink::default());

    let summary = scheduler(
        Arc::new(provider),
        store.clone(),
        roomy_budget(),
        sink.clone(),
        SchedulerSettings::default(),
        CancellationToken::new(),
    )
    .run(SYMBOL, Interval::Minute1, &[minute_windows(3)])
    .await
    .unwrap();

    assert_eq!(summary.batches_completed, 3);
    assert_eq!(summary.failed_batches, 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.window, TimeRange::new(ts(minutes(1_000)), ts(minutes(2_000))));
    assert_eq!(failure.attempts, 0);
    assert!(matches!(failure.error, IngestError::WorkerAborted(_)));
    assert_eq!(store.len(), 2_000);
    assert_eq!(sink.updates.lock().len(), 3);
}
