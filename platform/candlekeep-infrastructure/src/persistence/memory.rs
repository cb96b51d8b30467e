use async_trait::async_trait;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_domain::value_objects::candle::{Candle, CandleKey};
use candlekeep_domain::value_objects::coverage::CoverageRange;
use candlekeep_domain::value_objects::interval::Interval;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Candle store kept in process memory. Same first-writer-wins semantics as the
/// PostgreSQL store, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCandleStore {
    rows: Mutex<BTreeMap<CandleKey, Candle>>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock();
            for candle in candles {
                rows.entry(candle.key()).or_insert(candle);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Stored candles for a pair in open-time order.
    pub fn candles(&self, symbol: &str, interval: Interval) -> Vec<Candle> {
        self.rows
            .lock()
            .values()
            .filter(|c| c.symbol == symbol && c.interval == interval)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<CoverageRange>, IngestError> {
        let rows = self.rows.lock();
        let mut coverage: Option<CoverageRange> = None;
        for candle in rows
            .values()
            .filter(|c| c.symbol == symbol && c.interval == interval)
        {
            match coverage.as_mut() {
                Some(range) => range.extend(candle.open_time),
                None => coverage = Some(CoverageRange::new(candle.open_time, candle.open_time)),
            }
        }
        Ok(coverage)
    }

    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64, IngestError> {
        let mut rows = self.rows.lock();
        let mut inserted = 0u64;
        for candle in candles {
            let key = candle.key();
            if !rows.contains_key(&key) {
                rows.insert(key, candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn distinct_intervals(&self, symbol: &str) -> Result<BTreeSet<Interval>, IngestError> {
        Ok(self
            .rows
            .lock()
            .keys()
            .filter(|key| key.symbol == symbol)
            .map(|key| key.interval)
            .collect())
    }

    async fn count_candles(&self, symbol: &str, interval: Interval) -> Result<u64, IngestError> {
        Ok(self
            .rows
            .lock()
            .keys()
            .filter(|key| key.symbol == symbol && key.interval == interval)
            .count() as u64)
    }
}
