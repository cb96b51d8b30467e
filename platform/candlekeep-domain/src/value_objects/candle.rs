use crate::value_objects::interval::Interval;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV record as produced by the provider. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
    pub open_time_ms: i64,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: self.symbol.clone(),
            interval: self.interval,
            open_time_ms: self.open_time.timestamp_millis(),
        }
    }
}
