use crate::errors::IngestError;
use crate::value_objects::candle::Candle;
use crate::value_objects::interval::Interval;
use crate::value_objects::symbol::SymbolInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Remote candle source. Implementations map wire rows to `Candle` before returning;
/// nothing loosely typed crosses this boundary.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, IngestError>;

    /// First candle the provider has for the pair, or `None` when it has no history.
    async fn earliest_candle(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<Candle>, IngestError>;

    /// At most `limit` candles with `start <= open_time < end`, ascending.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError>;
}
