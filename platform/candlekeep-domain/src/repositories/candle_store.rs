use crate::errors::IngestError;
use crate::value_objects::candle::Candle;
use crate::value_objects::coverage::CoverageRange;
use crate::value_objects::interval::Interval;
use async_trait::async_trait;
use std::collections::BTreeSet;

#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<CoverageRange>, IngestError>;

    /// Inserts rows whose (symbol, interval, open_time) is not stored yet and
    /// returns how many were inserted. Existing keys are skipped, never updated.
    /// All-or-nothing per call.
    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64, IngestError>;

    async fn distinct_intervals(&self, symbol: &str) -> Result<BTreeSet<Interval>, IngestError>;

    async fn count_candles(&self, symbol: &str, interval: Interval) -> Result<u64, IngestError>;
}

/// Accepts `table` or `schema.table` made of ASCII identifiers, since the name
/// is interpolated into SQL.
pub fn validate_table_name(table: &str) -> Result<(), IngestError> {
    let invalid = || IngestError::Config(format!("invalid table name: {table}"));
    if table.is_empty() {
        return Err(IngestError::Config("table name is empty".to_string()));
    }
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(invalid());
    }
    for part in parts {
        let mut chars = part.chars();
        let first = chars.next().ok_or_else(invalid)?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid());
        }
        if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(invalid());
        }
    }
    Ok(())
}
