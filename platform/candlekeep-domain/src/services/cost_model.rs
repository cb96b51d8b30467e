//! Request weight schedule published by the provider for the klines endpoint.

/// Largest `limit` the klines endpoint accepts.
pub const PROVIDER_MAX_ROWS: u32 = 5_000;

/// Per-request row cap used for batch sizing.
pub const DEFAULT_MAX_ROWS_PER_REQUEST: u32 = 1_000;

/// Weight of the exchange info call used to list symbols.
pub const LIST_SYMBOLS_WEIGHT: u32 = 10;

/// Weight of a klines request for `rows` candles. Callers reject row counts above
/// their per-request cap before calling this.
pub fn request_weight(rows: u32) -> u32 {
    match rows {
        0..=100 => 1,
        101..=499 => 2,
        500..=999 => 5,
        1_000..=1_499 => 10,
        1_500..=1_999 => 20,
        2_000..=2_999 => 50,
        _ => 100,
    }
}

/// Weight of the single-candle probe for the earliest available candle.
pub fn earliest_probe_weight() -> u32 {
    request_weight(1)
}
