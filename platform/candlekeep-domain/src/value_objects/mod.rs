pub mod candle;
pub mod coverage;
pub mod fetch_batch;
pub mod interval;
pub mod symbol;
pub mod time_range;
