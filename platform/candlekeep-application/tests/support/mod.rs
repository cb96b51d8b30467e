#![allow(dead_code)]

use async_trait::async_trait;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::market_data::MarketDataProvider;
use candlekeep_domain::repositories::progress::{ProgressSink, ProgressUpdate};
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::symbol::SymbolInfo;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub fn minutes(n: i64) -> i64 {
    n * 60_000
}

pub fn candle(symbol: &str, interval: Interval, open_ms: i64) -> Candle {
    let step_ms = interval.step_seconds() * 1_000;
    Candle {
        symbol: symbol.to_string(),
        interval,
        open_time: ts(open_ms),
        close_time: ts(open_ms + step_ms - 1),
        open: 100.0,
        high: 101.0,
        low: 99.0,
        close: 100.5,
        volume: 3.0,
        quote_volume: 301.5,
        trade_count: 7,
    }
}

/// Provider that synthesises step-aligned candles for any requested window and
/// fails specific windows on demand.
#[derive(Default)]
pub struct ScriptedProvider {
    pub symbols: Vec<SymbolInfo>,
    pub earliest: HashMap<Interval, i64>,
    /// Every earliest-candle probe fails with this.
    pub probe_error: Option<IngestError>,
    pub delay: Duration,
    /// Window start (ms) that always fails with a malformed response.
    pub malformed_at: Vec<i64>,
    /// Window start (ms) whose fetch never answers.
    pub stall_at: Vec<i64>,
    /// Window start (ms) whose fetch panics.
    pub panic_at: Vec<i64>,
    /// Window start (ms) -> number of transient failures before success.
    pub transient_at: Mutex<HashMap<i64, u32>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn with_earliest(interval: Interval, earliest_ms: i64) -> Self {
        let mut provider = Self::default();
        provider.earliest.insert(interval, earliest_ms);
        provider
    }

    pub fn fail_transiently(&self, window_start_ms: i64, times: u32) {
        self.transient_at.lock().insert(window_start_ms, times);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, IngestError> {
        Ok(self.symbols.clone())
    }

    async fn earliest_candle(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<Candle>, IngestError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.probe_error {
            return Err(err.clone());
        }
        Ok(self
            .earliest
            .get(&interval)
            .map(|ms| candle(symbol, interval, *ms)))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let start_ms = start.timestamp_millis();
        if self.stall_at.contains(&start_ms) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_at.contains(&start_ms) {
            panic!("scripted panic at {start_ms}");
        }
        if self.malformed_at.contains(&start_ms) {
            return Err(IngestError::MalformedResponse(format!(
                "garbled row at {start_ms}"
            )));
        }
        {
            let mut transient = self.transient_at.lock();
            if let Some(remaining) = transient.get_mut(&start_ms) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(IngestError::TransientFetch("HTTP 429".to_string()));
                }
            }
        }

        let step_ms = interval.step_seconds() * 1_000;
        let earliest = self.earliest.get(&interval).copied().unwrap_or(0);
        let first = start_ms.max(earliest);
        let mut open = first.div_euclid(step_ms) * step_ms;
        if open < first {
            open += step_ms;
        }
        let end_ms = end.timestamp_millis();
        let mut out = Vec::new();
        while open < end_ms && out.len() < limit as usize {
            out.push(candle(symbol, interval, open));
            open += step_ms;
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<ProgressUpdate>>,
}

impl ProgressSink for RecordingSink {
    fn report(&self, update: &ProgressUpdate) {
        self.updates.lock().push(update.clone());
    }
}

pub fn symbol_info(symbol: &str, status: &str) -> SymbolInfo {
    SymbolInfo {
        symbol: symbol.to_string(),
        base_asset: symbol.trim_end_matches("USDT").to_string(),
        quote_asset: "USDT".to_string(),
        status: status.to_string(),
    }
}
