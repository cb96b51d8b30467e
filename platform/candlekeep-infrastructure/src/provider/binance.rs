use async_trait::async_trait;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::market_data::MarketDataProvider;
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::symbol::SymbolInfo;
use candlekeep_domain::value_objects::time_range::TimeRange;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};

const KLINES_PATH: &str = "/api/v3/klines";
const EXCHANGE_INFO_PATH: &str = "/api/v3/exchangeInfo";
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    code: i64,
    msg: String,
}

/// Binance spot REST market data. Weight accounting happens in the caller; this
/// adapter only translates requests and responses.
#[derive(Debug, Clone)]
pub struct BinanceProvider {
    client: Client,
    base_url: String,
}

impl BinanceProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| IngestError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, IngestError> {
        let started = Instant::now();
        let result = self.send(path, query).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        metrics::counter!(
            "candlekeep.infra.binance.requests_total",
            "endpoint" => endpoint,
            "result" => label
        )
        .increment(1);
        metrics::histogram!("candlekeep.infra.binance.request_ms", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let body = result?;
        serde_json::from_str(&body).map_err(|err| {
            IngestError::MalformedResponse(format!("{endpoint} response parse failed: {err}"))
        })
    }

    async fn send(&self, path: &str, query: &[(&str, String)]) -> Result<String, IngestError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| IngestError::TransientFetch(format!("request to {path} failed: {err}")))?;

        let status = response.status();
        if let Some(used) = response
            .headers()
            .get(USED_WEIGHT_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            tracing::debug!(used_weight_1m = used, path, "provider reported weight");
        }

        let body = response.text().await.map_err(|err| {
            IngestError::TransientFetch(format!("failed to read {path} response: {err}"))
        })?;
        if status.is_success() {
            return Ok(body);
        }
        Err(classify_failure(status, &body))
    }
}

/// Status Binance answers with while the client IP is banned.
const IP_BANNED: u16 = 418;

/// Maps a non-success HTTP status to the ingest taxonomy. Rate limiting and server
/// errors are transient. An IP ban is not: calling again extends it.
pub fn classify_failure(status: StatusCode, body: &str) -> IngestError {
    let detail = match serde_json::from_str::<BinanceErrorResponse>(body) {
        Ok(err) => format!("HTTP {} (code {}): {}", status.as_u16(), err.code, err.msg),
        Err(_) => format!("HTTP {}: {}", status.as_u16(), body.trim()),
    };
    if status.as_u16() == IP_BANNED {
        IngestError::ProviderUnreachable(format!("ip banned by provider: {detail}"))
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        IngestError::TransientFetch(detail)
    } else {
        IngestError::MalformedResponse(detail)
    }
}

fn epoch_ms(value: &Value, field: &str) -> Result<DateTime<Utc>, IngestError> {
    let ms = value
        .as_i64()
        .ok_or_else(|| IngestError::MalformedResponse(format!("invalid {field}: {value}")))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| IngestError::MalformedResponse(format!("invalid {field}: {ms}")))
}

fn decimal(value: &Value, field: &str) -> Result<f64, IngestError> {
    let parsed = match value {
        Value::String(text) => text.parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| IngestError::MalformedResponse(format!("invalid {field}: {value}")))
}

/// Converts one klines row:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...]`.
pub fn parse_kline_row(
    symbol: &str,
    interval: Interval,
    row: &[Value],
) -> Result<Candle, IngestError> {
    if row.len() < 9 {
        return Err(IngestError::MalformedResponse(format!(
            "unexpected kline row length {}",
            row.len()
        )));
    }
    let trade_count = row[8]
        .as_u64()
        .ok_or_else(|| IngestError::MalformedResponse(format!("invalid trades: {}", row[8])))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        interval,
        open_time: epoch_ms(&row[0], "open_time")?,
        open: decimal(&row[1], "open")?,
        high: decimal(&row[2], "high")?,
        low: decimal(&row[3], "low")?,
        close: decimal(&row[4], "close")?,
        volume: decimal(&row[5], "volume")?,
        close_time: epoch_ms(&row[6], "close_time")?,
        quote_volume: decimal(&row[7], "quote_volume")?,
        trade_count,
    })
}

pub fn parse_kline_rows(
    symbol: &str,
    interval: Interval,
    rows: &[Vec<Value>],
) -> Result<Vec<Candle>, IngestError> {
    let mut candles = rows
        .iter()
        .map(|row| parse_kline_row(symbol, interval, row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, IngestError> {
        let info: ExchangeInfo = self
            .get_json("exchange_info", EXCHANGE_INFO_PATH, &[])
            .await?;
        Ok(info
            .symbols
            .into_iter()
            .map(|s| SymbolInfo {
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
                status: s.status,
            })
            .collect())
    }

    async fn earliest_candle(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<Candle>, IngestError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.code().to_string()),
            ("startTime", "0".to_string()),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get_json("klines", KLINES_PATH, &query).await?;
        Ok(parse_kline_rows(symbol, interval, &rows)?.into_iter().next())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Candle>, IngestError> {
        if TimeRange::new(start, end).is_empty() {
            return Ok(Vec::new());
        }
        // endTime is inclusive on the provider side.
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.code().to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("endTime", (end.timestamp_millis() - 1).to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get_json("klines", KLINES_PATH, &query).await?;
        let window = TimeRange::new(start, end);
        let mut candles = parse_kline_rows(symbol, interval, &rows)?;
        candles.retain(|c| window.contains(c.open_time));
        Ok(candles)
    }
}
