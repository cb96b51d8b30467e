use async_trait::async_trait;
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::{validate_table_name, CandleStore};
use candlekeep_domain::value_objects::candle::Candle;
use candlekeep_domain::value_objects::coverage::CoverageRange;
use candlekeep_domain::value_objects::interval::Interval;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_postgres::{Client, NoTls};

/// Candle store backed by PostgreSQL. One connection is shared by every worker;
/// each upsert is a single statement, so a batch lands entirely or not at all.
#[derive(Clone)]
pub struct PostgresCandleStore {
    client: Arc<Client>,
    table: String,
}

impl std::fmt::Debug for PostgresCandleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCandleStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PostgresCandleStore {
    pub async fn connect(db_url: &str, table: &str) -> Result<Self, IngestError> {
        validate_table_name(table)?;
        let (client, connection) = tokio_postgres::connect(db_url, NoTls)
            .await
            .map_err(|err| IngestError::Persistence(format!("failed to connect to postgres: {err}")))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection error");
            }
        });
        Ok(Self {
            client: Arc::new(client),
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the candles table and its lookup index if missing.
    pub async fn migrate(&self) -> Result<(), IngestError> {
        let ddl = create_table_sql(&self.table);
        self.client
            .batch_execute(&ddl)
            .await
            .map_err(|err| persistence_error("migrate", "failed to apply schema", err))?;
        tracing::info!(table = %self.table, "schema applied");
        Ok(())
    }
}

pub fn create_table_sql(table: &str) -> String {
    let index = table.replace('.', "_");
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            symbol TEXT NOT NULL,
            \"interval\" TEXT NOT NULL,
            open_time TIMESTAMPTZ NOT NULL,
            close_time TIMESTAMPTZ NOT NULL,
            open DOUBLE PRECISION NOT NULL,
            high DOUBLE PRECISION NOT NULL,
            low DOUBLE PRECISION NOT NULL,
            close DOUBLE PRECISION NOT NULL,
            volume DOUBLE PRECISION NOT NULL,
            quote_volume DOUBLE PRECISION NOT NULL,
            trade_count BIGINT NOT NULL,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (symbol, \"interval\", open_time)
        );
        CREATE INDEX IF NOT EXISTS {index}_symbol_interval_idx
            ON {table} (symbol, \"interval\");"
    )
}

pub fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (
            symbol, \"interval\", open_time, close_time,
            open, high, low, close, volume, quote_volume, trade_count
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::text[], $3::timestamptz[], $4::timestamptz[],
            $5::float8[], $6::float8[], $7::float8[], $8::float8[],
            $9::float8[], $10::float8[], $11::int8[]
        )
        ON CONFLICT (symbol, \"interval\", open_time) DO NOTHING"
    )
}

/// `trade_count` as the BIGINT column stores it. Values past `i64::MAX` are refused.
pub fn trade_counts(candles: &[Candle]) -> Result<Vec<i64>, IngestError> {
    candles
        .iter()
        .map(|c| {
            i64::try_from(c.trade_count).map_err(|_| {
                IngestError::Persistence(format!(
                    "trade_count {} of {} {} at {} does not fit BIGINT",
                    c.trade_count,
                    c.symbol,
                    c.interval,
                    c.open_time.to_rfc3339()
                ))
            })
        })
        .collect()
}

fn persistence_error(op: &'static str, context: &str, err: tokio_postgres::Error) -> IngestError {
    metrics::counter!("candlekeep.infra.postgres.errors_total", "op" => op).increment(1);
    tracing::error!(op, error = %err, "{context}");
    IngestError::Persistence(format!("{context}: {err}"))
}

#[async_trait]
impl CandleStore for PostgresCandleStore {
    async fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Option<CoverageRange>, IngestError> {
        let query = format!(
            "SELECT MIN(open_time), MAX(open_time) FROM {} WHERE symbol = $1 AND \"interval\" = $2",
            self.table
        );
        let row = self
            .client
            .query_one(&query, &[&symbol, &interval.code()])
            .await
            .map_err(|err| persistence_error("coverage", "failed to query coverage", err))?;
        let earliest: Option<DateTime<Utc>> = row.get(0);
        let latest: Option<DateTime<Utc>> = row.get(1);
        Ok(match (earliest, latest) {
            (Some(earliest), Some(latest)) => Some(CoverageRange::new(earliest, latest)),
            _ => None,
        })
    }

    async fn upsert_candles(&self, candles: &[Candle]) -> Result<u64, IngestError> {
        if candles.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        let symbols: Vec<&str> = candles.iter().map(|c| c.symbol.as_str()).collect();
        let intervals: Vec<&str> = candles.iter().map(|c| c.interval.code()).collect();
        let open_times: Vec<DateTime<Utc>> = candles.iter().map(|c| c.open_time).collect();
        let close_times: Vec<DateTime<Utc>> = candles.iter().map(|c| c.close_time).collect();
        let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let quote_volumes: Vec<f64> = candles.iter().map(|c| c.quote_volume).collect();
        let trades = trade_counts(candles)?;

        let inserted = self
            .client
            .execute(
                &upsert_sql(&self.table),
                &[
                    &symbols,
                    &intervals,
                    &open_times,
                    &close_times,
                    &opens,
                    &highs,
                    &lows,
                    &closes,
                    &volumes,
                    &quote_volumes,
                    &trades,
                ],
            )
            .await
            .map_err(|err| persistence_error("upsert", "failed to upsert candles", err))?;

        metrics::counter!("candlekeep.infra.postgres.rows_inserted_total").increment(inserted);
        metrics::histogram!("candlekeep.infra.postgres.upsert_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        tracing::debug!(
            rows = candles.len(),
            inserted,
            skipped = candles.len() as u64 - inserted,
            "upserted candles"
        );
        Ok(inserted)
    }

    async fn distinct_intervals(&self, symbol: &str) -> Result<BTreeSet<Interval>, IngestError> {
        let query = format!(
            "SELECT DISTINCT \"interval\" FROM {} WHERE symbol = $1",
            self.table
        );
        let rows = self
            .client
            .query(&query, &[&symbol])
            .await
            .map_err(|err| persistence_error("distinct_intervals", "failed to list intervals", err))?;

        let mut intervals = BTreeSet::new();
        for row in rows {
            let code: String = row.get(0);
            match Interval::parse(&code) {
                Ok(interval) => {
                    intervals.insert(interval);
                }
                Err(_) => tracing::warn!(code = %code, "ignoring unknown stored interval"),
            }
        }
        Ok(intervals)
    }

    async fn count_candles(&self, symbol: &str, interval: Interval) -> Result<u64, IngestError> {
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE symbol = $1 AND \"interval\" = $2",
            self.table
        );
        let row = self
            .client
            .query_one(&query, &[&symbol, &interval.code()])
            .await
            .map_err(|err| persistence_error("count", "failed to count candles", err))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}
