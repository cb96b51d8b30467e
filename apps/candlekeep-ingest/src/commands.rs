use crate::progress::TracingProgressSink;
use candlekeep_application::budget::{SlidingWindowBudget, WeightGate};
use candlekeep_application::config::{load_config, Config};
use candlekeep_application::ingest::{IngestResult, IntervalCoverage, IntervalSelection, Ingestor};
use candlekeep_domain::errors::IngestError;
use candlekeep_domain::repositories::candle_store::CandleStore;
use candlekeep_infrastructure::persistence::memory::InMemoryCandleStore;
use candlekeep_infrastructure::persistence::postgres_candles::PostgresCandleStore;
use candlekeep_infrastructure::provider::binance::BinanceProvider;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Settings coming from flags and environment, applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_url: Option<String>,
    pub concurrency: Option<usize>,
}

pub fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<Config, String> {
    let mut config = match path {
        Some(path) => load_config(path).map_err(|err| err.to_string())?,
        None => Config::default(),
    };
    if let Some(url) = &overrides.db_url {
        config.db.url = Some(url.clone());
    }
    if let Some(concurrency) = overrides.concurrency {
        config.scheduler.concurrency = concurrency;
    }
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn db_url(config: &Config) -> Result<&str, String> {
    config
        .db
        .url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| "missing database url (use --db-url, CANDLEKEEP_DB_URL or [db].url)".to_string())
}

async fn connect_store(config: &Config) -> Result<PostgresCandleStore, String> {
    PostgresCandleStore::connect(db_url(config)?, &config.db.candles_table)
        .await
        .map_err(|err| err.to_string())
}

fn build_ingestor(
    config: &Config,
    store: Arc<dyn CandleStore>,
    cancel: CancellationToken,
) -> Result<Ingestor, String> {
    let provider = BinanceProvider::new(&config.provider.base_url, config.fetch_timeout())
        .map_err(|err| err.to_string())?;
    let budget = SlidingWindowBudget::new(
        config.budget.max_weight_per_window,
        config.budget_window(),
        config.budget.safety_margin,
    )
    .map_err(|err| err.to_string())?;

    Ok(Ingestor::new(
        Arc::new(provider),
        store,
        Arc::new(budget),
        Arc::new(TracingProgressSink::default()),
        config.scheduler_settings(),
        cancel,
    )
    .with_intervals(config.all_intervals()))
}

pub async fn migrate(config: &Config) -> Result<(), String> {
    let store = connect_store(config).await?;
    store.migrate().await.map_err(|err| err.to_string())?;
    println!("migrate complete: table={}", store.table());
    Ok(())
}

pub async fn symbols(config: &Config, quote: Option<&str>) -> Result<(), String> {
    // Listing symbols never touches the database.
    let ingestor = build_ingestor(
        config,
        Arc::new(InMemoryCandleStore::new()),
        CancellationToken::new(),
    )?;
    let symbols = ingestor.list_symbols().await.map_err(|err| err.to_string())?;

    let mut shown = 0usize;
    for info in symbols
        .iter()
        .filter(|info| quote.map_or(true, |q| info.quote_asset.eq_ignore_ascii_case(q)))
    {
        println!("{}\t{}/{}", info.symbol, info.base_asset, info.quote_asset);
        shown += 1;
    }
    println!("{shown} tradable symbols");
    Ok(())
}

pub async fn ingest(
    config: &Config,
    symbol: &str,
    selection: IntervalSelection,
    json: bool,
    cancel: CancellationToken,
) -> Result<(), String> {
    let store = Arc::new(connect_store(config).await?);
    let ingestor = build_ingestor(config, store, cancel)?;

    let info = ingestor
        .resolve_symbol(symbol)
        .await
        .map_err(|err| match err {
            IngestError::UnknownSymbol { symbol, suggestions }
                if !suggestions.is_empty() =>
            {
                format!(
                    "symbol {symbol} not found among trading pairs. Did you mean one of these? {}",
                    suggestions.join(", ")
                )
            }
            other => other.to_string(),
        })?;
    tracing::info!(
        symbol = %info.symbol,
        base = %info.base_asset,
        quote = %info.quote_asset,
        "symbol resolved"
    );

    let result = ingestor
        .ingest(&info.symbol, selection)
        .await
        .map_err(|err| err.to_string())?;

    if json {
        println!("{}", ingest_json(&result, ingestor.budget().total_consumed()));
    } else {
        print_ingest(&result);
    }

    if result.is_clean() {
        Ok(())
    } else {
        Err(format!(
            "ingest finished with {} error(s), {} failed batch(es)",
            result.errors.len(),
            result.failed_batches()
        ))
    }
}

pub async fn verify(config: &Config, symbol: &str, json: bool) -> Result<(), String> {
    let store = connect_store(config).await?;
    let symbol = symbol.trim().to_uppercase();
    let ingestor = build_ingestor(config, Arc::new(store), CancellationToken::new())?;
    let coverage = ingestor.verify(&symbol).await.map_err(|err| err.to_string())?;

    if json {
        println!("{}", verify_json(&symbol, &coverage));
        return Ok(());
    }
    if coverage.is_empty() {
        println!("no candles stored for {symbol}");
        return Ok(());
    }
    for entry in &coverage {
        match entry.coverage {
            Some(range) => println!(
                "{symbol} {:>4} rows={} earliest={} latest={}",
                entry.interval.code(),
                entry.rows,
                range.earliest_stored.to_rfc3339(),
                range.latest_stored.to_rfc3339()
            ),
            None => println!("{symbol} {:>4} rows={}", entry.interval.code(), entry.rows),
        }
    }
    Ok(())
}

fn print_ingest(result: &IngestResult) {
    for (interval, report) in &result.per_interval {
        let state = if report.skipped_no_data {
            "no-data"
        } else if report.cancelled {
            "cancelled"
        } else if report.failed_batches > 0 {
            "partial"
        } else {
            "ok"
        };
        println!(
            "{} {:>4} {state} ranges={} batches={} failed={} rows={}",
            result.symbol,
            interval.code(),
            report.ranges.len(),
            report.batches,
            report.failed_batches,
            report.rows
        );
    }
    for failure in &result.errors {
        match failure.window {
            Some(window) => eprintln!("failed {} {window}: {}", failure.interval, failure.error),
            None => eprintln!("failed {}: {}", failure.interval, failure.error),
        }
    }
    println!(
        "ingest complete: symbol={} total_rows={}",
        result.symbol, result.total_rows_persisted
    );
}

pub fn ingest_json(result: &IngestResult, budget_consumed: u64) -> serde_json::Value {
    let intervals: serde_json::Map<String, serde_json::Value> = result
        .per_interval
        .iter()
        .map(|(interval, report)| {
            (
                interval.code().to_string(),
                serde_json::json!({
                    "rows": report.rows,
                    "batches": report.batches,
                    "failed_batches": report.failed_batches,
                    "ranges": report.ranges,
                    "skipped_no_data": report.skipped_no_data,
                    "cancelled": report.cancelled,
                }),
            )
        })
        .collect();
    let errors: Vec<serde_json::Value> = result
        .errors
        .iter()
        .map(|failure| {
            serde_json::json!({
                "interval": failure.interval.code(),
                "window": failure.window,
                "kind": failure.error.kind(),
                "message": failure.error.to_string(),
            })
        })
        .collect();
    serde_json::json!({
        "symbol": result.symbol,
        "total_rows_persisted": result.total_rows_persisted,
        "budget_consumed": budget_consumed,
        "intervals": intervals,
        "errors": errors,
    })
}

pub fn verify_json(symbol: &str, coverage: &[IntervalCoverage]) -> serde_json::Value {
    let intervals: Vec<serde_json::Value> = coverage
        .iter()
        .map(|entry| {
            serde_json::json!({
                "interval": entry.interval.code(),
                "rows": entry.rows,
                "coverage": entry.coverage,
            })
        })
        .collect();
    serde_json::json!({ "symbol": symbol, "intervals": intervals })
}
