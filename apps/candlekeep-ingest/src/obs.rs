use clap::ValueEnum;
use std::net::SocketAddr;

pub const LOG_ENV: &str = "CANDLEKEEP_LOG";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// `CANDLEKEEP_LOG` wins over `default_level` when set.
pub fn log_filter(default_level: &str) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_level.to_string())
}

pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<(), String> {
    let filter = log_filter(default_level);
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .map_err(|err| format!("invalid log filter '{filter}': {err}"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| format!("failed to install tracing subscriber: {err}"))
}

/// Parsed `--metrics-addr`. Blank counts as absent.
pub fn metrics_listen_addr(raw: Option<&str>) -> Result<Option<SocketAddr>, String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<SocketAddr>()
                .map_err(|err| format!("--metrics-addr {value:?} is not host:port: {err}"))
        })
        .transpose()
}

/// Serves Prometheus metrics on the given address, if any. Returns the bound address.
pub fn init_metrics(metrics_addr: Option<&str>) -> Result<Option<SocketAddr>, String> {
    let Some(addr) = metrics_listen_addr(metrics_addr)? else {
        return Ok(None);
    };
    serve_prometheus(addr)?;
    Ok(Some(addr))
}

#[cfg(feature = "prometheus")]
fn serve_prometheus(addr: SocketAddr) -> Result<(), String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| format!("cannot serve metrics on {addr}: {err}"))?;
    tracing::info!(%addr, "serving prometheus metrics");
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn serve_prometheus(addr: SocketAddr) -> Result<(), String> {
    Err(format!(
        "cannot serve metrics on {addr}: candlekeep-ingest was built without `prometheus`"
    ))
}
