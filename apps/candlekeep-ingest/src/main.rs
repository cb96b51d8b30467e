use candlekeep_application::ingest::IntervalSelection;
use candlekeep_ingest::commands::{self, Overrides};
use candlekeep_ingest::obs::{self, LogFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "candlekeep-ingest")]
#[command(about = "Rate-governed Binance candle ingestion into PostgreSQL.", version)]
struct Cli {
    /// Config file path (TOML). Defaults apply when omitted.
    #[arg(long, global = true, env = "CANDLEKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection string, overrides [db].url.
    #[arg(long, global = true, env = "CANDLEKEEP_DB_URL", hide_env_values = true)]
    db_url: Option<String>,

    /// Concurrent batch fetches, overrides [scheduler].concurrency.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Default log level when CANDLEKEEP_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Prometheus metrics listen addr (e.g. 127.0.0.1:9898). Optional.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the candles table if it does not exist.
    Migrate,
    /// List tradable symbols.
    Symbols {
        /// Only symbols quoted in this asset (e.g. USDT).
        #[arg(long)]
        quote: Option<String>,
    },
    /// Load missing candles for a symbol.
    Ingest {
        #[arg(long)]
        symbol: String,
        /// Interval code (1m, 5m, 1h, 1d, 1M, ...) or `all`.
        #[arg(long, default_value = "all", value_parser = IntervalSelection::parse)]
        interval: IntervalSelection,
        /// Print the result as a single JSON line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show stored row counts and coverage per interval.
    Verify {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    obs::init_tracing(&cli.log_level, cli.log_format)?;
    obs::init_metrics(cli.metrics_addr.as_deref())?;

    let overrides = Overrides {
        db_url: cli.db_url.clone(),
        concurrency: cli.concurrency,
    };
    let config = commands::resolve_config(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Command::Migrate => commands::migrate(&config).await,
        Command::Symbols { quote } => commands::symbols(&config, quote.as_deref()).await,
        Command::Ingest {
            symbol,
            interval,
            json,
        } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());
            commands::ingest(&config, &symbol, interval, json, cancel).await
        }
        Command::Verify { symbol, json } => commands::verify(&config, &symbol, json).await,
    }
}

/// First Ctrl-C stops new batches; in-flight ones still finish and persist.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight batches");
            cancel.cancel();
        }
    });
}
