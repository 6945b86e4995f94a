//! margin-dispatch CLI: fetch a product's series and estimate margins.

use clap::{Parser, Subcommand};
use margin_dispatch::client::{CatalogSource, PrismaClient};
use margin_dispatch::config::{Config, DispatchConfig};
use margin_dispatch::db::{Db, RUN_LOCK_KEY};
use margin_dispatch::engine::{Dispatcher, RunOutcome};
use margin_dispatch::model::SeriesRecord;
use margin_dispatch::sink::{TsvSink, deliver, merge_rows};
use margin_dispatch::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "margin-dispatch", about = "Adaptive batch margin estimator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate margins for every series of a product
    Run {
        /// Product code to fetch series for
        #[arg(long, default_value = "ODAX")]
        product: String,
        /// Dispatcher tuning file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the worker pool size
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Tab-separated output file
        #[arg(long, default_value = "Margin_Result.txt")]
        output: PathBuf,
        /// Skip the database upsert even if DATABASE_URL is set
        #[arg(long)]
        no_db: bool,
    },
    /// Fetch a product's series catalog and summarize it
    Series {
        /// Product code
        #[arg(default_value = "ODAX")]
        product: String,
    },
    /// Validate environment and dispatcher tuning, then exit
    CheckConfig {
        /// Dispatcher tuning file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    match cli.command {
        Command::Run {
            product,
            config: tuning,
            max_concurrency,
            output,
            no_db,
        } => {
            let mut dispatch = load_tuning(tuning.as_ref())?;
            if let Some(n) = max_concurrency {
                dispatch.max_concurrency = n;
            }
            cmd_run(&config, dispatch, &product, output, no_db).await
        }
        Command::Series { product } => {
            let client =
                PrismaClient::new(&config.api_key, &config.base_url, &DispatchConfig::default())?;
            cmd_series(&client, &product).await
        }
        Command::CheckConfig { config: tuning } => {
            let dispatch = load_tuning(tuning.as_ref())?;
            println!("base url:         {}", config.base_url);
            let database = if config.database_url.is_some() {
                "configured"
            } else {
                "-"
            };
            println!("database:         {database}");
            println!(
                "otel endpoint:    {}",
                config.otel_endpoint.as_deref().unwrap_or("-")
            );
            println!("max concurrency:  {}", dispatch.max_concurrency);
            println!(
                "chunk size:       {} (min {}, max {})",
                dispatch.admission.initial_size,
                dispatch.admission.min_size,
                dispatch.admission.max_size
            );
            println!(
                "retry:            {} attempts, {}ms step, {}ms cap",
                dispatch.retry.max_attempts,
                dispatch.retry.base_delay_ms,
                dispatch.retry.max_delay_ms
            );
            println!("configuration ok");
            Ok(())
        }
    }
}

fn load_tuning(path: Option<&PathBuf>) -> anyhow::Result<DispatchConfig> {
    let dispatch = match path {
        Some(path) => DispatchConfig::from_file(path)?,
        None => DispatchConfig::default(),
    };
    dispatch.validate()?;
    Ok(dispatch)
}

async fn cmd_run(
    config: &Config,
    dispatch: DispatchConfig,
    product: &str,
    output: PathBuf,
    no_db: bool,
) -> anyhow::Result<()> {
    let db = match (&config.database_url, no_db) {
        (Some(url), false) => {
            let db = Db::connect(url.expose_secret()).await?;
            db.migrate().await?;
            Some(db)
        }
        _ => None,
    };

    let lock = match &db {
        Some(db) => match db.try_run_lock(RUN_LOCK_KEY).await? {
            Some(lock) => Some(lock),
            None => {
                info!(key = RUN_LOCK_KEY, "another run holds the lock, exiting");
                return Ok(());
            }
        },
        None => None,
    };

    let client = Arc::new(PrismaClient::new(&config.api_key, &config.base_url, &dispatch)?);
    let series = client.fetch_series(product).await?;
    info!(product, series = series.len(), "catalog loaded");

    let cancel = CancellationToken::new();
    let ctrl = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("interrupt received, cancelling run");
        ctrl.cancel();
    });

    let dispatcher = Dispatcher::new(Arc::clone(&client), dispatch)?.with_cancellation(cancel);
    let outcome = dispatcher
        .run(series.iter().map(SeriesRecord::work_item))
        .await;
    log_failures(&outcome);

    let rows = merge_rows(&series, &outcome.results);
    // Export and storage failures are reported but never fail the run.
    deliver(&TsvSink::new(output), "tsv", &rows).await;
    if let Some(db) = &db {
        deliver(db, "postgres", &rows).await;
    }
    if let Some(lock) = lock {
        if let Err(e) = lock.release().await {
            warn!("releasing run lock failed: {e}");
        }
    }

    info!("run finished: {}", outcome.report);
    Ok(())
}

fn log_failures(outcome: &RunOutcome) {
    for failure in &outcome.failures {
        warn!(
            iid = %failure.id,
            attempts = failure.attempts,
            "failed: {}",
            failure.reason
        );
    }
    if !outcome.cancelled.is_empty() {
        warn!(count = outcome.cancelled.len(), "items cancelled before completion");
    }
}

async fn cmd_series(client: &PrismaClient, product: &str) -> anyhow::Result<()> {
    let series = client.fetch_series(product).await?;
    if series.is_empty() {
        println!("No series found for {product}.");
        return Ok(());
    }

    let mut by_expiry: BTreeMap<(Option<u32>, Option<&str>), usize> = BTreeMap::new();
    for record in &series {
        *by_expiry
            .entry((record.contract_date, record.call_put_flag.as_deref()))
            .or_default() += 1;
    }

    println!("{:<10}  {:<4}  SERIES", "EXPIRY", "C/P");
    println!("{}", "-".repeat(28));
    for ((date, flag), count) in &by_expiry {
        let date = date.map_or_else(|| "-".to_string(), |d| d.to_string());
        let flag = flag.unwrap_or("-");
        println!("{date:<10}  {flag:<4}  {count}");
    }
    println!("\n{} series", series.len());
    Ok(())
}
