use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ledgerwatch_engine::batch::{build_units, run_batch};
use ledgerwatch_engine::config::Config;
use ledgerwatch_engine::records::csv::load_csv_records;
use ledgerwatch_engine::records::normalizer::{normalize_batch, RawBatch};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=debug for per-engine detail,
    // LOG_FORMAT=json for machine-readable output)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!("LedgerWatch engine starting");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());
    let batch_path = args.next().ok_or_else(|| {
        eyre::eyre!("Usage: ledgerwatch-engine <config.toml> <batch.json> [output.json]")
    })?;
    let output_path = args.next();

    let config = Config::load(&config_path)?;
    tracing::info!(
        scenarios = config.stress.scenarios.len(),
        csv_sources = config.csv_sources.len(),
        "Configuration loaded from {}",
        config_path
    );

    // Load the batch, then append any CSV sources
    let mut raw = RawBatch::load(&batch_path)?;
    for source in &config.csv_sources {
        let records = load_csv_records(&source.path)?;
        tracing::info!(
            kind = %source.kind,
            count = records.len(),
            path = %source.path,
            "CSV records loaded"
        );
        raw.records_mut(source.kind).extend(records);
    }

    let batch = normalize_batch(&raw, &config.normalizer);
    let plan = build_units(batch);
    tracing::info!(units = plan.units.len(), period = ?plan.period, "Work units planned");

    // Ctrl+C stops scheduling; units already running finish
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, no new units will start");
            signal.cancel();
        }
    });

    let report = run_batch(plan, Arc::new(config), shutdown).await;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| eyre::eyre!("Failed to serialize batch report: {}", e))?;
    match output_path {
        Some(path) => {
            std::fs::write(&path, json)
                .map_err(|e| eyre::eyre!("Failed to write report file '{}': {}", path, e))?;
            tracing::info!(path = %path, "Report written");
        }
        None => println!("{}", json),
    }

    tracing::info!(
        completed = report.completed(),
        failed = report.failed(),
        "LedgerWatch engine finished"
    );
    Ok(())
}
