mod cli;
mod pipeline;

use std::sync::Arc;

use cli::{CliError, CliOptions};
use pipeline::{PipelineDriver, PipelineReport, PipelineSettings};
use shared::config::{GatewayConfig, PipelineConfig, TelemetryConfig, load_dotenv};
use shared::llm::{ProviderGateway, TemplateRegistry};
use shared::repos::{JsonFileStore, RecordSink, Store, StoreError};
use shared::telemetry::TelemetrySink;
use tokio::signal;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let dotenv = load_dotenv();
    init_tracing();
    if let Err(err) = dotenv {
        warn!("failed to load .env file: {err}");
    }

    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    let mut config = match PipelineConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read pipeline config: {err}");
            std::process::exit(1);
        }
    };
    if !options.locations.is_empty() {
        config.locations = options.locations.clone();
    }
    if !options.interests.is_empty() {
        config.interests = options.interests.clone();
    }

    let gateway_config = match GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read gateway config: {err}");
            std::process::exit(1);
        }
    };
    let telemetry_config = match TelemetryConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read telemetry config: {err}");
            std::process::exit(1);
        }
    };

    let telemetry = Arc::new(TelemetrySink::from_config(&telemetry_config).await);
    let configured = gateway_config.configured_providers();
    let gateway = match ProviderGateway::new(gateway_config, Arc::clone(&telemetry)) {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("failed to initialize provider gateway: {err}");
            std::process::exit(1);
        }
    };
    let sink = match open_sink(&config).await {
        Ok(sink) => sink,
        Err(err) => {
            error!("failed to open record store: {err}");
            std::process::exit(1);
        }
    };
    let registry = TemplateRegistry::builtin();

    info!(
        environment = config.environment.as_str(),
        session_id = telemetry.session_id(),
        providers = ?configured.iter().map(|kind| kind.as_str()).collect::<Vec<_>>(),
        locations = config.locations.len(),
        interests = config.interests.len(),
        "worker starting"
    );

    let driver = PipelineDriver::new(
        &gateway,
        &registry,
        sink.as_ref(),
        &telemetry,
        PipelineSettings::from_config(&config),
    );

    let schedule_seconds = match config.schedule_seconds {
        Some(seconds) if !options.once => seconds,
        _ => {
            let report = driver.run(&config.locations, &config.interests).await;
            log_report(&report);
            if report.stats.failed > 0 {
                std::process::exit(1);
            }
            return;
        }
    };

    info!("worker scheduled (run every {schedule_seconds} seconds)");
    let mut ticker = time::interval(Duration::from_secs(schedule_seconds));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let report = driver.run(&config.locations, &config.interests).await;
                log_report(&report);
            }
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "worker=info,shared=info".to_string());
    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise JSON files under the output dir.
async fn open_sink(config: &PipelineConfig) -> Result<Box<dyn RecordSink>, StoreError> {
    match &config.database_url {
        Some(database_url) => {
            let store = Store::connect(database_url, config.database_max_connections).await?;
            store.run_migrations(&config.migrations_dir).await?;
            info!("record store: postgres");
            Ok(Box::new(store))
        }
        None => {
            info!(
                "record store: json files under {}",
                config.output_dir.display()
            );
            Ok(Box::new(JsonFileStore::new(&config.output_dir)))
        }
    }
}

fn log_report(report: &PipelineReport) {
    for combination in &report.combinations {
        match &combination.error {
            Some(error) => warn!(
                combination = %combination.key,
                state = ?combination.state,
                "combination did not complete: {error}"
            ),
            None => debug!(
                combination = %combination.key,
                state = ?combination.state,
                origin = combination.origin.map(|origin| origin.as_str()),
                records = combination.records_written,
                "combination finished"
            ),
        }
    }

    info!(
        attempted = report.stats.attempted,
        successful = report.stats.successful,
        failed = report.stats.failed,
        skipped = report.stats.skipped,
        "pipeline run finished"
    );
}

fn print_usage() {
    eprintln!(
        "Usage: cargo run -p worker -- [--once] [--location NAME]... [--interest NAME]...\n\
         \n\
         Runs the research and structuring pipeline over every location x interest pair.\n\
         Without --once the worker repeats every PIPELINE_SCHEDULE_SECONDS when that is set.\n\
         \n\
         Options:\n\
         - --once             Run a single pass and exit (non-zero when any pair failed)\n\
         - --location NAME    Override PIPELINE_LOCATIONS (repeatable)\n\
         - --interest NAME    Override PIPELINE_INTERESTS (repeatable)\n\
         - --help             Show this help text"
    );
}
