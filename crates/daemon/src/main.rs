use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use lapse_daemon::config::LapseConfig;
use lapse_daemon::runner;
use lapse_daemon::store_factory;
use lapse_worker::SweepMetrics;

/// Suspends accounts that have been inactive for too long.
#[derive(Parser, Debug)]
#[command(name = "lapse", about = "Scheduled suspension of inactive accounts")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "lapse.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run the sweep on its schedule until SIGINT or SIGTERM (default).
    Run,
    /// Run one sweep, print the report as JSON, and exit.
    Once,
    /// Run store backend migrations, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = Path::new(&cli.config);
    let config = LapseConfig::load(config_path)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => {
            lapse_daemon::telemetry::init_fmt();
            run_migrate(&config).await?;
        }
        Commands::Once => {
            lapse_daemon::telemetry::init_fmt();
            log_missing_config(config_path);
            run_once(&config).await?;
        }
        Commands::Run => {
            let telemetry_guard = lapse_daemon::telemetry::init(&config.telemetry);
            log_missing_config(config_path);
            let result = run_scheduler(&config).await;
            if let Err(ref e) = result {
                error!(error = %e, "lapse stopped with an error");
            }
            telemetry_guard.shutdown();
            result?;
        }
    }

    Ok(())
}

fn log_missing_config(path: &Path) {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
    }
}

async fn run_scheduler(config: &LapseConfig) -> Result<(), Box<dyn std::error::Error>> {
    let repository = store_factory::create_repository(&config.store).await?;
    let metrics = Arc::new(SweepMetrics::default());
    let (job, events) = runner::build_job(config, repository, Arc::clone(&metrics))?;
    let logger = runner::spawn_event_logger(events);

    info!(
        role = %job.config().role,
        threshold_seconds = job.config().threshold.as_std().as_secs(),
        page_size = job.config().page_size,
        "suspension job configured"
    );

    let (mut scheduler, shutdown_tx) = runner::build_scheduler(config, job)?;
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    scheduler.run().await;
    drop(scheduler);

    let logged = logger.await.unwrap_or_default();
    let snapshot = metrics.snapshot();
    info!(
        events = logged,
        sweeps_completed = snapshot.sweeps_completed,
        sweeps_failed = snapshot.sweeps_failed,
        sweeps_timed_out = snapshot.sweeps_timed_out,
        accounts_suspended = snapshot.accounts_suspended,
        accounts_failed = snapshot.accounts_failed,
        "lapse shut down"
    );
    Ok(())
}

async fn run_once(config: &LapseConfig) -> Result<(), Box<dyn std::error::Error>> {
    let repository = store_factory::create_repository(&config.store).await?;
    let (job, events) =
        runner::build_job(config, repository, Arc::new(SweepMetrics::default()))?;
    let logger = runner::spawn_event_logger(events);

    let report = runner::run_once(config, &job).await?;
    drop(job);
    let _ = logger.await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_migrate(config: &LapseConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.store.backend == "memory" {
        info!("memory backend has no migrations");
        return Ok(());
    }
    info!(backend = %config.store.backend, "running store migrations...");
    let _repository = store_factory::create_repository(&config.store).await?;
    info!(backend = %config.store.backend, "store migrations complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
