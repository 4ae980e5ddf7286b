use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use scribeflow::config::{self, LogFormat, LoggingConfig};
use scribeflow::db::queue_repo;
use scribeflow::sanitize::redact_url;
use scribeflow::worker::{PoolSettings, Reconciler};
use scribeflow::{
    BackendClient, Config, ConfigError, Database, FilesystemAudioStore, JobOutcome, JobWorker,
    LogNotifier, WorkerPool,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV_VAR: &str = "SCRIBEFLOW_CONFIG";

fn main() {
    let Some(config_path) = config_path() else {
        eprintln!("Usage: scribeflow-worker [CONFIG_PATH] (or set {CONFIG_ENV_VAR})");
        std::process::exit(2);
    };

    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);
    info!(
        "Starting scribeflow worker v{} with {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    if let Err(e) = run(config) {
        error!("Worker exited with error: {}", e);
        std::process::exit(1);
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}

fn init_logging(logging: &LoggingConfig) {
    // Route `log` records from the storage layer into tracing.
    let _ = tracing_log::LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    let _ = match logging.format {
        LogFormat::Plain => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
}

fn run(config: Config) -> scribeflow::Result<()> {
    let api_key = config::resolve_api_key(&config.backend)?;
    let db_path = config::resolve_database_path(&config).ok_or_else(|| ConfigError::Validation {
        message: "database.path is not set and no home directory was found".to_string(),
    })?;
    let db = Database::open(&db_path)?;

    let store = Arc::new(FilesystemAudioStore::new(&config.storage.audio_directory));
    let backend = BackendClient::new(&config.backend, api_key)?;
    info!(
        "Transcription backend at {} (api key {})",
        redact_url(backend.base_url()),
        if backend.has_api_key() { "set" } else { "not set" }
    );

    let worker = Arc::new(JobWorker::new(
        db.clone(),
        store,
        backend,
        Arc::new(LogNotifier),
        &config,
    ));
    let reconciler = Reconciler::new(db.clone(), config.retry.max_retries);
    info!("{} jobs queued at startup", queue_repo::depth(&db)?);

    let pool = WorkerPool::start(
        db,
        worker,
        reconciler,
        PoolSettings::from(&config.workers),
    )?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    while running.load(Ordering::SeqCst) {
        if let Some(outcome) = pool.recv_outcome_timeout(Duration::from_millis(250)) {
            log_outcome(&outcome);
        }
    }

    pool.shutdown();
    while let Some(outcome) = pool.try_recv_outcome() {
        log_outcome(&outcome);
    }
    pool.wait();
    info!("Scribeflow worker stopped");
    Ok(())
}

fn log_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed { .. } | JobOutcome::Retrying { .. } => info!("Job {}", outcome),
        JobOutcome::Failed { .. } | JobOutcome::Error { .. } => warn!("Job {}", outcome),
        _ => log::debug!("Job {}", outcome),
    }
}
