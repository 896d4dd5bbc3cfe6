//! apiclarity-backend: telemetry ingestion, REST API and analysis modules
//! in one process.
//!
//! ## Listeners
//! - `BACKEND_REST_PORT` (8080): management and UI REST API
//! - `HTTP_TRACES_PORT` (9000): `POST /api/telemetry` from capture agents
//! - `HEALTH_CHECK_ADDRESS` (:8081): liveness and readiness probes
//!
//! ## Usage
//! ```text
//! apiclarity-backend [--config <path>]
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use apiclarity::config::Config;
use apiclarity::modules::trace_analyzer::{self, TraceAnalyzerConfig};
use apiclarity::modules::{Accessor, Core, Registry};
use apiclarity::notifier::{Notifier, DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS};
use apiclarity::pipeline::{CidrClassifier, Pipeline};
use apiclarity::rest::control::SPEC_RECONSTRUCTOR;
use apiclarity::rest::health::Readiness;
use apiclarity::rest::ingest::IngestState;
use apiclarity::rest::{self, AppState};
use apiclarity::sampling::{HttpSamplingManager, NoopSamplingManager, SamplingController, SamplingManager};
use apiclarity::services::{ReviewCleaner, StateBackup};
use apiclarity::speculator::SpeculatorRepository;
use apiclarity::storage::init_storage;
use apiclarity::utils::bootstrap::{connect_with_retry, init_tracing, wait_for_signal, Shutdown};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::load(config_path().as_deref())?;
    init_tracing(config.enable_db_info_logs);
    info!("starting apiclarity backend");
    if config.enable_tls {
        warn!(
            rest_tls_port = config.backend_rest_tls_port,
            traces_tls_port = config.http_traces_tls_port,
            "TLS listeners are not served; ENABLE_TLS only affects notification delivery"
        );
    }

    let classifier = CidrClassifier::new(config.internal_networks()?);

    let database = config.database()?;
    let db = connect_with_retry("database", || init_storage(&database)).await?;
    info!("storage initialized");

    let speculators = Arc::new(SpeculatorRepository::load_or_new(&config.state_backup_path()));

    let manager: Arc<dyn SamplingManager> = if config.trace_sampling_manager_url.is_empty() {
        Arc::new(NoopSamplingManager)
    } else {
        Arc::new(HttpSamplingManager::new(&config.trace_sampling_manager_url)?)
    };
    let sampling = SamplingController::new(db.clone(), manager, config.trace_sampling_enabled);

    let (notifier, notifier_workers) = if config.notification_backend_prefix.is_empty() {
        info!("notification backend not configured");
        (Notifier::disabled(), None)
    } else {
        let (notifier, workers) = Notifier::start(
            &config.notification_backend_prefix,
            config
                .enable_tls
                .then(|| Path::new(config.root_cert_file_path.as_str())),
            DEFAULT_QUEUE_SIZE,
            DEFAULT_WORKERS,
        )?;
        (notifier, Some(workers))
    };

    let registry = trace_analyzer::register(Registry::new(), TraceAnalyzerConfig::from_config(&config));
    let mut components = vec![SPEC_RECONSTRUCTOR.to_string()];
    components.extend(registry.names());
    sampling.init_components(&components).await;

    let accessor = Accessor::new(db.clone(), sampling, notifier.clone(), speculators.clone());
    let core = Arc::new(Core::build(registry, accessor).await);
    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        speculators.clone(),
        classifier,
        core.clone(),
    ));

    let (shutdown_tx, shutdown) = Shutdown::new();
    let readiness = Readiness::default();
    let mut servers: JoinSet<Result<(), BoxError>> = JoinSet::new();

    let app_state = AppState {
        db: db.clone(),
        speculators: speculators.clone(),
        core,
        notifier: notifier.clone(),
    };
    servers.spawn(rest::serve(app_state, config.backend_rest_port, shutdown.clone()));
    servers.spawn(rest::ingest::serve(
        IngestState {
            db: db.clone(),
            pipeline,
        },
        config.http_traces_port,
        shutdown.clone(),
    ));
    {
        let readiness = readiness.clone();
        let address = config.health_check_address.clone();
        let shutdown = shutdown.clone();
        servers.spawn(async move { rest::health::serve(readiness, &address, shutdown).await });
    }

    let backup = tokio::spawn(
        StateBackup::new(
            speculators,
            config.state_backup_path(),
            config.state_backup_interval(),
        )
        .run(shutdown.clone()),
    );
    let cleaner = tokio::spawn(
        ReviewCleaner::new(db.clone(), config.database_cleaner_interval()).run(shutdown.clone()),
    );

    readiness.set_ready(true);
    info!("apiclarity backend ready");

    tokio::select! {
        _ = wait_for_signal() => {}
        Some(result) = servers.join_next() => match result {
            Ok(Ok(())) => info!("server exited"),
            Ok(Err(e)) => error!(error = %e, "server failed"),
            Err(e) => error!(error = %e, "server task panicked"),
        },
    }

    info!("shutting down");
    readiness.set_ready(false);
    if let Err(e) = shutdown_tx.send(true) {
        debug!(error = %e, "no servers left to signal shutdown");
    }
    while let Some(result) = servers.join_next().await {
        match result {
            Ok(Err(e)) => error!(error = %e, "server failed during shutdown"),
            Err(e) => error!(error = %e, "server task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = backup.await {
        error!(error = %e, "state backup task panicked");
    }
    if let Err(e) = cleaner.await {
        error!(error = %e, "review cleaner task panicked");
    }

    notifier.close();
    if let Some(workers) = notifier_workers {
        workers.join().await;
    }
    db.pool().close().await;
    info!("apiclarity backend stopped");
    Ok(())
}
