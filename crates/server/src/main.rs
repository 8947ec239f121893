use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester_core::{
    load_config, recover_interrupted_work, validate_config, CalendarScheduler, DaemonConfig,
    ErrorFlowHandler, FileStorage, HttpFetcher, IdentifierHarvestSource, IdentifierHarvester,
    LenientHttpFetcher, LogMailer, Mailer, Notifier, ObjectHarvestSource, ObjectHarvester,
    RecordBatchLoader, RecordStore, ReportStore, RepositoryController, RepositoryStore,
    RepositoryValidator, SchedulerDaemon, SqliteRecordStore, SqliteReportStore,
    SqliteRepositoryStore, StylesheetTransformer, Transformer, WorkerKind,
};

use harvester_server::api::create_router;
use harvester_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("HARVESTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let areas = validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        database = ?config.database.path,
        sample_mode = ?config.sample_mode,
        "Configuration loaded"
    );

    // Stores
    let repositories: Arc<dyn RepositoryStore> = Arc::new(
        SqliteRepositoryStore::new(&config.database.path)
            .context("Failed to create repository store")?,
    );
    let records: Arc<dyn RecordStore> = Arc::new(
        SqliteRecordStore::new(&config.database.path).context("Failed to create record store")?,
    );
    let reports: Arc<dyn ReportStore> = Arc::new(
        SqliteReportStore::new(&config.database.path).context("Failed to create report store")?,
    );
    info!("Stores initialized");

    // Work left in flight by a previous process
    let recovery = recover_interrupted_work(records.as_ref(), repositories.as_ref());
    info!(
        records = recovery.records_reset,
        repositories = recovery.repositories_reset,
        "Startup recovery finished"
    );

    let storage = Arc::new(FileStorage::new(areas));
    storage
        .ensure_areas()
        .await
        .context("Failed to prepare storage areas")?;

    // Fetch clients: lenient for listings, strict for objects
    let list_fetcher: Arc<dyn HttpFetcher> = Arc::new(
        LenientHttpFetcher::new(&config.fetch, true).context("Failed to create fetch client")?,
    );
    let object_fetcher: Arc<dyn HttpFetcher> = Arc::new(
        LenientHttpFetcher::new(&config.fetch, false).context("Failed to create fetch client")?,
    );
    let validator = Arc::new(RepositoryValidator::new(Arc::clone(&list_fetcher)));
    let transformer: Arc<dyn Transformer> =
        Arc::new(StylesheetTransformer::new(config.storage.stylesheets.clone()));
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(config.mail.sender.clone()));

    let notifier = Notifier::default();
    let controller = Arc::new(RepositoryController::new(
        Arc::clone(&repositories),
        notifier.clone(),
    ));

    let identifier_errors = Arc::new(ErrorFlowHandler::new(
        WorkerKind::Identifier,
        config.errorflow.max_consecutive_harvest_failures,
        Arc::clone(&controller),
        Arc::clone(&reports),
        Arc::clone(&mailer),
        config.mail.recipients.clone(),
        notifier.clone(),
    ));
    let object_errors = Arc::new(ErrorFlowHandler::new(
        WorkerKind::Object,
        config.errorflow.max_consecutive_download_failures,
        Arc::clone(&controller),
        Arc::clone(&reports),
        Arc::clone(&mailer),
        config.mail.recipients.clone(),
        notifier.clone(),
    ));

    let loader = Arc::new(
        RecordBatchLoader::new(Arc::clone(&records)).with_sample_mode(config.sample_mode),
    );

    let identifier_source = Arc::new(IdentifierHarvestSource::new(
        IdentifierHarvester::new(list_fetcher, loader)
            .with_withdrawal_handling(Arc::clone(&storage), Arc::clone(&identifier_errors)),
        Arc::clone(&controller),
        identifier_errors,
        notifier.clone(),
    ));
    let object_source = Arc::new(ObjectHarvestSource::new(
        ObjectHarvester::new(
            object_fetcher,
            Arc::clone(&records),
            storage,
            transformer,
            notifier.clone(),
        ),
        Arc::clone(&controller),
        object_errors,
        config.scheduler.queue_page_size,
    )
    .with_failed_retry_delay(Duration::from_secs(config.scheduler.failed_retry_delay_secs)));

    let identifier_daemon = Arc::new(SchedulerDaemon::new(
        DaemonConfig::identifier_harvester(&config.scheduler),
        identifier_source,
        notifier.clone(),
    ));
    let object_daemon = Arc::new(SchedulerDaemon::new(
        DaemonConfig::object_harvester(&config.scheduler),
        object_source,
        notifier.clone(),
    ));
    let calendar = Arc::new(CalendarScheduler::new(
        Arc::clone(&controller),
        Duration::from_secs(config.scheduler.calendar_interval_secs),
    ));

    identifier_daemon.start().await;
    object_daemon.start().await;
    calendar.start();
    info!("Scheduler daemons started");

    let state = Arc::new(AppState::new(
        config.clone(),
        repositories,
        records,
        reports,
        controller,
        notifier,
        identifier_daemon,
        object_daemon,
        calendar,
        validator,
    ));

    let app = create_router(Arc::clone(&state));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Running workers finish before the daemons report stopped
    info!("Server shutting down...");
    state.shutdown().await;
    info!("Scheduler daemons stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
