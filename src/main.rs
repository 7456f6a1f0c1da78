use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use export_scheduler::cleanup::TmpSweeper;
use export_scheduler::config::{self, LeaseBackend};
use export_scheduler::exporter::{DgraphExportClient, ExportOptions, Exporter};
use export_scheduler::leader::{InMemoryLeaseStore, LeaderElector, LeaseStore, SqliteLeaseStore};
use export_scheduler::orchestrator::{ExportOrchestrator, OrchestratorSettings};
use export_scheduler::server::{
    metrics, run_metrics_server, run_server, RequestsLoggingLevel, ServerConfig,
};

#[derive(Parser, Debug)]
#[clap(about = "Periodically exports a Dgraph cluster from the replica holding the lease")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Dgraph admin GraphQL endpoint.
    #[clap(long, default_value = "http://localhost:8080/admin")]
    pub endpoint_url: String,

    /// Export destination (s3://..., minio://... or an absolute path). Empty exports to the alpha's local disk.
    #[clap(long, default_value = "")]
    pub export_dest: String,

    /// Export format: rdf or json.
    #[clap(long, default_value = "rdf")]
    pub export_format: String,

    /// Seconds between scheduled exports.
    #[clap(long, default_value_t = 3600)]
    pub export_period_sec: u64,

    /// Upper bound in seconds for a single export call.
    #[clap(long, default_value_t = 3600)]
    pub export_timeout_sec: u64,

    /// Start an export as soon as leadership is gained instead of waiting a full period.
    #[clap(long)]
    pub run_on_leadership_gained: bool,

    /// Directory scanned for leftover export directories.
    #[clap(long, default_value = "/tmp")]
    pub tmp_root: PathBuf,

    /// Regular expression matched against the whole directory name.
    #[clap(long, default_value = "export[0-9]+")]
    pub tmp_pattern: String,

    /// Remove matching directories after each successful export.
    #[clap(long)]
    pub tmp_cleanup: bool,

    /// Also clean up after a failed export.
    #[clap(long)]
    pub tmp_cleanup_on_failure: bool,

    /// Where the lease record is stored.
    #[clap(long, value_enum, default_value = "sqlite")]
    pub lease_backend: LeaseBackend,

    /// SQLite file holding the lease (shared by every replica).
    #[clap(long, default_value = "./lease.db")]
    pub lease_db_path: PathBuf,

    #[clap(long, default_value = "export-scheduler")]
    pub lease_name: String,

    /// Identity recorded in the lease. Defaults to $HOSTNAME.
    #[clap(long)]
    pub lease_identity: Option<String>,

    #[clap(long, default_value_t = 15)]
    pub lease_duration_sec: u64,

    #[clap(long, default_value_t = 10)]
    pub renew_deadline_sec: u64,

    #[clap(long, default_value_t = 2)]
    pub retry_period_sec: u64,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8081)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            endpoint_url: args.endpoint_url.clone(),
            export_dest: args.export_dest.clone(),
            export_format: args.export_format.clone(),
            export_period_sec: args.export_period_sec,
            export_timeout_sec: args.export_timeout_sec,
            run_on_leadership_gained: args.run_on_leadership_gained,
            tmp_root: args.tmp_root.clone(),
            tmp_pattern: args.tmp_pattern.clone(),
            tmp_cleanup: args.tmp_cleanup,
            tmp_cleanup_on_failure: args.tmp_cleanup_on_failure,
            lease_backend: args.lease_backend,
            lease_db_path: args.lease_db_path.clone(),
            lease_name: args.lease_name.clone(),
            lease_identity: args.lease_identity.clone(),
            lease_duration_sec: args.lease_duration_sec,
            renew_deadline_sec: args.renew_deadline_sec,
            retry_period_sec: args.retry_period_sec,
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            credentials: config::credentials_from_env(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  endpoint: {}", app_config.export.endpoint_url);
    info!("  period: {:?}", app_config.export.period);
    info!(
        "  lease: {} as {} ({:?})",
        app_config.lease.name, app_config.lease.identity, app_config.lease.backend
    );
    if app_config.export.credentials.is_empty() {
        info!("  credentials: none");
    }

    info!("Initializing metrics...");
    metrics::init_metrics();

    let lease_store: Arc<dyn LeaseStore> = match app_config.lease.backend {
        LeaseBackend::Sqlite => Arc::new(
            SqliteLeaseStore::new(&app_config.lease.db_path)
                .context("Failed to initialize lease store")?,
        ),
        LeaseBackend::Memory => Arc::new(InMemoryLeaseStore::new()),
    };
    lease_store
        .ensure_schema()
        .context("Failed to prepare lease table")?;

    let exporter: Arc<dyn Exporter> = Arc::new(DgraphExportClient::new(
        &app_config.export.endpoint_url,
        &app_config.export.destination,
        app_config.export.credentials.clone(),
        ExportOptions {
            format: app_config.export.format.clone(),
            anonymous: app_config.export.anonymous,
            namespace: app_config.export.namespace,
            timeout: app_config.export.timeout,
        },
    )?);
    info!("Export target: {}", exporter.target());

    let sweeper = if app_config.cleanup.enabled {
        let sweeper = TmpSweeper::new(&app_config.cleanup.root, &app_config.cleanup.pattern)?;
        info!(
            "Cleanup enabled for {:?} matching \"{}\"",
            app_config.cleanup.root, app_config.cleanup.pattern
        );
        Some(sweeper)
    } else {
        None
    };

    let shutdown_token = CancellationToken::new();

    let (elector, leadership_events) =
        LeaderElector::new(lease_store, app_config.lease.elector_settings())?;

    let orchestrator = Arc::new(ExportOrchestrator::new(
        exporter,
        sweeper,
        OrchestratorSettings {
            period: app_config.export.period,
            run_on_leadership_gained: app_config.export.run_on_leadership_gained,
            cleanup_on_failure: app_config.cleanup.on_failure,
        },
        app_config.lease.identity.clone(),
        shutdown_token.child_token(),
    )
    .with_leader_observer(elector.observe()));

    let elector_task = tokio::spawn(elector.run(shutdown_token.child_token()));
    let orchestrator_task = tokio::spawn(Arc::clone(&orchestrator).run(leadership_events));
    let metrics_task = tokio::spawn(run_metrics_server(
        app_config.metrics_port,
        shutdown_token.child_token(),
    ));

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
    };

    let result = tokio::select! {
        result = run_server(server_config, orchestrator, shutdown_token.child_token()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    shutdown_token.cancel();

    // Elector releases the lease; orchestrator waits for an in-flight export to abort.
    let _ = elector_task.await;
    let _ = orchestrator_task.await;
    if let Ok(Err(e)) = metrics_task.await {
        warn!("Metrics server error: {:#}", e);
    }

    info!("Shutdown complete");
    result
}
