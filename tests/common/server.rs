//! Test server lifecycle management
//!
//! Each test gets an isolated gateway, orchestrator and (optionally)
//! leader elector wired to a fake admin endpoint.

use super::constants::*;
use export_scheduler::cleanup::TmpSweeper;
use export_scheduler::exporter::{DgraphExportClient, ExportCredentials, ExportOptions};
use export_scheduler::leader::{ElectorSettings, LeaderElector, LeaseStore};
use export_scheduler::orchestrator::{ExportOrchestrator, OrchestratorSettings};
use export_scheduler::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Knobs for a spawned test server
pub struct TestServerOptions {
    pub admin_url: String,
    pub destination: String,
    pub period: Duration,
    pub sweeper: Option<TmpSweeper>,
    /// When set, the server campaigns for this lease with the given identity.
    pub lease: Option<(Arc<dyn LeaseStore>, String)>,
}

impl TestServerOptions {
    pub fn new(admin_url: &str) -> Self {
        Self {
            admin_url: admin_url.to_string(),
            destination: "s3:///backups/dgraph".to_string(),
            period: Duration::from_secs(3600),
            sweeper: None,
            lease: None,
        }
    }
}

/// Test server instance
///
/// When dropped, the server and its background tasks shut down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub orchestrator: Arc<ExportOrchestrator>,
    shutdown: CancellationToken,
}

impl TestServer {
    pub async fn spawn(admin_url: &str) -> Self {
        Self::spawn_with(TestServerOptions::new(admin_url)).await
    }

    pub async fn spawn_with(options: TestServerOptions) -> Self {
        let shutdown = CancellationToken::new();

        let exporter = DgraphExportClient::new(
            &options.admin_url,
            &options.destination,
            ExportCredentials::default(),
            ExportOptions {
                timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
                ..Default::default()
            },
        )
        .expect("Failed to build export client");

        let identity = options
            .lease
            .as_ref()
            .map(|(_, id)| id.clone())
            .unwrap_or_else(|| "test-replica".to_string());

        let orchestrator = ExportOrchestrator::new(
            Arc::new(exporter),
            options.sweeper,
            OrchestratorSettings {
                period: options.period,
                run_on_leadership_gained: false,
                cleanup_on_failure: false,
            },
            identity,
            shutdown.child_token(),
        );

        let orchestrator = match options.lease {
            Some((store, identity)) => {
                let (elector, events) = LeaderElector::new(
                    store,
                    ElectorSettings {
                        lease_name: "export-scheduler".to_string(),
                        identity,
                        lease_duration: Duration::from_millis(600),
                        renew_deadline: Duration::from_millis(400),
                        retry_period: Duration::from_millis(100),
                    },
                )
                .expect("Invalid elector settings");
                let orchestrator =
                    Arc::new(orchestrator.with_leader_observer(elector.observe()));
                tokio::spawn(elector.run(shutdown.child_token()));
                tokio::spawn(Arc::clone(&orchestrator).run(events));
                orchestrator
            }
            None => Arc::new(orchestrator),
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
        };
        let app = make_app(config, orchestrator.clone());

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            orchestrator,
            shutdown,
        };
        server.wait_for_ready().await;
        server
    }

    /// Stop the server and its elector. A held lease is released.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
