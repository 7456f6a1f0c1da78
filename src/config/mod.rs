mod file_config;

pub use file_config::{CleanupConfig, ExportConfig, FileConfig, LeaseConfig};

use crate::exporter::ExportCredentials;
use crate::leader::ElectorSettings;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Where the lease record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LeaseBackend {
    /// SQLite file shared by every replica
    #[default]
    Sqlite,
    /// Process-local, single replica only
    Memory,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub endpoint_url: String,
    pub export_dest: String,
    pub export_format: String,
    pub export_period_sec: u64,
    pub export_timeout_sec: u64,
    pub run_on_leadership_gained: bool,
    pub tmp_root: PathBuf,
    pub tmp_pattern: String,
    pub tmp_cleanup: bool,
    pub tmp_cleanup_on_failure: bool,
    pub lease_backend: LeaseBackend,
    pub lease_db_path: PathBuf,
    pub lease_name: String,
    pub lease_identity: Option<String>,
    pub lease_duration_sec: u64,
    pub renew_deadline_sec: u64,
    pub retry_period_sec: u64,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Read from the environment, never from flags or files.
    pub credentials: ExportCredentials,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:8080/admin".to_string(),
            export_dest: String::new(),
            export_format: "rdf".to_string(),
            export_period_sec: 3600,
            export_timeout_sec: 3600,
            run_on_leadership_gained: false,
            tmp_root: PathBuf::from("/tmp"),
            tmp_pattern: "export[0-9]+".to_string(),
            tmp_cleanup: false,
            tmp_cleanup_on_failure: false,
            lease_backend: LeaseBackend::Sqlite,
            lease_db_path: PathBuf::from("./lease.db"),
            lease_name: "export-scheduler".to_string(),
            lease_identity: None,
            lease_duration_sec: 15,
            renew_deadline_sec: 10,
            retry_period_sec: 2,
            port: 8081,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            credentials: ExportCredentials::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub export: ExportSettings,
    pub cleanup: CleanupSettings,
    pub lease: LeaseSettings,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub endpoint_url: String,
    pub destination: String,
    pub format: String,
    pub period: Duration,
    pub timeout: Duration,
    pub run_on_leadership_gained: bool,
    pub anonymous: bool,
    pub namespace: Option<i64>,
    pub credentials: ExportCredentials,
}

#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub enabled: bool,
    pub on_failure: bool,
    pub root: PathBuf,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub backend: LeaseBackend,
    pub db_path: PathBuf,
    pub name: String,
    pub identity: String,
    pub duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaseSettings {
    pub fn elector_settings(&self) -> ElectorSettings {
        ElectorSettings {
            lease_name: self.name.clone(),
            identity: self.identity.clone(),
            lease_duration: self.duration,
            renew_deadline: self.renew_deadline,
            retry_period: self.retry_period,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let logging_level = match file.logging_level {
            Some(raw) => parse_logging_level(&raw)
                .with_context(|| format!("Invalid logging_level \"{}\"", raw))?,
            None => cli.logging_level.clone(),
        };

        let export_file = file.export.unwrap_or_default();
        let export = ExportSettings {
            endpoint_url: export_file
                .endpoint_url
                .unwrap_or_else(|| cli.endpoint_url.clone()),
            destination: export_file
                .destination
                .unwrap_or_else(|| cli.export_dest.clone()),
            format: export_file
                .format
                .unwrap_or_else(|| cli.export_format.clone())
                .to_lowercase(),
            period: Duration::from_secs(export_file.period_sec.unwrap_or(cli.export_period_sec)),
            timeout: Duration::from_secs(
                export_file.timeout_sec.unwrap_or(cli.export_timeout_sec),
            ),
            run_on_leadership_gained: export_file
                .run_on_leadership_gained
                .unwrap_or(cli.run_on_leadership_gained),
            anonymous: export_file.anonymous.unwrap_or(false),
            namespace: export_file.namespace,
            credentials: cli.credentials.clone(),
        };

        if export.endpoint_url.trim().is_empty() {
            bail!("Export endpoint URL must not be empty");
        }
        if export.format != "rdf" && export.format != "json" {
            bail!(
                "Unsupported export format \"{}\" (expected rdf or json)",
                export.format
            );
        }
        if export.period.is_zero() {
            bail!("Export period must be positive");
        }
        if export.timeout.is_zero() {
            bail!("Export timeout must be positive");
        }

        let cleanup_file = file.cleanup.unwrap_or_default();
        let cleanup = CleanupSettings {
            enabled: cleanup_file.enabled.unwrap_or(cli.tmp_cleanup),
            on_failure: cleanup_file.on_failure.unwrap_or(cli.tmp_cleanup_on_failure),
            root: cleanup_file
                .root
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.tmp_root.clone()),
            pattern: cleanup_file
                .pattern
                .unwrap_or_else(|| cli.tmp_pattern.clone()),
        };
        if cleanup.pattern.is_empty() {
            bail!("Cleanup pattern must not be empty");
        }
        regex::Regex::new(&cleanup.pattern)
            .with_context(|| format!("Invalid cleanup pattern \"{}\"", cleanup.pattern))?;

        let lease_file = file.lease.unwrap_or_default();
        let backend = match lease_file.backend {
            Some(raw) => LeaseBackend::from_str(&raw, true)
                .map_err(|_| anyhow::anyhow!("Invalid lease backend \"{}\"", raw))?,
            None => cli.lease_backend,
        };
        let lease = LeaseSettings {
            backend,
            db_path: lease_file
                .db_path
                .map(PathBuf::from)
                .unwrap_or_else(|| cli.lease_db_path.clone()),
            name: lease_file.name.unwrap_or_else(|| cli.lease_name.clone()),
            identity: lease_file
                .identity
                .or_else(|| cli.lease_identity.clone())
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(default_identity),
            duration: Duration::from_secs(
                lease_file.duration_sec.unwrap_or(cli.lease_duration_sec),
            ),
            renew_deadline: Duration::from_secs(
                lease_file
                    .renew_deadline_sec
                    .unwrap_or(cli.renew_deadline_sec),
            ),
            retry_period: Duration::from_secs(
                lease_file.retry_period_sec.unwrap_or(cli.retry_period_sec),
            ),
        };
        lease
            .elector_settings()
            .validate()
            .context("Invalid lease configuration")?;

        Ok(Self {
            port,
            metrics_port,
            logging_level,
            export,
            cleanup,
            lease,
        })
    }
}

/// Object-store credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
/// and `AWS_SESSION_TOKEN`. Missing variables are treated as empty.
pub fn credentials_from_env() -> ExportCredentials {
    let var = |name: &str| std::env::var(name).unwrap_or_default();
    ExportCredentials {
        access_key: var("AWS_ACCESS_KEY_ID"),
        secret_key: var("AWS_SECRET_ACCESS_KEY"),
        session_token: var("AWS_SESSION_TOKEN"),
    }
}

/// `HOSTNAME` when set, otherwise a random identity.
fn default_identity() -> String {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => host,
        _ => format!("export-scheduler-{}", uuid::Uuid::new_v4()),
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
