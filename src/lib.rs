//! Lease-gated export scheduler.
//!
//! One replica at a time holds a lease and triggers periodic exports of a
//! remote database. Any replica accepts on-demand export requests over HTTP.

pub mod cleanup;
pub mod config;
pub mod exporter;
pub mod leader;
pub mod orchestrator;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use exporter::{DgraphExportClient, ExportError, Exporter};
pub use leader::{InMemoryLeaseStore, LeaseStore, SqliteLeaseStore};
pub use orchestrator::{ExportOrchestrator, InvokeError};
pub use server::{run_server, RequestsLoggingLevel};
