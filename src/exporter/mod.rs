//! Export invoker.
//!
//! Performs exactly one attempt at the remote export call and classifies the
//! outcome. Retry policy is left to the caller; a failed attempt is reported
//! and the next trigger tries again.

mod client;
mod error;
mod models;

pub use client::{DgraphExportClient, ExportCredentials, ExportOptions};
pub use error::ExportError;
pub use models::{ExportOutput, ExportResponse, SUCCESS_CODE};

use async_trait::async_trait;

/// A single idempotent export operation against a remote target.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Run one export attempt.
    async fn export(&self) -> Result<ExportOutput, ExportError>;

    /// Human-readable description of the target, used in logs and status.
    fn target(&self) -> String;
}
