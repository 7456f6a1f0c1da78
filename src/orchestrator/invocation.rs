use crate::cleanup::SweepReport;
use crate::exporter::{ExportError, ExportOutput};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Per-process election state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// What started an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    OnDemand,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned to on-demand callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("an export is already in progress")]
    Busy,
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Result of the sweep that followed an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub removed: usize,
    pub failures: Vec<String>,
}

impl From<&SweepReport> for CleanupSummary {
    fn from(report: &SweepReport) -> Self {
        Self {
            removed: report.removed.len(),
            failures: report.failures.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// One terminated export attempt.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Result<ExportOutput, ExportError>,
    /// `None` when no sweep ran.
    pub cleanup: Option<CleanupSummary>,
}

impl Invocation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Label used in metrics and status output.
    pub fn status_label(&self) -> &'static str {
        match &self.outcome {
            Ok(_) => "success",
            Err(e) => e.kind(),
        }
    }

    pub fn summary(&self) -> InvocationSummary {
        let (message, exported_files) = match &self.outcome {
            Ok(output) => (output.response.message.clone(), output.exported_files.len()),
            Err(e) => (e.to_string(), 0),
        };
        InvocationSummary {
            trigger: self.trigger,
            started_at: self.started_at.to_rfc3339(),
            duration_ms: self.duration.as_millis() as u64,
            status: self.status_label().to_string(),
            message,
            exported_files,
            cleanup: self.cleanup.clone(),
        }
    }
}

/// Serializable view of the last invocation for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationSummary {
    pub trigger: Trigger,
    pub started_at: String,
    pub duration_ms: u64,
    pub status: String,
    pub message: String,
    pub exported_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupSummary>,
}

/// Decision taken for one timer tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Ran(Invocation),
    SkippedNotLeader,
    SkippedBusy,
}

impl TickOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, TickOutcome::Ran(_))
    }
}
