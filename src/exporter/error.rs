use thiserror::Error;

/// Classified failure of a single export attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// Endpoint or destination are malformed. Never recoverable at runtime.
    #[error("invalid export configuration: {0}")]
    ConfigInvalid(String),

    /// Connectivity, timeout or an undecodable response.
    #[error("export transport failure: {0}")]
    TransportFailure(String),

    /// The remote side answered and refused or failed the operation.
    #[error("export finished with unsuccessful code \"{code}\": {message}")]
    RemoteRejected { code: String, message: String },

    /// The call was aborted because the process is shutting down.
    #[error("export cancelled by shutdown")]
    Cancelled,
}

impl ExportError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::ConfigInvalid(_) => "config_invalid",
            ExportError::TransportFailure(_) => "transport_failure",
            ExportError::RemoteRejected { .. } => "remote_rejected",
            ExportError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ExportError::ConfigInvalid(err.to_string())
        } else {
            ExportError::TransportFailure(err.to_string())
        }
    }
}
