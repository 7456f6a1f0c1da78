//! HTTP client for the Dgraph admin GraphQL endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::debug;

use super::error::ExportError;
use super::models::{
    ExportOutput, ExportResponse, GraphqlEnvelope, GraphqlExportInput, SUCCESS_CODE,
};
use super::Exporter;

const EXPORT_MUTATION: &str = "mutation ($input: ExportInput!) { export(input: $input) { response { message code } exportedFiles } }";

/// Object-store credentials forwarded to the remote export.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExportCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
}

impl ExportCredentials {
    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty() && self.secret_key.is_empty() && self.session_token.is_empty()
    }
}

impl fmt::Debug for ExportCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Export knobs that are not part of the endpoint/destination pair.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Output format, "rdf" or "json".
    pub format: String,
    /// Access the destination bucket without credentials.
    pub anonymous: bool,
    /// Restrict the export to one namespace. Exports every namespace if unset.
    pub namespace: Option<i64>,
    /// Upper bound for a single remote call.
    pub timeout: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: "rdf".to_string(),
            anonymous: false,
            namespace: None,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Triggers exports through the `export` mutation of a Dgraph admin endpoint.
#[derive(Clone)]
pub struct DgraphExportClient {
    client: Client,
    endpoint: Url,
    input: GraphqlExportInput,
}

impl DgraphExportClient {
    /// Create a client for the given admin endpoint and destination.
    ///
    /// Fails with `ConfigInvalid` when the endpoint is not an absolute
    /// http(s) URL or the destination is neither empty, an absolute path,
    /// nor a URL.
    pub fn new(
        endpoint: &str,
        destination: &str,
        credentials: ExportCredentials,
        options: ExportOptions,
    ) -> Result<Self, ExportError> {
        let endpoint = parse_endpoint(endpoint)?;
        validate_destination(destination)?;

        let format = options.format.to_lowercase();
        if format != "rdf" && format != "json" {
            return Err(ExportError::ConfigInvalid(format!(
                "unsupported export format \"{}\"",
                options.format
            )));
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| ExportError::ConfigInvalid(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            input: GraphqlExportInput {
                format,
                destination: destination.to_string(),
                access_key: credentials.access_key,
                secret_key: credentials.secret_key,
                session_token: credentials.session_token,
                anonymous: options.anonymous,
                namespace: options.namespace,
            },
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn destination(&self) -> &str {
        &self.input.destination
    }
}

#[async_trait]
impl Exporter for DgraphExportClient {
    async fn export(&self) -> Result<ExportOutput, ExportError> {
        let body = json!({
            "query": EXPORT_MUTATION,
            "variables": { "input": &self.input },
        });

        debug!("POST {} (export mutation)", self.endpoint);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExportError::RemoteRejected {
                code: status.as_u16().to_string(),
                message: message.trim().to_string(),
            });
        }

        let envelope: GraphqlEnvelope = response.json().await.map_err(|e| {
            ExportError::TransportFailure(format!("malformed export response: {}", e))
        })?;

        interpret_envelope(envelope)
    }

    fn target(&self) -> String {
        if self.input.destination.is_empty() {
            format!("{} (local export)", self.endpoint)
        } else {
            format!("{} -> {}", self.endpoint, self.input.destination)
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ExportError> {
    let url = Url::parse(raw)
        .map_err(|e| ExportError::ConfigInvalid(format!("endpoint \"{}\": {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ExportError::ConfigInvalid(format!(
                "endpoint \"{}\": unsupported scheme \"{}\"",
                raw, other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(ExportError::ConfigInvalid(format!(
            "endpoint \"{}\" has no host",
            raw
        )));
    }
    Ok(url)
}

fn validate_destination(destination: &str) -> Result<(), ExportError> {
    if destination.is_empty() || destination.starts_with('/') {
        return Ok(());
    }
    if destination.chars().any(char::is_whitespace) {
        return Err(ExportError::ConfigInvalid(format!(
            "destination \"{}\" contains whitespace",
            destination
        )));
    }
    Url::parse(destination)
        .map(|_| ())
        .map_err(|e| ExportError::ConfigInvalid(format!("destination \"{}\": {}", destination, e)))
}

fn interpret_envelope(envelope: GraphqlEnvelope) -> Result<ExportOutput, ExportError> {
    if !envelope.errors.is_empty() {
        let message = envelope
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ExportError::RemoteRejected {
            code: "Error".to_string(),
            message,
        });
    }

    let payload = envelope
        .data
        .and_then(|d| d.export)
        .ok_or_else(|| {
            ExportError::TransportFailure("response carried no export payload".to_string())
        })?;

    let status = payload.response.unwrap_or_default();
    if status.code != SUCCESS_CODE {
        return Err(ExportError::RemoteRejected {
            code: status.code,
            message: status.message,
        });
    }

    Ok(ExportOutput {
        response: ExportResponse {
            message: status.message,
            code: status.code,
        },
        exported_files: payload.exported_files.unwrap_or_default(),
    })
}
