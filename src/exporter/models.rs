//! Export payloads.
//!
//! `ExportOutput` is what the rest of the crate sees and what the HTTP
//! gateway serializes back to callers. The `Graphql*` types match the JSON
//! returned by the Dgraph admin endpoint.

use serde::{Deserialize, Serialize};

/// Response code the remote reports for a completed export.
pub const SUCCESS_CODE: &str = "Success";

/// Status block reported by the remote export call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportResponse {
    pub message: String,
    pub code: String,
}

/// Successful export result: remote status plus the produced artifacts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportOutput {
    pub response: ExportResponse,
    pub exported_files: Vec<String>,
}

impl ExportOutput {
    pub fn files(&self) -> &[String] {
        &self.exported_files
    }
}

// =============================================================================
// GraphQL wire types
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlEnvelope {
    #[serde(default)]
    pub data: Option<GraphqlData>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlData {
    pub export: Option<GraphqlExportPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphqlExportPayload {
    pub response: Option<GraphqlResponseStatus>,
    #[serde(default)]
    pub exported_files: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct GraphqlResponseStatus {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GraphqlError {
    pub message: String,
}

/// `ExportInput` as declared by the Dgraph admin schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GraphqlExportInput {
    pub format: String,
    pub destination: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<i64>,
}
