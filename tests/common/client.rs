//! HTTP client for end-to-end tests

use super::constants::*;
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    pub async fn export(&self) -> Response {
        self.client
            .post(format!("{}/api/v1/export", self.base_url))
            .send()
            .await
            .expect("Export request failed")
    }

    pub async fn status(&self) -> serde_json::Value {
        self.client
            .get(format!("{}/api/v1/status", self.base_url))
            .send()
            .await
            .expect("Status request failed")
            .json()
            .await
            .expect("Status response is not JSON")
    }
}
