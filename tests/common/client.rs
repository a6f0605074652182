//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all dump server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client authenticating with a bearer token
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    token: Option<String>,
}

impl TestClient {
    /// Creates a client sending no credentials
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            token: None,
        }
    }

    /// Creates a client sending `token` on every request
    pub fn with_token(base_url: String, token: &str) -> Self {
        let mut client = Self::new(base_url);
        client.token = Some(token.to_string());
        client
    }

    /// Creates a client for the actor holding every right
    pub fn admin(base_url: String) -> Self {
        Self::with_token(base_url, ADMIN_TOKEN)
    }

    /// Creates a client for the view-only actor
    pub fn reader(base_url: String) -> Self {
        Self::with_token(base_url, READER_TOKEN)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ========================================================================
    // Public Endpoints
    // ========================================================================

    /// GET /
    pub async fn home(&self) -> Response {
        self.request(reqwest::Method::GET, "/")
            .send()
            .await
            .expect("Home request failed")
    }

    /// GET /metrics
    pub async fn metrics(&self) -> Response {
        self.request(reqwest::Method::GET, "/metrics")
            .send()
            .await
            .expect("Metrics request failed")
    }

    // ========================================================================
    // Dump Endpoints
    // ========================================================================

    /// POST /v1/dumps
    pub async fn generate(&self, dump_type: &str) -> Response {
        self.request(reqwest::Method::POST, "/v1/dumps")
            .json(&json!({ "type": dump_type }))
            .send()
            .await
            .expect("Generate request failed")
    }

    /// POST /v1/dumps, returning the queued filename (`None` when declined)
    pub async fn generate_ok(&self, dump_type: &str) -> Option<String> {
        let response = self.generate(dump_type).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.expect("Invalid generate response");
        body["filename"].as_str().map(str::to_string)
    }

    /// GET /v1/dumps?type=...
    pub async fn list(&self, dump_type: Option<&str>) -> Response {
        let path = match dump_type {
            Some(dump_type) => format!("/v1/dumps?type={}", dump_type),
            None => "/v1/dumps".to_string(),
        };
        self.request(reqwest::Method::GET, &path)
            .send()
            .await
            .expect("List request failed")
    }

    /// GET /v1/dumps?filename=..., returning the single listing row if any
    pub async fn find(&self, filename: &str) -> Option<Value> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/dumps?filename={}", filename))
            .send()
            .await
            .expect("List request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let rows: Vec<Value> = response.json().await.expect("Invalid listing");
        rows.into_iter().next()
    }

    /// Polls the listing until `filename` reaches a terminal status
    pub async fn wait_for_terminal(&self, filename: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            if let Some(row) = self.find(filename).await {
                if row["status"] == "completed" || row["status"] == "failed" {
                    return row;
                }
            }
            if start.elapsed() > Duration::from_millis(DUMP_TIMEOUT_MS) {
                panic!("Dump {} did not finish within {}ms", filename, DUMP_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(DUMP_POLL_INTERVAL_MS)).await;
        }
    }

    /// GET /v1/dumps/{filename}/download
    pub async fn download(&self, filename: &str) -> Response {
        self.request(
            reqwest::Method::GET,
            &format!("/v1/dumps/{}/download", filename),
        )
        .send()
        .await
        .expect("Download request failed")
    }

    /// DELETE /v1/dumps/{type}/{filename}
    pub async fn delete(&self, dump_type: &str, filename: &str) -> Response {
        self.request(
            reqwest::Method::DELETE,
            &format!("/v1/dumps/{}/{}", dump_type, filename),
        )
        .send()
        .await
        .expect("Delete request failed")
    }
}
