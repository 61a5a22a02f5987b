//! HTTP client for the Firestore REST API.
//!
//! Handles bearer authentication, request timeouts, rate-limit backoff and
//! status-code mapping. Document encoding lives in `value`.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::store::StoreError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL for the hosted Firestore REST API
const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Firestore REST client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct FirestoreClient {
    client: Client,
    base_url: String,
    project_id: String,
    token: Option<String>,
}

impl FirestoreClient {
    /// Create a new client for `project_id`
    pub fn new(project_id: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id: project_id.into(),
            token: None,
        })
    }

    /// Point the client at a different host, e.g. the local emulator
    /// (`http://localhost:8080/v1`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a new client with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            project_id: self.project_id.clone(),
            token: Some(token),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// `projects/{project}/databases/(default)`
    pub fn database_path(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    /// Fully qualified document name used inside write requests.
    pub fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database_path(), collection, id)
    }

    pub fn documents_url(&self) -> String {
        format!("{}/{}/documents", self.base_url, self.database_path())
    }

    pub fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_url(), collection, id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, StoreError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::from_status(status, &body))
        }
    }

    /// Send a request, backing off and resending while rate limited.
    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, StoreError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.authorize(build()).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| {
                        StoreError::InvalidResponse(format!("{}: {}", url, e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(StoreError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, StoreError> {
        debug!(url = url, "GET");
        self.send(url, || self.client.get(url)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        debug!(url = url, "GET");
        self.send(url, || self.client.get(url).query(query)).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        debug!(url = url, "POST");
        self.send(url, || self.client.post(url).json(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_paths() {
        let client = FirestoreClient::new("race-day").unwrap();
        assert_eq!(client.database_path(), "projects/race-day/databases/(default)");
        assert_eq!(
            client.document_name("kids", "k1"),
            "projects/race-day/databases/(default)/documents/kids/k1"
        );
        assert_eq!(
            client.document_url("teams", "red"),
            "https://firestore.googleapis.com/v1/projects/race-day/databases/(default)/documents/teams/red"
        );
    }

    #[test]
    fn test_emulator_base_url() {
        let client = FirestoreClient::new("demo")
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            client.documents_url(),
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
        );
        let authed = client.with_token("abc".to_string());
        assert_eq!(authed.documents_url(), client.documents_url());
    }
}
