//! Email/password sign-in against Firebase Authentication.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::SessionData;

/// Base URL for the identity toolkit (sign-in) API
const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Token refresh endpoint
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    email: String,
}

/// The refresh endpoint answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Pull the short error code ("INVALID_PASSWORD") out of an error body.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
}

pub struct IdentityClient {
    client: Client,
    api_key: String,
    identity_url: String,
    token_url: String,
}

impl IdentityClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            identity_url: IDENTITY_BASE_URL.to_string(),
            token_url: SECURE_TOKEN_URL.to_string(),
        })
    }

    /// Point at the auth emulator, e.g. `http://localhost:9099`.
    pub fn with_emulator(mut self, host: &str) -> Self {
        let host = host.trim_end_matches('/');
        self.identity_url = format!("{}/identitytoolkit.googleapis.com/v1", host);
        self.token_url = format!("{}/securetoken.googleapis.com/v1/token", host);
        self
    }

    fn sign_in_url(&self) -> String {
        format!(
            "{}/accounts:signInWithPassword?key={}",
            self.identity_url, self.api_key
        )
    }

    fn refresh_url(&self) -> String {
        format!("{}?key={}", self.token_url, self.api_key)
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match error_message(&body) {
            Some(message) => Err(anyhow::anyhow!("Sign-in failed: {}", message)),
            None => Err(anyhow::anyhow!("Sign-in failed with status {}", status)),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionData> {
        debug!(email = email, "Signing in");
        let response = self
            .client
            .post(self.sign_in_url())
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .context("Failed to send sign-in request")?;
        let response = Self::check_response(response).await?;
        let auth: SignInResponse = response
            .json()
            .await
            .context("Failed to parse sign-in response")?;

        Ok(SessionData {
            id_token: auth.id_token,
            refresh_token: auth.refresh_token,
            user_id: auth.local_id,
            email: auth.email,
            created_at: Utc::now(),
        })
    }

    /// Exchange the refresh token for a new id token.
    pub async fn refresh(&self, session: &SessionData) -> Result<SessionData> {
        debug!(user = %session.user_id, "Refreshing id token");
        let response = self
            .client
            .post(self.refresh_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Failed to send token refresh request")?;
        let response = Self::check_response(response).await?;
        let refreshed: RefreshResponse = response
            .json()
            .await
            .context("Failed to parse token refresh response")?;

        Ok(SessionData {
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            user_id: refreshed.user_id,
            email: session.email.clone(),
            created_at: Utc::now(),
        })
    }
}
