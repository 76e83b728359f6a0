// Token endpoint client

use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{Client, Url};
use std::time::Duration;

use super::types::{TokenError, TokenResponse};

/// Scopes requested on every login
pub const SCOPES: &[&str] = &[
    "streaming",
    "user-read-email",
    "user-read-private",
    "user-read-playback-state",
    "user-modify-playback-state",
    "playlist-read-private",
    "playlist-read-collaborative",
];

/// Length of the anti-forgery state value
pub const STATE_LENGTH: usize = 16;

/// Client for the provider's accounts service
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    accounts_url: String,
    client_id: String,
    client_secret: String,
}

impl ProviderClient {
    /// Create a client for `accounts_url` (e.g. https://accounts.spotify.com)
    pub fn new(
        accounts_url: &str,
        client_id: String,
        client_secret: String,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            accounts_url: accounts_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        })
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.accounts_url)
    }

    /// Build the user-facing authorization URL
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let scope = SCOPES.join(" ");
        let url = Url::parse_with_params(
            &format!("{}/authorize", self.accounts_url),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("scope", scope.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .context("Failed to build authorize URL")?;

        Ok(url)
    }

    /// Exchange an authorization code (grant_type=authorization_code)
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, TokenError> {
        tracing::debug!("Exchanging authorization code, redirect_uri={}", redirect_uri);

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.request_token(&form).await
    }

    /// Mint a new access token (grant_type=refresh_token)
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, TokenError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.request_token(&form).await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, TokenError> {
        let response = self
            .client
            .post(self.token_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Token endpoint request failed: status={}, body={}",
                status,
                error_text
            );
            return Err(TokenError::Provider {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;

        if data.access_token.is_empty() {
            return Err(TokenError::MalformedResponse(
                "response does not contain access_token".to_string(),
            ));
        }

        Ok(data)
    }
}

/// Random alphanumeric string for the `state` parameter
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}
