use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::provider::{self, ProviderClient};
use super::store::TokenStore;
use super::types::{now_millis, TokenError, TokenResponse, TokenSet, TokenState, TokenStatus};

/// How long an issued login state stays redeemable
const STATE_TTL_MINUTES: i64 = 10;

/// Upper bound on outstanding login states
const MAX_PENDING_STATES: usize = 256;

/// Fallback lifetime when the provider omits expires_in
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Authentication manager
/// Drives the token lifecycle: bootstrap, code exchange, refresh, reads and
/// manual override. Owns the token store.
pub struct AuthManager {
    /// Durable TokenSet
    store: Arc<TokenStore>,

    /// Token endpoint client
    provider: ProviderClient,

    /// Redirect URI used for both the authorize and exchange steps
    redirect_uri: String,

    /// Proactive refresh lead time in milliseconds
    refresh_lead_ms: i64,

    /// Single writer slot; held for the duration of a refresh, and while a
    /// login or manual override commits
    refresh_guard: Mutex<()>,

    /// Issued login states and when they were issued
    pending_states: DashMap<String, DateTime<Utc>>,

    /// Reject callbacks whose state was not issued by this process
    verify_state: bool,
}

impl AuthManager {
    pub fn new(
        store: Arc<TokenStore>,
        provider: ProviderClient,
        redirect_uri: String,
        refresh_lead_secs: u64,
        verify_state: bool,
    ) -> Self {
        Self {
            store,
            provider,
            redirect_uri,
            refresh_lead_ms: secs_to_millis(refresh_lead_secs),
            refresh_guard: Mutex::new(()),
            pending_states: DashMap::new(),
            verify_state,
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Load persisted tokens and kick off a background refresh if they have
    /// expired. Never blocks on the refresh; the refresh is abandoned when
    /// `shutdown` is cancelled.
    pub async fn bootstrap(self: &Arc<Self>, shutdown: CancellationToken) -> TokenState {
        let tokens = self.store.load().await;

        tracing::info!("Access token: {}", tokens.masked_access_token());
        tracing::info!(
            "Refresh token: {}",
            if tokens.refresh_token.is_empty() { "NONE" } else { "EXISTS" }
        );
        tracing::info!("Expires at: {}", tokens.expires_at_display());

        let state = tokens.state();
        match state {
            TokenState::Expired => {
                tracing::warn!("Access token expired, refreshing in background...");
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            tracing::debug!("Startup token refresh cancelled");
                        }
                        _ = manager.refresh_if_expiring() => {}
                    }
                });
            }
            TokenState::Unrecoverable => {
                tracing::warn!("Access token expired and no refresh token saved, login required");
            }
            TokenState::Unauthenticated => {
                tracing::info!("No access token yet, visit /auth/login");
            }
            TokenState::Valid => {}
        }

        state
    }

    /// Current lifecycle state
    pub async fn state(&self) -> TokenState {
        self.store.snapshot().await.state()
    }

    /// Whether an access token is held (valid or not)
    pub async fn has_token(&self) -> bool {
        self.store.snapshot().await.has_access_token()
    }

    /// Copy of the current TokenSet
    pub async fn snapshot(&self) -> TokenSet {
        self.store.snapshot().await
    }

    /// Build the provider authorization URL with a fresh state value
    pub fn authorize_url(&self) -> Result<Url> {
        let state = provider::generate_state();
        let url = self.provider.authorize_url(&self.redirect_uri, &state)?;

        let now = Utc::now();
        self.pending_states
            .retain(|_, issued| now - *issued < Duration::minutes(STATE_TTL_MINUTES));

        while self.pending_states.len() >= MAX_PENDING_STATES {
            let oldest = self
                .pending_states
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.pending_states.remove(&key);
                }
                None => break,
            }
        }
        self.pending_states.insert(state, now);

        Ok(url)
    }

    /// Consume a callback state value
    ///
    /// States are single use. With verification disabled any value (or none)
    /// is accepted.
    pub fn check_state(&self, state: Option<&str>) -> Result<(), TokenError> {
        let issued = state.and_then(|s| self.pending_states.remove(s));

        if !self.verify_state {
            return Ok(());
        }

        match issued {
            Some((_, issued_at))
                if Utc::now() - issued_at < Duration::minutes(STATE_TTL_MINUTES) =>
            {
                Ok(())
            }
            _ => Err(TokenError::InvalidState),
        }
    }

    /// Exchange an authorization code and persist the resulting tokens
    ///
    /// On failure the stored TokenSet is untouched.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, TokenError> {
        tracing::info!("Callback using redirect URI: {}", self.redirect_uri);

        let data = self
            .provider
            .exchange_code(code, &self.redirect_uri)
            .await?;

        // Wait out any in-flight refresh so it cannot overwrite this login
        let _guard = self.refresh_guard.lock().await;
        let current = self.store.snapshot().await;
        let tokens = apply_response(&current, data);
        self.commit(tokens.clone()).await;

        tracing::info!(
            "Tokens received and saved, access token: {}",
            tokens.masked_access_token()
        );
        Ok(tokens)
    }

    /// Refresh now, unless another refresh is already running
    pub async fn refresh(&self) -> Result<(), TokenError> {
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            tracing::debug!("Token refresh already in progress, skipping");
            return Err(TokenError::RefreshInFlight);
        };
        self.refresh_locked().await
    }

    /// Proactive refresh, used by the scheduler and at startup
    ///
    /// Refreshes when expiry is within the lead time. Skips if another
    /// refresh holds the slot. Failures are logged.
    pub async fn refresh_if_expiring(&self) {
        if !self.is_expiring().await {
            return;
        }

        let Ok(_guard) = self.refresh_guard.try_lock() else {
            tracing::debug!("Token refresh already in progress, skipping");
            return;
        };

        // Re-check: a refresh may have completed before we took the slot
        if !self.is_expiring().await {
            return;
        }

        tracing::info!("Token expiring soon, auto-refreshing...");
        if let Err(e) = self.refresh_locked().await {
            tracing::warn!("Scheduled token refresh failed: {}", e);
        }
    }

    async fn is_expiring(&self) -> bool {
        self.store
            .snapshot()
            .await
            .expires_within(now_millis(), self.refresh_lead_ms)
    }

    /// Current token for the frontend, refreshing first if it has expired
    ///
    /// Waits for an in-flight refresh instead of skipping, so the caller
    /// sees the post-refresh value.
    pub async fn read_token(&self) -> TokenStatus {
        if self.store.snapshot().await.state() == TokenState::Expired {
            let _guard = self.refresh_guard.lock().await;

            // Another task may have refreshed while we waited
            if self.store.snapshot().await.state() == TokenState::Expired {
                tracing::warn!("Token expired, refreshing...");
                if let Err(e) = self.refresh_locked().await {
                    tracing::warn!("Token refresh on read failed: {}", e);
                }
            }
        }

        let tokens = self.store.snapshot().await;
        TokenStatus {
            is_authenticated: tokens.has_access_token(),
            access_token: tokens.access_token,
        }
    }

    /// Overwrite the whole TokenSet with caller-supplied values
    pub async fn manual_setup(&self, tokens: TokenSet) {
        let _guard = self.refresh_guard.lock().await;
        self.commit(tokens).await;
        tracing::info!("Tokens manually set");
    }

    /// Refresh body; the caller holds `refresh_guard`
    async fn refresh_locked(&self) -> Result<(), TokenError> {
        let current = self.store.snapshot().await;
        if current.refresh_token.is_empty() {
            tracing::warn!("No refresh token available, login required");
            return Err(TokenError::NoRefreshToken);
        }

        tracing::info!("Refreshing access token...");
        let data = self.provider.refresh(&current.refresh_token).await?;

        let rotated = data.refresh_token.as_deref().is_some_and(|r| !r.is_empty());
        let tokens = apply_response(&current, data);
        self.commit(tokens.clone()).await;

        tracing::info!(
            "Access token refreshed, expires: {}{}",
            tokens.expires_at_display(),
            if rotated { " (refresh token rotated)" } else { "" }
        );
        Ok(())
    }

    /// Persist, absorbing write failures
    async fn commit(&self, tokens: TokenSet) {
        if let Err(e) = self.store.commit(tokens).await {
            tracing::error!("Failed to save tokens, keeping them in memory only: {}", e);
        }
    }
}

/// New TokenSet from a token endpoint response
///
/// The refresh token is kept unless the response carries a replacement.
fn apply_response(current: &TokenSet, data: TokenResponse) -> TokenSet {
    let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    let refresh_token = data
        .refresh_token
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| current.refresh_token.clone());

    TokenSet {
        access_token: data.access_token,
        refresh_token,
        expires_at: now_millis().saturating_add(secs_to_millis(expires_in)),
    }
}

fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}
