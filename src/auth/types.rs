// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The single access/refresh/expiry triple managed by the relay
///
/// Serialized as-is to the token file, so the field names are part of the
/// on-disk format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    /// Expiry as epoch milliseconds
    #[serde(default)]
    pub expires_at: i64,
}

/// Lifecycle state derived from a TokenSet at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No access token
    Unauthenticated,

    /// Access token present and not yet expired
    Valid,

    /// Expired (or missing) access token with a refresh token to renew it
    Expired,

    /// Expired access token and nothing to refresh it with
    Unrecoverable,
}

impl TokenSet {
    /// Classify this token set at `now_ms` (epoch milliseconds)
    pub fn state_at(&self, now_ms: i64) -> TokenState {
        let expired = now_ms >= self.expires_at;

        if !self.access_token.is_empty() && !expired {
            TokenState::Valid
        } else if !self.refresh_token.is_empty() && expired {
            TokenState::Expired
        } else if !self.access_token.is_empty() {
            TokenState::Unrecoverable
        } else {
            TokenState::Unauthenticated
        }
    }

    /// Current state using the wall clock
    pub fn state(&self) -> TokenState {
        self.state_at(now_millis())
    }

    /// True when a proactive refresh is due: the refresh token exists and
    /// expiry is within `lead_ms`
    pub fn expires_within(&self, now_ms: i64, lead_ms: i64) -> bool {
        !self.refresh_token.is_empty() && now_ms >= self.expires_at.saturating_sub(lead_ms)
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// First 20 characters of the access token, for log lines
    pub fn masked_access_token(&self) -> String {
        if self.access_token.is_empty() {
            return "NONE".to_string();
        }
        let prefix: String = self.access_token.chars().take(20).collect();
        format!("{}...", prefix)
    }

    /// Expiry rendered as RFC 3339, or "UNKNOWN" for a zero/invalid timestamp
    pub fn expires_at_display(&self) -> String {
        if self.expires_at == 0 {
            return "UNKNOWN".to_string();
        }
        DateTime::<Utc>::from_timestamp_millis(self.expires_at)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

/// Current wall-clock time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Answer to a frontend token read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub access_token: String,
    pub is_authenticated: bool,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// Manual override payload
///
/// Every field is optional at the parsing level so that a missing field is
/// reported as a validation error rather than a deserialization error.
#[derive(Debug, Default, Deserialize)]
pub struct SetupTokenRequest {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

impl SetupTokenRequest {
    /// Convert to a TokenSet, rejecting missing or empty fields
    pub fn into_token_set(self) -> Option<TokenSet> {
        match (self.access_token, self.refresh_token, self.expires_at) {
            (Some(access_token), Some(refresh_token), Some(expires_at))
                if !access_token.is_empty() && !refresh_token.is_empty() =>
            {
                Some(TokenSet {
                    access_token,
                    refresh_token,
                    expires_at,
                })
            }
            _ => None,
        }
    }
}

/// Errors raised by the token lifecycle
#[derive(Error, Debug)]
pub enum TokenError {
    /// Reading or writing the token file failed
    #[error("Token file error ({path}): {source}")]
    Persistence {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The token file could not be encoded or decoded
    #[error("Token file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token endpoint answered with a non-2xx status
    #[error("Token endpoint returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// Network failure or timeout talking to the token endpoint
    #[error("Token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 2xx response that does not carry a usable token
    #[error("Malformed token endpoint response: {0}")]
    MalformedResponse(String),

    /// No refresh token; a new authorization-code flow is required
    #[error("No refresh token available, login required")]
    NoRefreshToken,

    /// Another refresh holds the refresh slot
    #[error("Token refresh already in progress")]
    RefreshInFlight,

    /// Callback state missing, unknown or expired
    #[error("Invalid OAuth state parameter")]
    InvalidState,
}
