use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    middleware::{self as axum_middleware},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{AuthManager, SetupTokenRequest, TokenError, TokenStatus};
use crate::config::Config;
use crate::error::ApiError;
use crate::middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub config: Arc<Config>,
}

/// Query string the provider appends to the callback
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Health check route (no authentication required)
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .with_state(state)
}

/// OAuth flow routes
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/token", get(token_handler))
        .with_state(state)
}

/// Manual token override (requires the setup key)
pub fn setup_routes(state: AppState) -> Router {
    Router::new()
        .route("/setup-token", post(setup_token_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::setup_key_middleware,
        ))
        .with_state(state)
}

/// GET / - Simple health check
///
/// Returns status and whether an access token is held.
async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Spotify auth relay running",
        "has_token": state.auth_manager.has_token().await,
    }))
}

/// GET /auth/login - Redirect to the provider's consent page
async fn login_handler(State(state): State<AppState>) -> crate::error::Result<Redirect> {
    tracing::info!("Login request received");

    let url = state.auth_manager.authorize_url()?;
    tracing::info!("Using redirect URI: {}", state.auth_manager.redirect_uri());

    Ok(Redirect::to(url.as_str()))
}

/// GET /auth/callback - Exchange the authorization code
///
/// Success redirects to the frontend. Failures are rendered as plain text.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        tracing::warn!("Authorization denied by provider: {}", error);
        return (
            StatusCode::BAD_REQUEST,
            format!("Authentication failed: {}", error),
        )
            .into_response();
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        tracing::warn!("Callback without authorization code");
        return (
            StatusCode::BAD_REQUEST,
            "Authentication failed: missing authorization code",
        )
            .into_response();
    };

    if let Err(e) = state.auth_manager.check_state(params.state.as_deref()) {
        tracing::warn!("Rejecting callback: {}", e);
        return (StatusCode::BAD_REQUEST, format!("Authentication failed: {}", e)).into_response();
    }

    match state.auth_manager.exchange_code(&code).await {
        Ok(_) => Redirect::to(&state.config.frontend_success_url).into_response(),
        Err(TokenError::Provider { body, .. }) => {
            tracing::error!("Failed to get token: {}", body);
            (
                StatusCode::BAD_GATEWAY,
                format!("Authentication failed: {}", body),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Auth error: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                format!("Authentication error: {}", e),
            )
                .into_response()
        }
    }
}

/// GET /auth/token - Current access token for the frontend
///
/// Refreshes first when the token has expired.
async fn token_handler(State(state): State<AppState>) -> Json<TokenStatus> {
    tracing::debug!("Request to /auth/token");
    Json(state.auth_manager.read_token().await)
}

/// POST /setup-token - Overwrite the stored tokens
async fn setup_token_handler(
    State(state): State<AppState>,
    payload: Result<Json<SetupTokenRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::ValidationError(format!("Invalid token data: {}", e.body_text())))?;

    let tokens = request
        .into_token_set()
        .ok_or_else(|| ApiError::ValidationError("Missing token data".to_string()))?;

    state.auth_manager.manual_setup(tokens).await;

    Ok(Json(json!({
        "success": true,
        "message": "Tokens saved!",
    })))
}
