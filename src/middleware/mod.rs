// Access-key and CORS middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::ApiError;
use crate::routes::AppState;

/// Access-key middleware for the manual token override
///
/// Accepts "Authorization: Bearer {SETUP_TOKEN_KEY}" or the key in x-api-key.
/// Requests are refused when no key is configured.
pub async fn setup_key_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected_key) = state.config.setup_token_key.as_deref() {
        if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.strip_prefix("Bearer ") == Some(expected_key) {
                    return Ok(next.run(request).await);
                }
            }
        }

        if let Some(api_key_header) = request.headers().get("x-api-key") {
            if let Ok(key_str) = api_key_header.to_str() {
                if key_str == expected_key {
                    return Ok(next.run(request).await);
                }
            }
        }
    }

    let path = request.uri().path();
    let method = request.method();
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing setup key: {} {}",
        request_id,
        method,
        path
    );
    Err(ApiError::AuthError(
        "Invalid or missing setup key".to_string(),
    ))
}

/// Create CORS middleware layer
///
/// Only the configured frontend origins are allowed, with credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthManager, ProviderClient, TokenStore};
    use crate::config::{Config, Environment};
    use axum::{
        http::StatusCode,
        routing::{get, post},
        Router,
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_state(setup_token_key: Option<&str>) -> AppState {
        let config = Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 5001,
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            accounts_url: "http://127.0.0.1:9".to_string(),
            environment: Environment::Development,
            redirect_uri: "http://127.0.0.1:5173/auth/callback".to_string(),
            frontend_success_url: "http://localhost:5173/?spotify=connected".to_string(),
            verify_state: true,
            token_file: std::path::PathBuf::from("/tmp/unused-tokens.json"),
            token_refresh_interval: 600,
            token_refresh_lead: 600,
            http_request_timeout: 10,
            cors_origins: vec!["http://localhost:5173".to_string()],
            setup_token_key: setup_token_key.map(str::to_string),
            log_level: "info".to_string(),
            log_json: false,
        };

        let provider = ProviderClient::new(
            &config.accounts_url,
            config.client_id.clone(),
            config.client_secret.clone(),
            config.http_request_timeout,
        )
        .unwrap();
        let auth_manager = Arc::new(AuthManager::new(
            Arc::new(TokenStore::new(&config.token_file)),
            provider,
            config.redirect_uri.clone(),
            config.token_refresh_lead,
            config.verify_state,
        ));

        AppState {
            auth_manager,
            config: Arc::new(config),
        }
    }

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn create_test_app(state: AppState) -> Router {
        Router::new()
            .route("/test", post(test_handler))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                setup_key_middleware,
            ))
            .with_state(state)
    }

    fn post_request(header_name: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/test");
        if let Some((name, value)) = header_name {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_setup_key_with_valid_bearer_token() {
        let app = create_test_app(create_test_state(Some("setup-key-123")));

        let response = app
            .oneshot(post_request(Some(("authorization", "Bearer setup-key-123"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_setup_key_with_valid_x_api_key() {
        let app = create_test_app(create_test_state(Some("setup-key-123")));

        let response = app
            .oneshot(post_request(Some(("x-api-key", "setup-key-123"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_setup_key_with_wrong_key() {
        let app = create_test_app(create_test_state(Some("setup-key-123")));

        let response = app
            .clone()
            .oneshot(post_request(Some(("authorization", "Bearer wrong-key"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Key without the "Bearer " prefix
        let response = app
            .oneshot(post_request(Some(("authorization", "setup-key-123"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_setup_key_missing_header() {
        let app = create_test_app(create_test_state(Some("setup-key-123")));

        let response = app.oneshot(post_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_setup_key_unconfigured_refuses_everything() {
        let app = create_test_app(create_test_state(None));

        let response = app
            .oneshot(post_request(Some(("authorization", "Bearer "))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // CORS middleware tests

    fn cors_app() -> Router {
        Router::new()
            .route("/test", get(test_handler))
            .layer(cors_layer(&["http://localhost:5173".to_string()]))
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let request = Request::builder()
            .uri("/test")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();

        let response = cors_app().oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-credentials")
                .unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_cors_rejects_unknown_origin() {
        let request = Request::builder()
            .uri("/test")
            .header("origin", "https://evil.example.com")
            .body(Body::empty())
            .unwrap();

        let response = cors_app().oneshot(request).await.unwrap();
        assert!(!response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_cors_preflight_request() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/test")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = cors_app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key("access-control-allow-methods"));
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_setup_key_header() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/test")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "x-api-key")
            .body(Body::empty())
            .unwrap();

        let response = cors_app().oneshot(request).await.unwrap();

        let allowed = response
            .headers()
            .get("access-control-allow-headers")
            .unwrap()
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed.contains("x-api-key"));
    }
}
