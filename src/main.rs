use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use spotify_auth_relay::auth::{self, AuthManager, ProviderClient, TokenStore};
use spotify_auth_relay::config::{self, Config};
use spotify_auth_relay::{middleware, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // Prompt for client credentials on a first run from a terminal
    if config::needs_interactive_setup() {
        let interactive_config = config::run_interactive_setup()?;

        // Set environment variables from interactive config so Config::load() can use them
        std::env::set_var("SPOTIFY_CLIENT_ID", &interactive_config.client_id);
        std::env::set_var("SPOTIFY_CLIENT_SECRET", &interactive_config.client_secret);
        std::env::set_var("SERVER_PORT", &interactive_config.server_port);
    }

    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!("🚀 Spotify auth relay starting...");
    tracing::debug!("Environment: {}", config.environment);

    // Token store and lifecycle controller
    let store = Arc::new(TokenStore::new(config.token_file.clone()));
    let provider = ProviderClient::new(
        &config.accounts_url,
        config.client_id.clone(),
        config.client_secret.clone(),
        config.http_request_timeout,
    )?;
    let auth_manager = Arc::new(AuthManager::new(
        store,
        provider,
        config.redirect_uri.clone(),
        config.token_refresh_lead,
        config.verify_state,
    ));

    // Background refresh work runs until shutdown
    let shutdown = CancellationToken::new();

    tracing::info!("Loading tokens from {}", config.token_file.display());
    let token_state = auth_manager.bootstrap(shutdown.clone()).await;
    tracing::info!("Token state at startup: {:?}", token_state);

    let refresh_task = auth::spawn_refresh_task(
        auth_manager.clone(),
        Duration::from_secs(config.token_refresh_interval),
        shutdown.clone(),
    );

    if !config.verify_state {
        tracing::warn!("OAuth state verification disabled (VERIFY_OAUTH_STATE=false)");
    }

    let app_state = routes::AppState {
        auth_manager: auth_manager.clone(),
        config: Arc::new(config.clone()),
    };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Print startup banner
    print_startup_banner(&config);

    // Start server with graceful shutdown
    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = refresh_task.await {
        tracing::warn!("Token refresh task ended abnormally: {}", e);
    }

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    let mut app = Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::auth_routes(state.clone()));

    if state.config.setup_token_key.is_some() {
        app = app.merge(routes::setup_routes(state.clone()));
        tracing::warn!("POST /setup-token enabled, keep SETUP_TOKEN_KEY secret");
    } else {
        tracing::info!("POST /setup-token disabled (set SETUP_TOKEN_KEY to enable)");
    }

    // Apply middleware stack: Trace → CORS
    app.layer(middleware::cors_layer(&state.config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let set_or_missing = |value: &str| if value.is_empty() { "Missing ❌" } else { "Set ✅" };

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Spotify auth relay {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:        http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Client ID:     {}", set_or_missing(&config.client_id));
    println!("  Client Secret: {}", set_or_missing(&config.client_secret));
    println!("  Environment:   {}", config.environment);
    println!("  Redirect URI:  {}", config.redirect_uri);
    println!("  Token file:    {}", config.token_file.display());
    println!(
        "  Refresh:       every {}s, {}s before expiry",
        config.token_refresh_interval, config.token_refresh_lead
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
